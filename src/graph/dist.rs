//! Node constructors.
//!
//! A template is created with a `Constructor`, which fixes once how its
//! concrete nodes receive their parents:
//!
//! - `Stochastic` nodes take every argument (parent node or constant) as a
//!   direct named input (`mu`, `sigma`, ...).
//! - `Deterministic` nodes take a single parents mapping plus constant kwargs.
//!
//! Densities and transforms are the external collaborators of the engine; the
//! few implemented here are enough for the built-in model and the tests.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal as NormalDist};

/// Resolved numeric inputs of one node, by role.
pub type Params = BTreeMap<String, f64>;

/// Log-density plus an initial-value generator.
pub trait Density: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Roles that must be bound for this density.
    fn roles(&self) -> &'static [&'static str];

    fn logp(&self, x: f64, params: &Params) -> f64;

    /// Draw a starting value; `NaN` if the parameters are invalid.
    fn draw(&self, params: &Params, rng: &mut StdRng) -> f64;
}

/// Deterministic function of parent values.
pub trait Transform: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn compute(&self, parents: &Params, kwargs: &Params) -> f64;
}

#[derive(Debug, Clone)]
pub enum Constructor {
    Stochastic(Arc<dyn Density>),
    Deterministic(Arc<dyn Transform>),
}

impl Constructor {
    pub fn is_stochastic(&self) -> bool {
        matches!(self, Constructor::Stochastic(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Constructor::Stochastic(d) => d.name(),
            Constructor::Deterministic(t) => t.name(),
        }
    }

    pub fn normal() -> Self {
        Constructor::Stochastic(Arc::new(Normal))
    }

    pub fn uniform() -> Self {
        Constructor::Stochastic(Arc::new(Uniform))
    }

    pub fn half_normal() -> Self {
        Constructor::Stochastic(Arc::new(HalfNormal))
    }

    pub fn sum() -> Self {
        Constructor::Deterministic(Arc::new(Sum))
    }
}

fn param(params: &Params, role: &str) -> f64 {
    params.get(role).copied().unwrap_or(f64::NAN)
}

fn normal_logpdf(x: f64, mu: f64, sigma: f64) -> f64 {
    if !(sigma.is_finite() && sigma > 0.0) || !x.is_finite() || !mu.is_finite() {
        return f64::NEG_INFINITY;
    }
    let z = (x - mu) / sigma;
    -0.5 * (2.0 * PI).ln() - sigma.ln() - 0.5 * z * z
}

/// `rand_distr` accepts a negative std dev, so sigma is checked here.
fn normal_draw(mu: f64, sigma: f64, rng: &mut StdRng) -> f64 {
    if !(sigma.is_finite() && sigma > 0.0) || !mu.is_finite() {
        return f64::NAN;
    }
    match NormalDist::new(mu, sigma) {
        Ok(dist) => dist.sample(rng),
        Err(_) => f64::NAN,
    }
}

/// `Normal(mu, sigma)`.
#[derive(Debug, Clone, Copy)]
pub struct Normal;

impl Density for Normal {
    fn name(&self) -> &'static str {
        "normal"
    }

    fn roles(&self) -> &'static [&'static str] {
        &["mu", "sigma"]
    }

    fn logp(&self, x: f64, params: &Params) -> f64 {
        normal_logpdf(x, param(params, "mu"), param(params, "sigma"))
    }

    fn draw(&self, params: &Params, rng: &mut StdRng) -> f64 {
        normal_draw(param(params, "mu"), param(params, "sigma"), rng)
    }
}

/// `Uniform(lower, upper)` on the closed interval.
#[derive(Debug, Clone, Copy)]
pub struct Uniform;

impl Density for Uniform {
    fn name(&self) -> &'static str {
        "uniform"
    }

    fn roles(&self) -> &'static [&'static str] {
        &["lower", "upper"]
    }

    fn logp(&self, x: f64, params: &Params) -> f64 {
        let lower = param(params, "lower");
        let upper = param(params, "upper");
        if !(lower < upper) || !(lower..=upper).contains(&x) {
            return f64::NEG_INFINITY;
        }
        -(upper - lower).ln()
    }

    fn draw(&self, params: &Params, rng: &mut StdRng) -> f64 {
        let lower = param(params, "lower");
        let upper = param(params, "upper");
        if !(lower.is_finite() && upper.is_finite() && lower < upper) {
            return f64::NAN;
        }
        rng.gen_range(lower..upper)
    }
}

/// `HalfNormal(sigma)` on `x >= 0`.
#[derive(Debug, Clone, Copy)]
pub struct HalfNormal;

impl Density for HalfNormal {
    fn name(&self) -> &'static str {
        "half_normal"
    }

    fn roles(&self) -> &'static [&'static str] {
        &["sigma"]
    }

    fn logp(&self, x: f64, params: &Params) -> f64 {
        if x < 0.0 {
            return f64::NEG_INFINITY;
        }
        2.0_f64.ln() + normal_logpdf(x, 0.0, param(params, "sigma"))
    }

    fn draw(&self, params: &Params, rng: &mut StdRng) -> f64 {
        normal_draw(0.0, param(params, "sigma"), rng).abs()
    }
}

/// Sum of all parent values and constant kwargs.
#[derive(Debug, Clone, Copy)]
pub struct Sum;

impl Transform for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn compute(&self, parents: &Params, kwargs: &Params) -> f64 {
        parents.values().chain(kwargs.values()).sum()
    }
}
