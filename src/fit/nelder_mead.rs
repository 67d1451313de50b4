//! Derivative-free local optimizer (Nelder–Mead simplex).
//!
//! Used as the default `Optimizer`: it maximizes the joint log-probability of
//! a node arena over its free parameters by minimizing `-logp`. Points where
//! the log-probability is not finite are treated as `+inf`, so the simplex
//! never moves outside the support.

use std::collections::BTreeMap;

use nalgebra::DVector;
use tracing::debug;

use crate::error::AppError;
use crate::fit::map::{MapResult, Optimizer};
use crate::graph::NodeArena;

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Relative step for the initial simplex.
const NONZERO_STEP: f64 = 0.05;
/// Absolute step for coordinates starting at zero.
const ZERO_STEP: f64 = 0.00025;

#[derive(Debug, Clone)]
pub struct NelderMead {
    /// Iteration cap; `None` uses `200 * dimension`.
    pub max_iter: Option<usize>,
    pub xatol: f64,
    pub fatol: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_iter: None,
            xatol: 1e-4,
            fatol: 1e-4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: DVector<f64>,
    pub fx: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl NelderMead {
    pub fn minimize(
        &self,
        mut f: impl FnMut(&DVector<f64>) -> f64,
        x0: DVector<f64>,
    ) -> Minimum {
        let n = x0.len();
        let mut eval = |x: &DVector<f64>| {
            let v = f(x);
            if v.is_nan() { f64::INFINITY } else { v }
        };
        if n == 0 {
            let fx = eval(&x0);
            return Minimum {
                x: x0,
                fx,
                iterations: 0,
                converged: true,
            };
        }

        let max_iter = self.max_iter.unwrap_or(200 * n);
        let mut simplex = Vec::with_capacity(n + 1);
        simplex.push(x0.clone());
        for k in 0..n {
            let mut y = x0.clone();
            if y[k] != 0.0 {
                y[k] *= 1.0 + NONZERO_STEP;
            } else {
                y[k] = ZERO_STEP;
            }
            simplex.push(y);
        }
        let mut fsim: Vec<f64> = simplex.iter().map(&mut eval).collect();

        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iter {
            order(&mut simplex, &mut fsim);

            let x_spread = simplex[1..]
                .iter()
                .map(|x| (x - &simplex[0]).amax())
                .fold(0.0, f64::max);
            let f_spread = fsim[1..]
                .iter()
                .map(|v| (v - fsim[0]).abs())
                .fold(0.0, f64::max);
            if x_spread <= self.xatol && f_spread <= self.fatol {
                converged = true;
                break;
            }
            iterations += 1;

            let centroid = simplex[..n]
                .iter()
                .fold(DVector::zeros(n), |acc, x| acc + x)
                / n as f64;
            let worst = &simplex[n];

            let xr = &centroid * (1.0 + REFLECT) - worst * REFLECT;
            let fr = eval(&xr);

            if fr < fsim[0] {
                let xe = &centroid * (1.0 + REFLECT * EXPAND) - worst * (REFLECT * EXPAND);
                let fe = eval(&xe);
                if fe < fr {
                    simplex[n] = xe;
                    fsim[n] = fe;
                } else {
                    simplex[n] = xr;
                    fsim[n] = fr;
                }
                continue;
            }
            if fr < fsim[n - 1] {
                simplex[n] = xr;
                fsim[n] = fr;
                continue;
            }

            // Contraction, outside or inside the simplex.
            let (xc, fc, accept) = if fr < fsim[n] {
                let xc = &centroid * (1.0 + CONTRACT * REFLECT) - worst * (CONTRACT * REFLECT);
                let fc = eval(&xc);
                let accept = fc <= fr;
                (xc, fc, accept)
            } else {
                let xc = &centroid * (1.0 - CONTRACT) + worst * CONTRACT;
                let fc = eval(&xc);
                let accept = fc < fsim[n];
                (xc, fc, accept)
            };
            if accept {
                simplex[n] = xc;
                fsim[n] = fc;
                continue;
            }

            let best = simplex[0].clone();
            for j in 1..=n {
                simplex[j] = &best + (&simplex[j] - &best) * SHRINK;
                fsim[j] = eval(&simplex[j]);
            }
        }

        order(&mut simplex, &mut fsim);
        Minimum {
            x: simplex.swap_remove(0),
            fx: fsim[0],
            iterations,
            converged,
        }
    }
}

/// Sort vertices by objective value, best first (stable).
fn order(simplex: &mut Vec<DVector<f64>>, fsim: &mut Vec<f64>) {
    let mut idx: Vec<usize> = (0..fsim.len()).collect();
    idx.sort_by(|&a, &b| fsim[a].total_cmp(&fsim[b]));
    *simplex = idx.iter().map(|&i| simplex[i].clone()).collect();
    *fsim = idx.iter().map(|&i| fsim[i]).collect();
}

impl Optimizer for NelderMead {
    fn name(&self) -> &'static str {
        "nelder-mead"
    }

    fn optimize(&self, arena: &mut NodeArena) -> Result<MapResult, AppError> {
        let ids = arena.free_nodes();
        let x0 = arena.flatten(&ids);

        let minimum = self.minimize(
            |x| {
                arena.unflatten(&ids, x);
                -arena.logp()
            },
            x0,
        );
        arena.unflatten(&ids, &minimum.x);
        let logp = arena.logp();
        if !logp.is_finite() {
            return Err(AppError::Optimizer(format!(
                "no finite log-probability found (logp = {logp})"
            )));
        }
        debug!(
            dim = minimum.x.len(),
            iterations = minimum.iterations,
            converged = minimum.converged,
            logp,
            "nelder-mead finished"
        );

        let values: BTreeMap<_, _> = ids
            .iter()
            .map(|&id| {
                let node = arena.get(id);
                (node.name.clone(), node.value.clone())
            })
            .collect();
        Ok(MapResult {
            logp,
            values,
            iterations: minimum.iterations,
            converged: minimum.converged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_quadratic_minimum() {
        let nm = NelderMead {
            xatol: 1e-8,
            fatol: 1e-10,
            ..NelderMead::default()
        };
        let min = nm.minimize(
            |x| (x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2) + 3.0,
            DVector::from_vec(vec![0.0, 0.0]),
        );
        assert!(min.converged);
        assert!((min.x[0] - 1.0).abs() < 1e-3);
        assert!((min.x[1] + 2.0).abs() < 1e-3);
        assert!((min.fx - 3.0).abs() < 1e-6);
    }

    #[test]
    fn stays_inside_finite_region() {
        // Infinite outside x > 0; the minimum sits near the boundary.
        let nm = NelderMead::default();
        let min = nm.minimize(
            |x| if x[0] <= 0.0 { f64::INFINITY } else { x[0] + 1.0 / x[0] },
            DVector::from_vec(vec![3.0]),
        );
        assert!(min.fx.is_finite());
        assert!((min.x[0] - 1.0).abs() < 1e-2);
    }

    #[test]
    fn respects_iteration_cap() {
        let nm = NelderMead {
            max_iter: Some(3),
            ..NelderMead::default()
        };
        let min = nm.minimize(|x| x.norm_squared(), DVector::from_vec(vec![5.0, 5.0, 5.0]));
        assert_eq!(min.iterations, 3);
        assert!(!min.converged);
    }

    #[test]
    fn zero_dimensional_problem_is_trivial() {
        let min = NelderMead::default().minimize(|_| 2.0, DVector::zeros(0));
        assert!(min.converged);
        assert_eq!(min.fx, 2.0);
    }
}
