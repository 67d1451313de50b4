//! Posterior summary statistics.
//!
//! Traces come from a `SamplingSession` (the sampler itself lives outside
//! this crate). `NodeStats::from_trace` reduces one trace to the registry's
//! stat columns.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Quantiles reported for every node, in percent.
pub const QUANTILES: [f64; 5] = [2.5, 25.0, 50.0, 75.0, 97.5];

/// Upper bound on the number of batches used for the MC error.
const MC_BATCHES: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub mean: f64,
    pub std: f64,
    pub q2_5: f64,
    pub q25: f64,
    pub q50: f64,
    pub q75: f64,
    pub q97_5: f64,
    pub mc_err: f64,
}

impl NodeStats {
    /// `None` for an empty trace.
    pub fn from_trace(trace: &[f64]) -> Option<Self> {
        if trace.is_empty() {
            return None;
        }
        let mean = mean(trace);
        let std = population_std(trace, mean);

        let mut sorted = trace.to_vec();
        sorted.sort_by(f64::total_cmp);
        let q = QUANTILES.map(|p| quantile_sorted(&sorted, p / 100.0));

        Some(Self {
            mean,
            std,
            q2_5: q[0],
            q25: q[1],
            q50: q[2],
            q75: q[3],
            q97_5: q[4],
            mc_err: batch_mc_error(trace),
        })
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std(values: &[f64], mean: f64) -> f64 {
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Linear interpolation between order statistics.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Batch-means Monte Carlo standard error.
///
/// Batch boundaries are spread over the whole trace, so batch lengths differ
/// by at most one draw and no draw is left out.
fn batch_mc_error(trace: &[f64]) -> f64 {
    let n = trace.len();
    let n_batches = MC_BATCHES.min(n);
    if n_batches < 2 {
        return 0.0;
    }
    let means: Vec<f64> = (0..n_batches)
        .map(|i| mean(&trace[i * n / n_batches..(i + 1) * n / n_batches]))
        .collect();
    let m = mean(&means);
    population_std(&means, m) / (n_batches as f64).sqrt()
}

/// Read side of a sampling run, queried by node name.
pub trait SamplingSession {
    fn trace(&self, node: &str) -> Option<&[f64]>;

    fn deviance(&self) -> Option<&[f64]>;

    /// DIC as computed by the sampler itself.
    fn dic(&self) -> Option<f64> {
        None
    }

    /// Deviance at the posterior mean, when the sampler can provide it.
    fn deviance_at_mean(&self) -> Option<f64> {
        None
    }
}

/// In-memory traces, e.g. loaded from a previous run or produced in tests.
#[derive(Debug, Clone, Default)]
pub struct TraceStore {
    traces: HashMap<String, Vec<f64>>,
    deviance: Vec<f64>,
    deviance_at_mean: Option<f64>,
    dic: Option<f64>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: &str, trace: Vec<f64>) {
        self.traces.insert(node.to_string(), trace);
    }

    pub fn set_deviance(&mut self, deviance: Vec<f64>, at_mean: Option<f64>) {
        self.deviance = deviance;
        self.deviance_at_mean = at_mean;
    }

    pub fn set_dic(&mut self, dic: f64) {
        self.dic = Some(dic);
    }
}

impl SamplingSession for TraceStore {
    fn trace(&self, node: &str) -> Option<&[f64]> {
        self.traces.get(node).map(Vec::as_slice)
    }

    fn deviance(&self) -> Option<&[f64]> {
        if self.deviance.is_empty() {
            None
        } else {
            Some(&self.deviance)
        }
    }

    fn dic(&self) -> Option<f64> {
        self.dic
    }

    fn deviance_at_mean(&self) -> Option<f64> {
        self.deviance_at_mean
    }
}

/// Deviance information criterion summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DicInfo {
    pub dic: f64,
    pub deviance: f64,
    pub pd: f64,
}

/// DIC summary from the deviance trace.
///
/// A DIC reported by the session wins and gives `pD = DIC - mean deviance`.
/// Otherwise `pD = mean deviance - deviance at the posterior mean` and
/// `DIC = mean deviance + pD`.
pub fn dic_info(session: &dyn SamplingSession) -> Option<DicInfo> {
    let deviance = mean(session.deviance()?);
    if let Some(dic) = session.dic() {
        return Some(DicInfo {
            dic,
            deviance,
            pd: dic - deviance,
        });
    }
    let pd = deviance - session.deviance_at_mean()?;
    Some(DicInfo {
        dic: deviance + pd,
        deviance,
        pd,
    })
}
