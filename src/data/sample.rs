//! Synthetic trial generation.
//!
//! Produces a `subj_idx` × `cond` × trial table with Gaussian reaction times:
//!
//! ```text
//! rt = subject_mean + cond_index * cond_shift + noise_sd * z
//! ```
//!
//! where `subject_mean ~ Normal(v_mean, v_spread)`. Responses are Bernoulli with
//! a fixed accuracy. Output is deterministic for a given `SampleConfig`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::data::table::{Column, TrialData};
use crate::domain::{SUBJ_COL, SampleConfig};
use crate::error::AppError;

/// Probability of a correct (`response = 1`) trial.
const ACCURACY: f64 = 0.85;

/// Reaction times are floored here so the table never holds non-positive rts.
const MIN_RT: f64 = 0.05;

pub fn generate_trials(config: &SampleConfig) -> Result<TrialData, AppError> {
    if config.n_subjects == 0 {
        return Err(AppError::Config("Subject count must be > 0.".to_string()));
    }
    if config.trials_per_condition == 0 {
        return Err(AppError::Config("Trials per condition must be > 0.".to_string()));
    }
    if config.conditions.is_empty() {
        return Err(AppError::Config("At least one condition is required.".to_string()));
    }
    if !(config.v_spread.is_finite() && config.v_spread >= 0.0) {
        return Err(AppError::Config("Invalid subject spread.".to_string()));
    }
    if !(config.noise_sd.is_finite() && config.noise_sd > 0.0) {
        return Err(AppError::Config("Invalid trial noise.".to_string()));
    }

    let mut rng = StdRng::seed_from_u64(sample_seed(config));
    let subject_dist = Normal::new(config.v_mean, config.v_spread)
        .map_err(|e| AppError::Config(format!("Subject distribution error: {e}")))?;
    let noise = Normal::new(0.0, config.noise_sd)
        .map_err(|e| AppError::Config(format!("Noise distribution error: {e}")))?;

    let n = config.n_subjects * config.conditions.len() * config.trials_per_condition;
    let mut rt = Vec::with_capacity(n);
    let mut response = Vec::with_capacity(n);
    let mut subj_idx = Vec::with_capacity(n);
    let mut cond = Vec::with_capacity(n);

    for subj in 0..config.n_subjects {
        let subject_mean = subject_dist.sample(&mut rng);
        for (c_idx, c_name) in config.conditions.iter().enumerate() {
            let mean = subject_mean + c_idx as f64 * config.cond_shift;
            for _ in 0..config.trials_per_condition {
                rt.push((mean + noise.sample(&mut rng)).max(MIN_RT));
                response.push(i64::from(rng.gen_bool(ACCURACY)));
                subj_idx.push(subj as i64 + 1);
                cond.push(c_name.clone());
            }
        }
    }

    TrialData::new()
        .with_column("rt", Column::Float(rt))?
        .with_column("response", Column::Int(response))?
        .with_column(SUBJ_COL, Column::Int(subj_idx))?
        .with_column("cond", Column::Text(cond))
}

fn sample_seed(config: &SampleConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.seed.hash(&mut hasher);
    config.n_subjects.hash(&mut hasher);
    config.trials_per_condition.hash(&mut hasher);
    config.conditions.hash(&mut hasher);
    config.v_mean.to_bits().hash(&mut hasher);
    config.v_spread.to_bits().hash(&mut hasher);
    config.cond_shift.to_bits().hash(&mut hasher);
    config.noise_sd.to_bits().hash(&mut hasher);
    hasher.finish()
}
