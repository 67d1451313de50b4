//! Shared model pipeline used by every subcommand that builds a model.
//!
//! data (CSV or synthetic) -> templates -> build -> (MAP | subject init)

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::data::{TrialData, generate_trials};
use crate::domain::{MapConfig, ModelConfig, SampleConfig};
use crate::error::AppError;
use crate::fit::{MapOutcome, NelderMead, SubjInitReport, map, subj_by_subj_map_init};
use crate::io::ingest::load_trials;
use crate::model::{HierarchicalModel, ModelFactory, RtModel};

/// Trial data from `path`, or synthetic data when no path is given.
pub fn load_data(path: Option<&Path>, sample: &SampleConfig) -> Result<TrialData, AppError> {
    match path {
        Some(path) => {
            let ingested = load_trials(path)?;
            info!(
                path = %path.display(),
                rows_read = ingested.rows_read,
                rows_used = ingested.rows_used(),
                "loaded trial data"
            );
            Ok(ingested.data)
        }
        None => {
            let data = generate_trials(sample)?;
            info!(rows = data.n_rows(), "generated synthetic trial data");
            Ok(data)
        }
    }
}

pub fn build_model(data: TrialData, config: ModelConfig) -> Result<HierarchicalModel, AppError> {
    let factory: Arc<dyn ModelFactory> = Arc::new(RtModel);
    HierarchicalModel::new(factory, Arc::new(data), config)
}

pub fn run_map(
    model: &mut HierarchicalModel,
    optimizer: &NelderMead,
    config: &MapConfig,
) -> Result<MapOutcome, AppError> {
    map(model, optimizer, config)
}

pub fn run_init(
    model: &mut HierarchicalModel,
    optimizer: &NelderMead,
    config: &MapConfig,
) -> Result<SubjInitReport, AppError> {
    subj_by_subj_map_init(model, optimizer, config)
}
