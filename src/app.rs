//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - loads or generates trial data
//! - builds the hierarchical model
//! - runs MAP or subject-by-subject initialization
//! - prints reports and writes optional exports

use std::collections::BTreeSet;

use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Command, MapArgs, ModeArg, ModelArgs, NodesArgs, SampleArgs, SimulateArgs};
use crate::domain::{DependsOn, MapConfig, ModelConfig, SampleConfig};
use crate::error::AppError;
use crate::fit::NelderMead;

pub mod pipeline;

/// Entry point for the `hier` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    crate::logging::init(cli.log_level.as_deref())?;

    match cli.command {
        Command::Simulate(args) => handle_simulate(args),
        Command::Nodes(args) => handle_nodes(args),
        Command::Map(args) => handle_map(args),
        Command::Init(args) => handle_init(args),
    }
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let config = sample_config_from_args(&args.sample);
    let data = crate::data::generate_trials(&config)?;
    crate::io::export::write_trials_csv(&args.out, &data)?;
    info!(path = %args.out.display(), rows = data.n_rows(), "wrote synthetic trials");
    println!("Wrote {} trials to {}", data.n_rows(), args.out.display());
    Ok(())
}

fn handle_nodes(args: NodesArgs) -> Result<(), AppError> {
    let model = build_from_args(&args.model)?;

    println!(
        "{}",
        crate::report::format_registry(model.registry(), &model.graph().arena)
    );

    if let Some(path) = &args.export_csv {
        crate::io::export::write_registry_csv(path, model.registry())?;
    }
    if let Some(path) = &args.export_json {
        crate::io::export::write_registry_json(path, model.registry())?;
    }
    Ok(())
}

fn handle_map(args: MapArgs) -> Result<(), AppError> {
    let mut model = build_from_args(&args.model)?;
    let config = map_config_from_args(&args);
    let optimizer = optimizer_from_args(&args);

    let outcome = pipeline::run_map(&mut model, &optimizer, &config)?;
    println!("{}", crate::report::format_map_summary(&outcome));

    if let Some(path) = &args.export {
        crate::io::export::write_map_json(path, &outcome)?;
    }
    if let Some(path) = &args.export_csv {
        crate::io::export::write_registry_csv(path, model.registry())?;
    }
    Ok(())
}

fn handle_init(args: MapArgs) -> Result<(), AppError> {
    if args.export.is_some() {
        return Err(AppError::NotSupported(
            "--export writes MAP results; use --export-csv with init".to_string(),
        ));
    }
    let mut model = build_from_args(&args.model)?;
    let config = map_config_from_args(&args);
    let optimizer = optimizer_from_args(&args);

    let report = pipeline::run_init(&mut model, &optimizer, &config)?;
    println!("{}", crate::report::format_subj_init(&report, &model));

    if let Some(path) = &args.export_csv {
        crate::io::export::write_registry_csv(path, model.registry())?;
    }
    Ok(())
}

fn build_from_args(args: &ModelArgs) -> Result<crate::model::HierarchicalModel, AppError> {
    let data = pipeline::load_data(args.data.as_deref(), &sample_config_from_args(&args.sample))?;
    pipeline::build_model(data, model_config_from_args(args)?)
}

fn sample_config_from_args(args: &SampleArgs) -> SampleConfig {
    SampleConfig {
        n_subjects: args.subjects,
        trials_per_condition: args.trials,
        conditions: args.conditions.clone(),
        seed: args.sample_seed,
        ..SampleConfig::default()
    }
}

fn model_config_from_args(args: &ModelArgs) -> Result<ModelConfig, AppError> {
    let mut depends_on = DependsOn::new();
    for entry in &args.depends {
        depends_on.parse_entry(entry)?;
    }

    Ok(ModelConfig {
        is_group_model: match args.mode {
            ModeArg::Auto => None,
            ModeArg::Group => Some(true),
            ModeArg::Single => Some(false),
        },
        depends_on,
        include: args.include.iter().cloned().collect::<BTreeSet<_>>(),
        max_retries: args.max_retries,
        seed: args.seed,
    })
}

fn map_config_from_args(args: &MapArgs) -> MapConfig {
    MapConfig {
        runs: args.runs,
        warn_crit: args.warn_crit,
    }
}

fn optimizer_from_args(args: &MapArgs) -> NelderMead {
    NelderMead {
        max_iter: args.max_iter,
        ..NelderMead::default()
    }
}
