//! Command-line parsing for the `hier` binary.
//!
//! The goal of this module is to keep **argument parsing** separate from model
//! construction and fitting; `app` maps the parsed arguments onto the config
//! structs in `domain`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "hier",
    version,
    about = "Hierarchical model graphs from parameter templates and trial data"
)]
pub struct Cli {
    /// Log filter (e.g. `info`, `hiergraph=debug`); overrides HIERGRAPH_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a synthetic trial CSV (subjects x conditions x trials).
    Simulate(SimulateArgs),
    /// Build the model and print its node registry.
    Nodes(NodesArgs),
    /// Maximum a posteriori fit of a single-subject model.
    Map(MapArgs),
    /// Subject-by-subject initialization of a group model.
    Init(MapArgs),
}

/// Synthetic data settings, shared by `simulate` and by the other commands
/// when no `--data` file is given.
#[derive(Debug, Args, Clone)]
pub struct SampleArgs {
    /// Number of subjects.
    #[arg(long, default_value_t = 5)]
    pub subjects: usize,

    /// Trials per subject and condition.
    #[arg(long, default_value_t = 40)]
    pub trials: usize,

    /// Condition labels.
    #[arg(long, value_delimiter = ',', default_value = "A,B")]
    pub conditions: Vec<String>,

    /// Random seed for data generation.
    #[arg(long = "sample-seed", default_value_t = 42)]
    pub sample_seed: u64,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub sample: SampleArgs,

    /// Output CSV path.
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Group mode iff the data holds more than one subject.
    Auto,
    Group,
    Single,
}

/// Model construction options.
#[derive(Debug, Args, Clone)]
pub struct ModelArgs {
    /// Trial CSV; synthetic data is generated when omitted.
    #[arg(long, value_name = "CSV")]
    pub data: Option<PathBuf>,

    #[command(flatten)]
    pub sample: SampleArgs,

    /// Dependency declaration `PARAM=COL[,COL...]` (repeatable).
    #[arg(long = "depends", value_name = "PARAM=COLS")]
    pub depends: Vec<String>,

    /// Optional parameter to include (repeatable), e.g. `t`.
    #[arg(long = "include", value_name = "PARAM")]
    pub include: Vec<String>,

    #[arg(long, value_enum, default_value_t = ModeArg::Auto)]
    pub mode: ModeArg,

    /// Guarded build attempts before the final one.
    #[arg(long, default_value_t = 8)]
    pub max_retries: usize,

    /// Seed for starting values.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Debug, Args)]
pub struct NodesArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Export the registry to CSV.
    #[arg(long = "export-csv", value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Export the registry to JSON.
    #[arg(long = "export-json", value_name = "JSON")]
    pub export_json: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct MapArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// Optimizer runs, each from fresh starting values.
    #[arg(long, default_value_t = 2)]
    pub runs: usize,

    /// Log-probability gap between the two best runs that triggers a warning.
    #[arg(long, default_value_t = 5.0)]
    pub warn_crit: f64,

    /// Optimizer iteration cap (default: 200 x number of free values).
    #[arg(long)]
    pub max_iter: Option<usize>,

    /// Export the fitted values (JSON).
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,

    /// Export the registry after fitting (CSV).
    #[arg(long = "export-csv", value_name = "CSV")]
    pub export_csv: Option<PathBuf>,
}
