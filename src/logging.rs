//! Tracing subscriber setup.
//!
//! The filter is taken from, in order: the explicit `--log-level` flag, the
//! `HIERGRAPH_LOG` environment variable (a `.env` file is honored), `warn`.

use tracing_subscriber::EnvFilter;

use crate::error::AppError;

pub const LOG_ENV: &str = "HIERGRAPH_LOG";

pub fn init(level: Option<&str>) -> Result<(), AppError> {
    let _ = dotenvy::dotenv();

    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|e| AppError::Config(format!("invalid log level `{level}`: {e}")))?,
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| AppError::Config(format!("logger already initialized: {e}")))
}
