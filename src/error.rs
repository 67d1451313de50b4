//! Crate-wide error type.
//!
//! Every fallible operation returns `Result<_, AppError>`. The variants follow
//! the failure classes of model construction:
//!
//! - configuration errors (bad `depends_on`, group mode without `subj_idx`)
//! - data errors (CSV problems, empty tables, non-numeric observed columns)
//! - graph errors (degenerate starting values, parent lookup misses)
//! - usage errors (MAP on a group model)
//!
//! `exit_code()` maps each class onto the process exit status used by `main`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Column named `{column}` not found in data (required by `{param}`).")]
    MissingColumn { param: String, column: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("template `{knode}`: {message}")]
    Template { knode: String, message: String },

    /// The node could not be created with its current starting values.
    ///
    /// This is the only variant the builder retries.
    #[error("degenerate node `{node}`: {reason}")]
    Degenerate { node: String, reason: String },

    #[error(
        "template `{knode}` found no parent `{parent}` instance for key ({key}); \
         check the dependency declaration"
    )]
    ParentLookup {
        knode: String,
        parent: String,
        key: String,
    },

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("optimizer error: {0}")]
    Optimizer(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn template(knode: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Template {
            knode: knode.into(),
            message: message.into(),
        }
    }

    pub fn degenerate(node: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Degenerate {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Whether a fresh build with new starting values could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Degenerate { .. })
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::MissingColumn { .. }
            | AppError::Config(_)
            | AppError::NotSupported(_)
            | AppError::Io(_)
            | AppError::Json(_) => 2,
            AppError::Data(_) | AppError::Csv(_) => 3,
            AppError::Template { .. }
            | AppError::Degenerate { .. }
            | AppError::ParentLookup { .. }
            | AppError::Optimizer(_) => 4,
        }
    }
}
