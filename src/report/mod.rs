//! Reporting: formatted terminal output for registries, fits and stats.

pub mod format;

pub use format::*;
