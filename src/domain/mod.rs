//! Domain types used throughout the crate.
//!
//! This module defines:
//!
//! - group-key values (`KeyValue`, `GroupKey`)
//! - node values (`Value`)
//! - dependency declarations (`DependsOn`)
//! - run configuration (`ModelConfig`, `MapConfig`, `SampleConfig`)

pub mod types;

pub use types::*;
