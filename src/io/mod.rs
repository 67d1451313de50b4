//! Input/output helpers.
//!
//! - CSV ingest of trial data (`ingest`)
//! - registry, MAP and trial exports (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
