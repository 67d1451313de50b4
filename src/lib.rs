//! `hiergraph` library crate.
//!
//! Builds hierarchical probabilistic model graphs from parameter templates
//! and a trial table, and fits them by maximum a posteriori estimation.
//!
//! The binary (`hier`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - models are reusable from other front ends

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod graph;
pub mod io;
pub mod knode;
pub mod logging;
pub mod model;
pub mod registry;
pub mod report;
