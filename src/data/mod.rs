//! Trial data: the columnar table and a synthetic generator.

pub mod sample;
pub mod table;

pub use sample::generate_trials;
pub use table::{Column, TrialData};
