//! Point estimation over a built model.
//!
//! Responsibilities:
//!
//! - run a local optimizer several times and keep the best run (`map`)
//! - the default derivative-free optimizer (`nelder_mead`)
//! - seed a group model from per-subject fits (`subj_init`)

pub mod map;
pub mod nelder_mead;
pub mod subj_init;

pub use map::{MapOutcome, MapResult, Optimizer, Selection, apply_values, map, select_best};
pub use nelder_mead::{Minimum, NelderMead};
pub use subj_init::{SubjInitReport, SubjectFit, subj_by_subj_map_init};
