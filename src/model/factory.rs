//! Model factory seam.
//!
//! A factory turns the dependency configuration into a template set. The
//! builder asks for the hierarchical set in group mode and for the flat
//! single-subject set otherwise; `ParamLayout` tells the subject initializer
//! which templates play the group / variance / subject roles.

use std::collections::BTreeSet;
use std::fmt;

use crate::domain::DependsOn;
use crate::error::AppError;
use crate::knode::KnodeSet;

/// Aggregate applied to per-subject estimates to seed a variance node.
pub type VarFunc = fn(&[f64]) -> f64;

/// Inputs a factory may read.
#[derive(Debug, Clone, Copy)]
pub struct FactoryContext<'a> {
    pub depends_on: &'a DependsOn,
    pub include: &'a BTreeSet<String>,
}

/// Template names making up one model parameter.
#[derive(Clone)]
pub struct ParamLayout {
    pub name: String,
    /// Group-level template (present in both modes).
    pub group: String,
    /// Between-subject variability template (group mode only).
    pub var: Option<String>,
    /// Per-subject template (group mode only).
    pub subj: Option<String>,
    pub var_func: VarFunc,
}

impl fmt::Debug for ParamLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamLayout")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("var", &self.var)
            .field("subj", &self.subj)
            .finish_non_exhaustive()
    }
}

impl ParamLayout {
    pub fn has_subj_nodes(&self) -> bool {
        self.subj.is_some()
    }
}

/// Templates plus their parameter layout.
#[derive(Debug, Clone)]
pub struct Templates {
    pub knodes: KnodeSet,
    pub params: Vec<ParamLayout>,
}

pub trait ModelFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hierarchical templates: group, variability and subject nodes.
    fn create_knodes(&self, ctx: &FactoryContext<'_>) -> Result<Templates, AppError>;

    /// Flat templates for a model fitted to one subject.
    fn create_knodes_single_subj(&self, ctx: &FactoryContext<'_>) -> Result<Templates, AppError>;
}
