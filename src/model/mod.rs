//! Model construction: factories produce templates, the builder expands them.

pub mod builder;
pub mod factory;
pub mod rt;

pub use builder::{BuildOutcome, HierarchicalModel, ModelGraph, build_graph, run_with_retries};
pub use factory::{FactoryContext, ModelFactory, ParamLayout, Templates, VarFunc};
pub use rt::RtModel;
