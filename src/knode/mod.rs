//! Parameter templates and their expansion into concrete nodes.

pub mod expand;
pub mod template;

pub use expand::{Expansion, InstanceMap, expand, node_name};
pub use template::{Arg, Knode, KnodeId, KnodeSet, resolve_depends};
