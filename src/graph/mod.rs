//! Concrete model graph: constructors, nodes, and the node arena.

pub mod dist;
pub mod node;

pub use dist::{Constructor, Density, Params, Transform};
pub use node::{Inputs, Node, NodeArena, NodeId, NodeOp, NodeSpec, Param};
