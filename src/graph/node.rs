//! Concrete nodes and the per-build node arena.
//!
//! Nodes are appended in template order, and every template's parents are
//! built before it, so arena order is a topological order. Evaluation relies
//! on that: deterministic values are refreshed front to back.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use nalgebra::DVector;
use rand::rngs::StdRng;

use crate::domain::Value;
use crate::error::AppError;
use crate::graph::dist::{Constructor, Density, Params, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// One argument of a node: another node or a constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Param {
    Node(NodeId),
    Const(f64),
}

/// Inputs as bound at construction: stochastic nodes take direct named
/// arguments, deterministic nodes a parents mapping plus constant kwargs.
#[derive(Debug, Clone)]
pub enum Inputs {
    Direct(BTreeMap<String, Param>),
    Parents {
        parents: BTreeMap<String, NodeId>,
        kwargs: BTreeMap<String, f64>,
    },
}

#[derive(Debug, Clone)]
pub enum NodeOp {
    Stochastic(Arc<dyn Density>),
    Deterministic(Arc<dyn Transform>),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub op: NodeOp,
    pub inputs: Inputs,
    pub value: Value,
    pub observed: bool,
}

impl Node {
    pub fn is_stochastic(&self) -> bool {
        matches!(self.op, NodeOp::Stochastic(_))
    }

    /// Free parameters are the non-observed stochastic nodes.
    pub fn is_free(&self) -> bool {
        self.is_stochastic() && !self.observed
    }

    pub fn parent_ids(&self) -> Vec<NodeId> {
        match &self.inputs {
            Inputs::Direct(args) => args
                .values()
                .filter_map(|p| match p {
                    Param::Node(id) => Some(*id),
                    Param::Const(_) => None,
                })
                .collect(),
            Inputs::Parents { parents, .. } => parents.values().copied().collect(),
        }
    }
}

/// Everything needed to create one node.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: String,
    pub constructor: Constructor,
    pub args: BTreeMap<String, Param>,
    /// Observed data; `None` for latent nodes.
    pub observed: Option<Vec<f64>>,
    /// Array length for array-shaped latent nodes.
    pub shape: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
    by_name: HashMap<String, NodeId>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Construct a node, draw its starting value and append it.
    ///
    /// A node whose starting log-probability is not finite is reported as
    /// `AppError::Degenerate`; argument problems are `AppError::Template`.
    pub fn create(&mut self, spec: NodeSpec, rng: &mut StdRng) -> Result<NodeId, AppError> {
        if self.by_name.contains_key(&spec.name) {
            return Err(AppError::template(
                &spec.name,
                "node name is not unique within the model",
            ));
        }

        let node = match &spec.constructor {
            Constructor::Stochastic(density) => self.create_stochastic(&spec, density, rng)?,
            Constructor::Deterministic(transform) => self.create_deterministic(&spec, transform)?,
        };

        let id = NodeId(self.nodes.len());
        self.by_name.insert(node.name.clone(), id);
        self.nodes.push(node);
        Ok(id)
    }

    fn create_stochastic(
        &self,
        spec: &NodeSpec,
        density: &Arc<dyn Density>,
        rng: &mut StdRng,
    ) -> Result<Node, AppError> {
        for role in density.roles() {
            if !spec.args.contains_key(*role) {
                return Err(AppError::template(
                    &spec.name,
                    format!("{} requires argument `{role}`", density.name()),
                ));
            }
        }
        let inputs = Inputs::Direct(spec.args.clone());
        let params = self.resolve(&inputs);

        let value = match (&spec.observed, spec.shape) {
            (Some(data), _) => Value::Array(data.clone()),
            (None, Some(n)) => Value::Array((0..n).map(|_| density.draw(&params, rng)).collect()),
            (None, None) => Value::Scalar(density.draw(&params, rng)),
        };

        let node = Node {
            name: spec.name.clone(),
            op: NodeOp::Stochastic(Arc::clone(density)),
            inputs,
            value,
            observed: spec.observed.is_some(),
        };

        let logp = self.node_logp_with(&node, &params);
        if !logp.is_finite() {
            return Err(AppError::degenerate(
                &spec.name,
                format!("starting log-probability is {logp}"),
            ));
        }
        Ok(node)
    }

    fn create_deterministic(
        &self,
        spec: &NodeSpec,
        transform: &Arc<dyn Transform>,
    ) -> Result<Node, AppError> {
        if spec.observed.is_some() {
            return Err(AppError::template(
                &spec.name,
                "deterministic nodes cannot be observed",
            ));
        }
        let mut parents = BTreeMap::new();
        let mut kwargs = BTreeMap::new();
        for (role, arg) in &spec.args {
            match arg {
                Param::Node(id) => {
                    parents.insert(role.clone(), *id);
                }
                Param::Const(v) => {
                    kwargs.insert(role.clone(), *v);
                }
            }
        }
        let value = self.compute(transform.as_ref(), &parents, &kwargs);
        let inputs = Inputs::Parents { parents, kwargs };
        if !value.is_finite() {
            return Err(AppError::degenerate(
                &spec.name,
                format!("deterministic value is {value}"),
            ));
        }
        Ok(Node {
            name: spec.name.clone(),
            op: NodeOp::Deterministic(Arc::clone(transform)),
            inputs,
            value: Value::Scalar(value),
            observed: false,
        })
    }

    fn param_value(&self, param: &Param) -> f64 {
        match param {
            Param::Node(id) => self.nodes[id.0].value.scalar(),
            Param::Const(v) => *v,
        }
    }

    /// Numeric value of every input, by role (kwargs included).
    fn resolve(&self, inputs: &Inputs) -> Params {
        match inputs {
            Inputs::Direct(args) => args
                .iter()
                .map(|(role, p)| (role.clone(), self.param_value(p)))
                .collect(),
            Inputs::Parents { parents, kwargs } => parents
                .iter()
                .map(|(role, id)| (role.clone(), self.nodes[id.0].value.scalar()))
                .chain(kwargs.iter().map(|(k, v)| (k.clone(), *v)))
                .collect(),
        }
    }

    fn compute(
        &self,
        transform: &dyn Transform,
        parents: &BTreeMap<String, NodeId>,
        kwargs: &Params,
    ) -> f64 {
        let values: Params = parents
            .iter()
            .map(|(role, id)| (role.clone(), self.nodes[id.0].value.scalar()))
            .collect();
        transform.compute(&values, kwargs)
    }

    fn node_logp_with(&self, node: &Node, params: &Params) -> f64 {
        match &node.op {
            NodeOp::Stochastic(density) => node
                .value
                .as_slice()
                .iter()
                .map(|&x| density.logp(x, params))
                .sum(),
            NodeOp::Deterministic(_) => 0.0,
        }
    }

    pub fn node_logp(&self, id: NodeId) -> f64 {
        let node = &self.nodes[id.0];
        self.node_logp_with(node, &self.resolve(&node.inputs))
    }

    /// Recompute deterministic values in arena order.
    pub fn refresh(&mut self) {
        for i in 0..self.nodes.len() {
            let node = &self.nodes[i];
            let (NodeOp::Deterministic(transform), Inputs::Parents { parents, kwargs }) =
                (&node.op, &node.inputs)
            else {
                continue;
            };
            let value = self.compute(transform.as_ref(), parents, kwargs);
            self.nodes[i].value = Value::Scalar(value);
        }
    }

    /// Joint log-probability of all stochastic nodes.
    pub fn logp(&mut self) -> f64 {
        self.refresh();
        (0..self.nodes.len()).map(|i| self.node_logp(NodeId(i))).sum()
    }

    pub fn free_nodes(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, n)| n.is_free())
            .map(|(id, _)| id)
            .collect()
    }

    /// Concatenate the values of `ids` into one vector.
    pub fn flatten(&self, ids: &[NodeId]) -> DVector<f64> {
        let values: Vec<f64> = ids
            .iter()
            .flat_map(|id| self.nodes[id.0].value.as_slice().iter().copied())
            .collect();
        DVector::from_vec(values)
    }

    /// Inverse of `flatten`: write `x` back element by element.
    pub fn unflatten(&mut self, ids: &[NodeId], x: &DVector<f64>) {
        let mut offset = 0;
        for id in ids {
            let slot = self.nodes[id.0].value.as_mut_slice();
            let n = slot.len();
            slot.copy_from_slice(&x.as_slice()[offset..offset + n]);
            offset += n;
        }
    }
}
