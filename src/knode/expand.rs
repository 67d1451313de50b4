//! Expansion engine: template + data → concrete nodes.
//!
//! For one template:
//!
//! 1. partition the rows by the template's resolved dependency columns (one
//!    group with an empty key when there are none)
//! 2. for every group, bind each parent role to the parent instance whose key
//!    equals this group's values on the overlapping columns
//! 3. bind observed values, name the node, construct it, and record it in the
//!    template's instance map and registry fragment
//!
//! The overlap is taken in the *child's* column order. Parent keys are stored
//! in the parent's resolved order; both are sorted, so the restricted key
//! lines up with the stored key.

use std::collections::BTreeMap;

use rand::rngs::StdRng;

use crate::data::TrialData;
use crate::domain::{GroupKey, KeyValue, SUBJ_COL, join_key};
use crate::error::AppError;
use crate::graph::{NodeArena, NodeId, NodeSpec, Param};
use crate::knode::template::{Arg, Knode, KnodeSet};
use crate::registry::{NodeRegistry, RegistryRow};

/// Concrete nodes of one template, keyed by group key.
#[derive(Debug, Clone, Default)]
pub struct InstanceMap {
    columns: Vec<String>,
    nodes: BTreeMap<GroupKey, NodeId>,
}

impl InstanceMap {
    pub fn new(columns: &[String]) -> Self {
        Self {
            columns: columns.to_vec(),
            nodes: BTreeMap::new(),
        }
    }

    /// Resolved dependency columns the keys are ordered by.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, key: &[KeyValue]) -> Option<NodeId> {
        self.nodes.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, NodeId)> {
        self.nodes.iter().map(|(k, id)| (k, *id))
    }

    fn insert(&mut self, key: GroupKey, node: NodeId) {
        self.nodes.insert(key, node);
    }

    /// Instance matching a (finer) caller key on the shared columns.
    ///
    /// `cols`/`key` describe the caller; the lookup key is the caller's values
    /// for the columns this map also depends on, in the caller's order.
    pub fn get_node(&self, cols: &[String], key: &[KeyValue]) -> Option<NodeId> {
        let restricted = restrict_key(key, &overlap(cols, &self.columns));
        self.get(&restricted)
    }
}

/// Positions (in `child` order) of the columns also present in `parent`.
pub fn overlap(child: &[String], parent: &[String]) -> Vec<usize> {
    child
        .iter()
        .enumerate()
        .filter(|(_, c)| parent.contains(c))
        .map(|(i, _)| i)
        .collect()
}

fn restrict_key(key: &[KeyValue], positions: &[usize]) -> GroupKey {
    positions.iter().map(|&i| key[i].clone()).collect()
}

/// `"{name}({non-subject values})"`, plus `.{subj_idx}` for subject nodes.
pub fn node_name(knode: &str, cols: &[String], key: &[KeyValue]) -> String {
    let subj_pos = cols.iter().position(|c| c == SUBJ_COL);
    let elems: Vec<KeyValue> = key
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != subj_pos)
        .map(|(_, v)| v.clone())
        .collect();
    match subj_pos {
        Some(pos) => format!("{knode}({}).{}", join_key(&elems), key[pos]),
        None => format!("{knode}({})", join_key(&elems)),
    }
}

/// Output of expanding one template.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub instances: InstanceMap,
    pub registry: NodeRegistry,
}

/// Expand `knode` against `data`.
///
/// `built` holds the instance maps of every template before `knode` in the
/// set, indexed by `KnodeId`.
pub fn expand(
    knode: &Knode,
    set: &KnodeSet,
    data: &TrialData,
    built: &[InstanceMap],
    arena: &mut NodeArena,
    rng: &mut StdRng,
) -> Result<Expansion, AppError> {
    let cols = knode.resolved_depends();

    let groups: Vec<(GroupKey, Vec<usize>)> = if cols.is_empty() {
        vec![(Vec::new(), (0..data.n_rows()).collect())]
    } else {
        data.group_by(cols)?.into_iter().collect()
    };

    // Overlap positions depend only on the two templates, not on the group.
    let mut parent_slots = Vec::new();
    for (role, id) in knode.parents() {
        let instances = built.get(id.0).ok_or_else(|| {
            AppError::template(
                knode.name(),
                format!("parent `{}` has not been built", set.get(id).name()),
            )
        })?;
        parent_slots.push((role, id, overlap(cols, instances.columns())));
    }

    let mut instances = InstanceMap::new(cols);
    let mut registry = NodeRegistry::new(data.column_names());

    for (key, rows) in groups {
        let mut args = BTreeMap::new();
        for (role, value) in knode.args() {
            if let Arg::Value(v) = value {
                args.insert(role.clone(), Param::Const(*v));
            }
        }
        for (role, id, positions) in &parent_slots {
            let restricted = restrict_key(&key, positions);
            let parent = built[id.0].get(&restricted).ok_or_else(|| AppError::ParentLookup {
                knode: knode.name().to_string(),
                parent: set.get(*id).name().to_string(),
                key: join_key(&restricted),
            })?;
            args.insert(role.to_string(), Param::Node(parent));
        }

        let observed = match knode.col_name() {
            Some(col) => Some(data.numeric_values(col, &rows).map_err(|e| {
                AppError::template(knode.name(), format!("cannot bind observed values: {e}"))
            })?),
            None => None,
        };

        let name = node_name(knode.name(), cols, &key);
        let node = arena.create(
            NodeSpec {
                name: name.clone(),
                constructor: knode.constructor().clone(),
                args,
                observed,
                shape: knode.shape_len(),
            },
            rng,
        )?;

        let keys = cols.iter().cloned().zip(key.iter().cloned()).collect();
        registry.push(RegistryRow {
            node_name: name,
            knode_name: knode.name().to_string(),
            stochastic: knode.constructor().is_stochastic(),
            observed: knode.is_observed(),
            subj: knode.is_subj(),
            node,
            keys,
            stats: None,
        })?;
        instances.insert(key, node);
    }

    Ok(Expansion {
        instances,
        registry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Column;
    use crate::graph::Constructor;
    use crate::knode::template::KnodeId;
    use rand::SeedableRng;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn data() -> TrialData {
        TrialData::new()
            .with_column("rt", Column::Float(vec![0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 0.55, 0.65]))
            .unwrap()
            .with_column("response", Column::Int(vec![1, 0, 1, 1, 0, 1, 1, 1]))
            .unwrap()
            .with_column("subj_idx", Column::Int(vec![1, 1, 1, 1, 2, 2, 2, 2]))
            .unwrap()
            .with_column(
                "cond",
                Column::Text(["A", "B", "A", "B", "A", "B", "A", "B"].map(String::from).to_vec()),
            )
            .unwrap()
    }

    fn expand_all(set: &KnodeSet, data: &TrialData) -> Result<(NodeArena, Vec<Expansion>), AppError> {
        let mut rng = StdRng::seed_from_u64(11);
        let mut arena = NodeArena::new();
        let mut built = Vec::new();
        let mut out = Vec::new();
        for (_, knode) in set.iter() {
            let exp = expand(knode, set, data, &built, &mut arena, &mut rng)?;
            built.push(exp.instances.clone());
            out.push(exp);
        }
        Ok((arena, out))
    }

    fn uniform(name: &str) -> Knode {
        Knode::new(name, Constructor::uniform())
            .value("lower", 0.0)
            .value("upper", 2.0)
    }

    #[test]
    fn overlap_follows_child_order() {
        let child = s(&["cond", "stim", "subj_idx"]);
        assert_eq!(overlap(&child, &s(&["subj_idx", "cond"])), vec![0, 2]);
        assert_eq!(overlap(&child, &s(&[])), Vec::<usize>::new());
        assert_eq!(overlap(&s(&["c", "b", "a"]), &s(&["b", "c"])), vec![0, 1]);
    }

    #[test]
    fn node_names_put_subject_last() {
        let cols = s(&["cond", "subj_idx"]);
        let key = vec![KeyValue::from("A"), KeyValue::Int(2)];
        assert_eq!(node_name("v", &cols, &key), "v(A).2");
        assert_eq!(node_name("a", &[], &[]), "a()");
        let cols = s(&["cond", "stim"]);
        let key = vec![KeyValue::from("A"), KeyValue::from("hi")];
        assert_eq!(node_name("v", &cols, &key), "v(A.hi)");
    }

    #[test]
    fn empty_dependencies_make_one_node() {
        let mut set = KnodeSet::new();
        set.add(uniform("a")).unwrap();
        let (arena, exps) = expand_all(&set, &data()).unwrap();
        assert_eq!(arena.len(), 1);
        assert_eq!(exps[0].instances.len(), 1);
        assert!(exps[0].instances.get(&[]).is_some());
        assert!(exps[0].registry.get("a()").is_some());
    }

    #[test]
    fn per_subject_condition_template_names() {
        let mut set = KnodeSet::new();
        set.add(uniform("v").depends("cond").subj(true)).unwrap();
        let (_, exps) = expand_all(&set, &data()).unwrap();

        let mut names: Vec<&str> = exps[0]
            .registry
            .rows()
            .iter()
            .map(|r| r.node_name.as_str())
            .collect();
        names.sort();
        assert_eq!(names, vec!["v(A).1", "v(A).2", "v(B).1", "v(B).2"]);
        assert_eq!(exps[0].instances.columns(), &s(&["cond", "subj_idx"])[..]);
    }

    #[test]
    fn observed_groups_cover_all_rows() {
        let mut set = KnodeSet::new();
        let v = set.add(uniform("v").depends("cond")).unwrap();
        set.add(
            Knode::new("like", Constructor::normal())
                .parent("mu", v)
                .value("sigma", 1.0)
                .subj(true)
                .observed("rt"),
        )
        .unwrap();
        let d = data();
        let (arena, exps) = expand_all(&set, &d).unwrap();

        let like = &exps[1];
        assert_eq!(like.instances.len(), 4);
        let total: usize = like
            .instances
            .iter()
            .map(|(_, id)| arena.get(id).value.len())
            .sum();
        assert_eq!(total, d.n_rows());
        assert!(like.registry.rows().iter().all(|r| r.observed));
    }

    #[test]
    fn children_share_coarser_parent_instance() {
        let mut set = KnodeSet::new();
        let v = set.add(uniform("v").depends("cond")).unwrap();
        let child = set
            .add(
                Knode::new("v_subj", Constructor::normal())
                    .parent("mu", v)
                    .value("sigma", 0.5)
                    .subj(true),
            )
            .unwrap();
        let (arena, exps) = expand_all(&set, &data()).unwrap();

        let parent_of = |name: &str| {
            let id = arena.id_of(name).unwrap();
            arena.get(id).parent_ids()[0]
        };
        assert_eq!(parent_of("v_subj(A).1"), parent_of("v_subj(A).2"));
        assert_ne!(parent_of("v_subj(A).1"), parent_of("v_subj(B).1"));
        assert_eq!(
            parent_of("v_subj(B).2"),
            exps[v.0].instances.get(&[KeyValue::from("B")]).unwrap()
        );

        // The parent map answers the child's finer key directly.
        let cols = set.get(child).resolved_depends();
        let key = vec![KeyValue::from("A"), KeyValue::Int(2)];
        assert_eq!(
            exps[v.0].instances.get_node(cols, &key),
            Some(parent_of("v_subj(A).2"))
        );
    }

    #[test]
    fn missing_parent_instance_is_fatal() {
        // Build the parent on a table that lacks condition B, then expand the
        // child on the full table.
        let full = data();
        let only_a = full.filter_eq("cond", &KeyValue::from("A")).unwrap();

        let mut set = KnodeSet::new();
        let v = set.add(uniform("v").depends("cond")).unwrap();
        set.add(
            Knode::new("v_subj", Constructor::normal())
                .parent("mu", v)
                .value("sigma", 0.5)
                .subj(true),
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        let mut arena = NodeArena::new();
        let parent = expand(set.get(v), &set, &only_a, &[], &mut arena, &mut rng).unwrap();
        let err = expand(
            set.get(KnodeId(1)),
            &set,
            &full,
            &[parent.instances],
            &mut arena,
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::ParentLookup { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn text_observed_column_is_rejected() {
        let mut set = KnodeSet::new();
        set.add(
            Knode::new("like", Constructor::normal())
                .value("mu", 0.0)
                .value("sigma", 1.0)
                .observed("cond"),
        )
        .unwrap();
        let err = expand_all(&set, &data()).unwrap_err();
        assert!(matches!(err, AppError::Template { .. }));
    }
}
