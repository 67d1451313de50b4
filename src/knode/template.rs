//! Parameter templates ("knodes").
//!
//! A `Knode` declares one parameter family: how to construct its nodes, which
//! data columns split it into distinct instances, and which other templates
//! feed it. Templates never see data; `knode::expand` turns them into nodes.
//!
//! Templates live in a `KnodeSet` and refer to their parents by `KnodeId`.
//! A parent must be added before its children, so set order is a valid build
//! order.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{ColumnList, SUBJ_COL};
use crate::error::AppError;
use crate::graph::Constructor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KnodeId(pub usize);

/// One constructor argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
    Knode(KnodeId),
    Value(f64),
}

#[derive(Debug, Clone)]
pub struct Knode {
    name: String,
    constructor: Constructor,
    depends: Vec<String>,
    subj: bool,
    col_name: Option<String>,
    args: BTreeMap<String, Arg>,
    shape: Option<usize>,
    resolved: Vec<String>,
}

impl Knode {
    pub fn new(name: &str, constructor: Constructor) -> Self {
        Self {
            name: name.to_string(),
            constructor,
            depends: Vec::new(),
            subj: false,
            col_name: None,
            args: BTreeMap::new(),
            shape: None,
            resolved: Vec::new(),
        }
    }

    /// Own dependency columns (added to any already declared).
    pub fn depends(mut self, columns: impl Into<ColumnList>) -> Self {
        self.depends.extend(columns.into().0);
        self
    }

    /// One instance per subject (crossed with the other dependencies).
    pub fn subj(mut self, subj: bool) -> Self {
        self.subj = subj;
        self
    }

    /// Bind each instance's value to its rows of `column`.
    pub fn observed(mut self, column: &str) -> Self {
        self.col_name = Some(column.to_string());
        self
    }

    pub fn parent(mut self, role: &str, parent: KnodeId) -> Self {
        self.args.insert(role.to_string(), Arg::Knode(parent));
        self
    }

    /// Constant argument forwarded to every instance.
    pub fn value(mut self, role: &str, value: f64) -> Self {
        self.args.insert(role.to_string(), Arg::Value(value));
        self
    }

    /// Array-shaped latent value with `n` elements.
    pub fn shape(mut self, n: usize) -> Self {
        self.shape = Some(n);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constructor(&self) -> &Constructor {
        &self.constructor
    }

    pub fn own_depends(&self) -> &[String] {
        &self.depends
    }

    pub fn is_subj(&self) -> bool {
        self.subj
    }

    pub fn is_observed(&self) -> bool {
        self.col_name.is_some()
    }

    pub fn col_name(&self) -> Option<&str> {
        self.col_name.as_deref()
    }

    pub fn args(&self) -> &BTreeMap<String, Arg> {
        &self.args
    }

    pub fn shape_len(&self) -> Option<usize> {
        self.shape
    }

    /// Parent templates by role.
    pub fn parents(&self) -> impl Iterator<Item = (&str, KnodeId)> {
        self.args.iter().filter_map(|(role, arg)| match arg {
            Arg::Knode(id) => Some((role.as_str(), *id)),
            Arg::Value(_) => None,
        })
    }

    /// Sorted, de-duplicated dependency columns including inherited ones.
    ///
    /// Empty until the template is added to a `KnodeSet`.
    pub fn resolved_depends(&self) -> &[String] {
        &self.resolved
    }
}

/// `sorted(unique(own ∪ {subj_idx if subj} ∪ parents' resolved sets))`.
pub fn resolve_depends<'a>(
    own: &[String],
    subj: bool,
    parents: impl IntoIterator<Item = &'a [String]>,
) -> Vec<String> {
    let mut set: BTreeSet<String> = own.iter().cloned().collect();
    if subj {
        set.insert(SUBJ_COL.to_string());
    }
    for parent in parents {
        set.extend(parent.iter().cloned());
    }
    set.into_iter().collect()
}

/// Ordered collection of templates.
#[derive(Debug, Clone, Default)]
pub struct KnodeSet {
    knodes: Vec<Knode>,
}

impl KnodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template, resolving its dependency set against its parents.
    pub fn add(&mut self, mut knode: Knode) -> Result<KnodeId, AppError> {
        if self.by_name(&knode.name).is_some() {
            return Err(AppError::template(&knode.name, "duplicate template name"));
        }
        if knode.is_observed() && !knode.constructor.is_stochastic() {
            return Err(AppError::template(
                &knode.name,
                "only stochastic templates can be observed",
            ));
        }

        let mut parent_sets = Vec::new();
        for (role, id) in knode.parents() {
            let parent = self.knodes.get(id.0).ok_or_else(|| {
                AppError::template(
                    &knode.name,
                    format!("parent for `{role}` must be added before its children"),
                )
            })?;
            parent_sets.push(parent.resolved.as_slice());
        }
        knode.resolved = resolve_depends(&knode.depends, knode.subj, parent_sets);

        let id = KnodeId(self.knodes.len());
        self.knodes.push(knode);
        Ok(id)
    }

    pub fn get(&self, id: KnodeId) -> &Knode {
        &self.knodes[id.0]
    }

    pub fn by_name(&self, name: &str) -> Option<KnodeId> {
        self.knodes
            .iter()
            .position(|k| k.name == name)
            .map(KnodeId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (KnodeId, &Knode)> {
        self.knodes.iter().enumerate().map(|(i, k)| (KnodeId(i), k))
    }

    pub fn len(&self) -> usize {
        self.knodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.knodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resolved_set_is_sorted_union() {
        let parent_a = cols(&["stim"]);
        let parent_b = cols(&["cond", "stim"]);
        let resolved = resolve_depends(
            &cols(&["cond", "block"]),
            true,
            [parent_a.as_slice(), parent_b.as_slice()],
        );
        assert_eq!(resolved, cols(&["block", "cond", "stim", "subj_idx"]));
    }

    #[test]
    fn resolved_set_ignores_declaration_order() {
        let p1 = cols(&["x"]);
        let p2 = cols(&["y", "subj_idx"]);
        let a = resolve_depends(&cols(&["c", "a", "b"]), true, [p1.as_slice(), p2.as_slice()]);
        let b = resolve_depends(&cols(&["b", "c", "a", "a"]), true, [p2.as_slice(), p1.as_slice()]);
        assert_eq!(a, b);
    }

    #[test]
    fn child_inherits_parent_dependencies() {
        let mut set = KnodeSet::new();
        let v = set
            .add(
                Knode::new("v", Constructor::uniform())
                    .depends("cond")
                    .value("lower", 0.0)
                    .value("upper", 1.0),
            )
            .unwrap();
        let v_subj = set
            .add(
                Knode::new("v_subj", Constructor::normal())
                    .parent("mu", v)
                    .value("sigma", 0.1)
                    .subj(true),
            )
            .unwrap();

        assert_eq!(set.get(v).resolved_depends(), &cols(&["cond"])[..]);
        assert_eq!(
            set.get(v_subj).resolved_depends(),
            &cols(&["cond", "subj_idx"])[..]
        );
        assert_eq!(set.get(v_subj).parents().collect::<Vec<_>>(), vec![("mu", v)]);
        assert_eq!(set.by_name("v_subj"), Some(v_subj));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut set = KnodeSet::new();
        let err = set
            .add(Knode::new("x", Constructor::normal()).parent("mu", KnodeId(3)))
            .unwrap_err();
        assert!(matches!(err, AppError::Template { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut set = KnodeSet::new();
        set.add(Knode::new("v", Constructor::uniform())).unwrap();
        assert!(set.add(Knode::new("v", Constructor::uniform())).is_err());
    }

    #[test]
    fn observed_deterministic_is_rejected() {
        let mut set = KnodeSet::new();
        assert!(set.add(Knode::new("s", Constructor::sum()).observed("rt")).is_err());
    }
}
