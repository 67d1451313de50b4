//! Subject-by-subject initialization of a group model.
//!
//! Each subject's rows are fitted on their own with a flat single-subject
//! model (MAP). The fitted group-level values then seed the hierarchical
//! model:
//!
//! - parameters with subject nodes: each subject node gets that subject's
//!   estimate; the group node gets the mean over subjects and the variability
//!   node gets the parameter's `var_func` of the same values
//! - parameters without subject nodes: the group node gets the mean of the
//!   per-subject estimates
//!
//! Subjects are fitted in parallel; merging happens afterwards in ascending
//! subject order.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{GroupKey, KeyValue, MapConfig, SUBJ_COL, Value};
use crate::error::AppError;
use crate::fit::map::{Optimizer, map};
use crate::graph::{NodeArena, NodeId};
use crate::knode::InstanceMap;
use crate::model::{HierarchicalModel, ParamLayout};
use crate::registry::stats::mean;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectFit {
    pub subj: i64,
    pub logp: f64,
    pub diverged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjInitReport {
    pub fits: Vec<SubjectFit>,
    /// Number of hierarchical nodes whose value was set.
    pub updated: usize,
}

/// Fitted value of one group-template node of a single-subject model.
#[derive(Debug, Clone)]
struct Harvest {
    param: String,
    /// Resolved columns of the group template and this node's key.
    cols: Vec<String>,
    key: GroupKey,
    value: Value,
}

pub fn subj_by_subj_map_init(
    model: &mut HierarchicalModel,
    optimizer: &dyn Optimizer,
    config: &MapConfig,
) -> Result<SubjInitReport, AppError> {
    if !model.is_group_model() {
        return Err(AppError::NotSupported(
            "subject-by-subject initialization needs a group model".to_string(),
        ));
    }
    model.create_model()?;

    let shared: &HierarchicalModel = model;
    let fitted: Vec<(SubjectFit, Vec<Harvest>)> = shared
        .subjects()
        .par_iter()
        .map(|&subj| fit_subject(shared, subj, optimizer, config))
        .collect::<Result<_, _>>()?;

    let params = model.params().to_vec();
    let mut subj_values: Vec<(NodeId, Value)> = Vec::new();
    let mut subjless: BTreeMap<NodeId, Vec<f64>> = BTreeMap::new();
    for (fit, harvest) in &fitted {
        for h in harvest {
            let Some(layout) = params.iter().find(|p| p.name == h.param) else {
                continue;
            };
            match &layout.subj {
                Some(subj_name) => {
                    let node = subject_node(model, subj_name, fit.subj, h)?;
                    subj_values.push((node, h.value.clone()));
                }
                None => {
                    let group = instances_of(model, &layout.group)?;
                    let node = group.get_node(&h.cols, &h.key).ok_or_else(|| {
                        AppError::template(&layout.group, "no group node for fitted key")
                    })?;
                    subjless.entry(node).or_default().push(h.value.scalar());
                }
            }
        }
    }

    let mut updated = 0;
    {
        let arena = &mut model.graph_mut().arena;
        for (node, value) in &subj_values {
            arena.get_mut(*node).value = value.clone();
            updated += 1;
        }
        for (node, values) in &subjless {
            set_scalar(arena, *node, mean(values));
            updated += 1;
        }
    }

    let mut aggregates: Vec<(NodeId, f64)> = Vec::new();
    for layout in params.iter().filter(|p| p.has_subj_nodes()) {
        aggregates.extend(aggregate(model, layout)?);
    }
    let arena = &mut model.graph_mut().arena;
    for (node, value) in &aggregates {
        set_scalar(arena, *node, *value);
        updated += 1;
    }
    arena.refresh();

    info!(subjects = fitted.len(), updated, "subject-by-subject initialization done");
    Ok(SubjInitReport {
        fits: fitted.into_iter().map(|(fit, _)| fit).collect(),
        updated,
    })
}

fn fit_subject(
    model: &HierarchicalModel,
    subj: i64,
    optimizer: &dyn Optimizer,
    config: &MapConfig,
) -> Result<(SubjectFit, Vec<Harvest>), AppError> {
    let mut single = model.single_subject(subj)?;
    let outcome = map(&mut single, optimizer, config)?;
    debug!(subj, logp = outcome.best.logp, "subject fitted");

    let mut harvest = Vec::new();
    for layout in single.params() {
        let instances = instances_of(&single, &layout.group)?;
        for (key, node) in instances.iter() {
            harvest.push(Harvest {
                param: layout.name.clone(),
                cols: instances.columns().to_vec(),
                key: key.clone(),
                value: single.graph().arena.get(node).value.clone(),
            });
        }
    }
    Ok((
        SubjectFit {
            subj,
            logp: outcome.best.logp,
            diverged: outcome.diverged,
        },
        harvest,
    ))
}

fn instances_of<'a>(model: &'a HierarchicalModel, knode: &str) -> Result<&'a InstanceMap, AppError> {
    model
        .knodes()
        .by_name(knode)
        .and_then(|id| model.graph().instances.get(id.0))
        .ok_or_else(|| AppError::template(knode, "template is not part of the model"))
}

/// The subject node of `subj_name` matching a harvested key for `subj`.
fn subject_node(
    model: &HierarchicalModel,
    subj_name: &str,
    subj: i64,
    harvest: &Harvest,
) -> Result<NodeId, AppError> {
    let instances = instances_of(model, subj_name)?;
    let key = instances
        .columns()
        .iter()
        .map(|col| {
            if col == SUBJ_COL {
                return Ok(KeyValue::Int(subj));
            }
            harvest
                .cols
                .iter()
                .position(|c| c == col)
                .map(|i| harvest.key[i].clone())
                .ok_or_else(|| {
                    AppError::template(subj_name, format!("fitted values carry no `{col}` key"))
                })
        })
        .collect::<Result<GroupKey, _>>()?;
    instances.get(&key).ok_or_else(|| AppError::ParentLookup {
        knode: harvest.param.clone(),
        parent: subj_name.to_string(),
        key: crate::domain::join_key(&key),
    })
}

/// Group and variability values computed from the current subject nodes.
///
/// A variability node shared by several group nodes gets the mean of their
/// per-group spreads.
fn aggregate(model: &HierarchicalModel, layout: &ParamLayout) -> Result<Vec<(NodeId, f64)>, AppError> {
    let Some(subj_name) = &layout.subj else {
        return Ok(Vec::new());
    };
    let subj = instances_of(model, subj_name)?;
    let group = instances_of(model, &layout.group)?;
    let var = layout
        .var
        .as_deref()
        .map(|name| instances_of(model, name))
        .transpose()?;
    let arena = &model.graph().arena;

    let mut per_group: BTreeMap<NodeId, (Vec<f64>, Option<NodeId>)> = BTreeMap::new();
    for (key, node) in subj.iter() {
        let group_node = group.get_node(subj.columns(), key).ok_or_else(|| {
            AppError::template(&layout.group, "no group node for subject key")
        })?;
        let var_node = var.and_then(|v| v.get_node(subj.columns(), key));
        let entry = per_group.entry(group_node).or_insert_with(|| (Vec::new(), var_node));
        entry.0.push(arena.get(node).value.scalar());
    }

    let mut out = Vec::new();
    let mut spreads: BTreeMap<NodeId, Vec<f64>> = BTreeMap::new();
    for (group_node, (values, var_node)) in per_group {
        out.push((group_node, mean(&values)));
        if let Some(var_node) = var_node {
            spreads.entry(var_node).or_default().push((layout.var_func)(&values));
        }
    }
    out.extend(spreads.into_iter().map(|(node, s)| (node, mean(&s))));
    Ok(out)
}

fn set_scalar(arena: &mut NodeArena, node: NodeId, value: f64) {
    for slot in arena.get_mut(node).value.as_mut_slice() {
        *slot = value;
    }
}
