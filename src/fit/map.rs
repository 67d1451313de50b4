//! Maximum a posteriori point estimation.
//!
//! `map` runs a local optimizer several times, each run after the first from a
//! freshly rebuilt graph (new random starting values), keeps the run with the
//! highest log-probability and writes its values back onto the model's
//! current nodes.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{MapConfig, Value};
use crate::error::AppError;
use crate::graph::NodeArena;
use crate::model::HierarchicalModel;

/// One optimizer run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapResult {
    pub logp: f64,
    /// Fitted value of every free node, by node name.
    pub values: BTreeMap<String, Value>,
    pub iterations: usize,
    pub converged: bool,
}

/// Local optimizer over the free nodes of an arena.
///
/// Implementations leave the arena at the optimum they report.
pub trait Optimizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn optimize(&self, arena: &mut NodeArena) -> Result<MapResult, AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub best_idx: usize,
    /// Distance between the two best runs (`None` with a single run).
    pub gap: Option<f64>,
    pub diverged: bool,
}

/// Pick the run with the highest log-probability.
///
/// Runs are sorted ascending (stable) and the last one wins, so among equal
/// values the later run is chosen.
pub fn select_best(logps: &[f64], warn_crit: f64) -> Option<Selection> {
    let mut order: Vec<usize> = (0..logps.len()).collect();
    order.sort_by(|&a, &b| logps[a].total_cmp(&logps[b]));

    let best_idx = *order.last()?;
    let gap = (order.len() >= 2).then(|| (logps[best_idx] - logps[order[order.len() - 2]]).abs());
    Some(Selection {
        best_idx,
        gap,
        diverged: gap.is_some_and(|g| g > warn_crit),
    })
}

#[derive(Debug, Clone)]
pub struct MapOutcome {
    pub best: MapResult,
    /// Log-probability of every run, in run order.
    pub logps: Vec<f64>,
    pub gap: Option<f64>,
    pub diverged: bool,
}

pub fn map(
    model: &mut HierarchicalModel,
    optimizer: &dyn Optimizer,
    config: &MapConfig,
) -> Result<MapOutcome, AppError> {
    if model.is_group_model() {
        return Err(AppError::NotSupported(
            "MAP is not available for group models; use subject-by-subject \
             initialization instead"
                .to_string(),
        ));
    }
    if config.runs == 0 {
        return Err(AppError::Config("MAP needs at least one run.".to_string()));
    }

    let mut results = Vec::with_capacity(config.runs);
    for run in 0..config.runs {
        if run != 0 {
            model.create_model()?;
        }
        let result = optimizer.optimize(&mut model.graph_mut().arena)?;
        info!(
            run,
            optimizer = optimizer.name(),
            logp = result.logp,
            iterations = result.iterations,
            "MAP run finished"
        );
        results.push(result);
    }

    let logps: Vec<f64> = results.iter().map(|r| r.logp).collect();
    let selection = select_best(&logps, config.warn_crit)
        .ok_or_else(|| AppError::Optimizer("no MAP run produced a result".to_string()))?;
    if let Some(gap) = selection.gap.filter(|_| selection.diverged) {
        warn!(
            gap,
            warn_crit = config.warn_crit,
            "two best MAP estimates are {gap:.3} apart; consider more runs to avoid local optima"
        );
    }

    let best = results.swap_remove(selection.best_idx);
    apply_values(&mut model.graph_mut().arena, &best.values)?;

    Ok(MapOutcome {
        best,
        logps,
        gap: selection.gap,
        diverged: selection.diverged,
    })
}

/// Copy fitted values onto the arena's nodes of the same name.
///
/// Observed nodes are never overwritten; array values are copied per index.
pub fn apply_values(arena: &mut NodeArena, values: &BTreeMap<String, Value>) -> Result<(), AppError> {
    for (name, value) in values {
        let id = arena.id_of(name).ok_or_else(|| {
            AppError::Optimizer(format!("fitted node `{name}` does not exist in the model"))
        })?;
        let node = arena.get_mut(id);
        if node.observed {
            continue;
        }
        let slot = node.value.as_mut_slice();
        if slot.len() != value.len() {
            return Err(AppError::Optimizer(format!(
                "fitted node `{name}` has {} values, model node has {}",
                value.len(),
                slot.len()
            )));
        }
        for (dst, src) in slot.iter_mut().zip(value.as_slice()) {
            *dst = *src;
        }
    }
    arena.refresh();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data::{Column, TrialData};
    use crate::domain::{DependsOn, ModelConfig};
    use crate::fit::NelderMead;
    use crate::model::RtModel;

    #[test]
    fn best_of_three_without_warning() {
        let sel = select_best(&[-50.0, -42.0, -41.0], 5.0).unwrap();
        assert_eq!(sel.best_idx, 2);
        assert_eq!(sel.gap, Some(1.0));
        assert!(!sel.diverged);
    }

    #[test]
    fn wide_gap_warns() {
        let sel = select_best(&[-50.0, -41.0, -49.0], 5.0).unwrap();
        assert_eq!(sel.best_idx, 1);
        assert_eq!(sel.gap, Some(8.0));
        assert!(sel.diverged);
    }

    #[test]
    fn ties_go_to_the_later_run() {
        let sel = select_best(&[-3.0, -1.0, -1.0], 5.0).unwrap();
        assert_eq!(sel.best_idx, 2);
    }

    #[test]
    fn single_run_has_no_gap() {
        let sel = select_best(&[-7.0], 5.0).unwrap();
        assert_eq!(sel.gap, None);
        assert!(!sel.diverged);
        assert!(select_best(&[], 5.0).is_none());
    }

    fn single_subject() -> HierarchicalModel {
        let rt = vec![0.5, 0.7, 0.6, 1.1, 1.3, 1.2];
        let cond: Vec<String> = ["A", "A", "A", "B", "B", "B"].map(String::from).to_vec();
        let data = TrialData::new()
            .with_column("rt", Column::Float(rt))
            .unwrap()
            .with_column("cond", Column::Text(cond))
            .unwrap();
        HierarchicalModel::new(
            Arc::new(RtModel),
            Arc::new(data),
            ModelConfig {
                depends_on: DependsOn::new().with("v", "cond"),
                ..ModelConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn map_recovers_condition_means() {
        let mut model = single_subject();
        let nm = NelderMead {
            xatol: 1e-6,
            fatol: 1e-8,
            ..NelderMead::default()
        };
        let outcome = map(&mut model, &nm, &MapConfig::default()).unwrap();

        assert_eq!(outcome.logps.len(), 2);
        let value = |name: &str| {
            let id = model.registry().get(name).unwrap().node;
            model.graph().arena.get(id).value.scalar()
        };
        assert!((value("v(A)") - 0.6).abs() < 1e-2);
        assert!((value("v(B)") - 1.2).abs() < 1e-2);
        assert_eq!(outcome.best.values["v(A)"].scalar(), value("v(A)"));
        assert!((model.logp() - outcome.best.logp).abs() < 1e-9);
    }

    #[test]
    fn map_keeps_observed_values() {
        let mut model = single_subject();
        map(&mut model, &NelderMead::default(), &MapConfig::default()).unwrap();
        let id = model.registry().get("rt(A)").unwrap().node;
        assert_eq!(
            model.graph().arena.get(id).value,
            Value::Array(vec![0.5, 0.7, 0.6])
        );
    }

    #[test]
    fn group_models_are_rejected() {
        let data = TrialData::new()
            .with_column("rt", Column::Float(vec![0.5, 0.6, 0.7, 0.8]))
            .unwrap()
            .with_column("subj_idx", Column::Int(vec![1, 1, 2, 2]))
            .unwrap();
        let mut model =
            HierarchicalModel::new(Arc::new(RtModel), Arc::new(data), ModelConfig::default()).unwrap();
        let before = model.registry().len();

        let err = map(&mut model, &NelderMead::default(), &MapConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::NotSupported(_)));
        assert_eq!(model.registry().len(), before);
        assert!(model.registry().get("v_subj().2").is_some());
    }

    #[test]
    fn zero_runs_is_a_config_error() {
        let mut model = single_subject();
        let config = MapConfig {
            runs: 0,
            ..MapConfig::default()
        };
        assert!(matches!(
            map(&mut model, &NelderMead::default(), &config),
            Err(AppError::Config(_))
        ));
    }
}
