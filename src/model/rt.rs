//! Built-in Gaussian reaction-time model.
//!
//! Trials follow `rt ~ Normal(mu, sd)`. In group mode the location `v` (and
//! the optional offset `t`) get a group node, a between-subject variability
//! node and one node per subject; the trial noise `sd` stays group-level.
//!
//! ```text
//! v ──┐            t ──┐
//!     ├─ v_subj ─┐     ├─ t_subj ─┐
//! v_var ┘        └──── mu ────────┘
//!                       │
//!              sd ──── rt (observed)
//! ```

use crate::error::AppError;
use crate::graph::Constructor;
use crate::knode::{Knode, KnodeId, KnodeSet};
use crate::model::factory::{FactoryContext, ModelFactory, ParamLayout, Templates};
use crate::registry::stats::mean;

/// Floor for seeded variability values.
const MIN_SPREAD: f64 = 1e-3;

#[derive(Debug, Clone, Copy)]
struct ParamSpec {
    name: &'static str,
    lower: f64,
    upper: f64,
    /// Scale of the variability prior; `None` keeps the parameter group-level.
    var_scale: Option<f64>,
    optional: bool,
}

const PARAMS: [ParamSpec; 3] = [
    ParamSpec {
        name: "v",
        lower: 0.0,
        upper: 3.0,
        var_scale: Some(0.5),
        optional: false,
    },
    ParamSpec {
        name: "sd",
        lower: 0.01,
        upper: 2.0,
        var_scale: None,
        optional: false,
    },
    ParamSpec {
        name: "t",
        lower: 0.0,
        upper: 1.0,
        var_scale: Some(0.2),
        optional: true,
    },
];

/// Population standard deviation, floored at `MIN_SPREAD`.
pub fn spread(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return MIN_SPREAD;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt().max(MIN_SPREAD)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RtModel;

impl RtModel {
    fn active<'a>(ctx: &FactoryContext<'a>) -> Result<Vec<ParamSpec>, AppError> {
        for name in ctx.include {
            if !PARAMS.iter().any(|p| p.optional && p.name == name.as_str()) {
                return Err(AppError::Config(format!(
                    "Unknown optional parameter '{name}'. Available: t."
                )));
            }
        }
        for (param, _) in ctx.depends_on.iter() {
            if !PARAMS.iter().any(|p| p.name == param.as_str()) {
                return Err(AppError::Config(format!(
                    "depends_on names unknown parameter '{param}'."
                )));
            }
        }
        Ok(PARAMS
            .iter()
            .filter(|p| !p.optional || ctx.include.contains(p.name))
            .copied()
            .collect())
    }

    fn group_knode(spec: &ParamSpec, ctx: &FactoryContext<'_>) -> Knode {
        Knode::new(spec.name, Constructor::uniform())
            .depends(ctx.depends_on.get(spec.name).to_vec())
            .value("lower", spec.lower)
            .value("upper", spec.upper)
    }

    /// Location node feeding the likelihood: `v` alone, or `mu = v + t`.
    fn location(set: &mut KnodeSet, v: KnodeId, t: Option<KnodeId>) -> Result<KnodeId, AppError> {
        match t {
            Some(t) => set.add(
                Knode::new("mu", Constructor::sum())
                    .parent("v", v)
                    .parent("t", t),
            ),
            None => Ok(v),
        }
    }

    fn likelihood(subj: bool, mu: KnodeId, sd: KnodeId) -> Knode {
        Knode::new("rt", Constructor::normal())
            .parent("mu", mu)
            .parent("sigma", sd)
            .subj(subj)
            .observed("rt")
    }
}

fn missing(name: &str) -> AppError {
    AppError::template(name, "required parameter template was not created")
}

impl ModelFactory for RtModel {
    fn name(&self) -> &'static str {
        "rt"
    }

    fn create_knodes(&self, ctx: &FactoryContext<'_>) -> Result<Templates, AppError> {
        let mut knodes = KnodeSet::new();
        let mut params = Vec::new();
        let mut feeds = Vec::new();

        for spec in Self::active(ctx)? {
            let group = knodes.add(Self::group_knode(&spec, ctx))?;
            let Some(scale) = spec.var_scale else {
                feeds.push((spec.name, group));
                params.push(ParamLayout {
                    name: spec.name.to_string(),
                    group: spec.name.to_string(),
                    var: None,
                    subj: None,
                    var_func: spread,
                });
                continue;
            };

            let var_name = format!("{}_var", spec.name);
            let subj_name = format!("{}_subj", spec.name);
            let var = knodes.add(
                Knode::new(&var_name, Constructor::half_normal()).value("sigma", scale),
            )?;
            let subj = knodes.add(
                Knode::new(&subj_name, Constructor::normal())
                    .depends(ctx.depends_on.get(spec.name).to_vec())
                    .parent("mu", group)
                    .parent("sigma", var)
                    .subj(true),
            )?;
            feeds.push((spec.name, subj));
            params.push(ParamLayout {
                name: spec.name.to_string(),
                group: spec.name.to_string(),
                var: Some(var_name),
                subj: Some(subj_name),
                var_func: spread,
            });
        }

        let feed = |name: &str| feeds.iter().find(|(n, _)| *n == name).map(|(_, id)| *id);
        let v = feed("v").ok_or_else(|| missing("v"))?;
        let sd = feed("sd").ok_or_else(|| missing("sd"))?;
        let mu = Self::location(&mut knodes, v, feed("t"))?;
        knodes.add(Self::likelihood(true, mu, sd))?;

        Ok(Templates { knodes, params })
    }

    fn create_knodes_single_subj(&self, ctx: &FactoryContext<'_>) -> Result<Templates, AppError> {
        let mut knodes = KnodeSet::new();
        let mut params = Vec::new();

        for spec in Self::active(ctx)? {
            knodes.add(Self::group_knode(&spec, ctx))?;
            params.push(ParamLayout {
                name: spec.name.to_string(),
                group: spec.name.to_string(),
                var: None,
                subj: None,
                var_func: spread,
            });
        }

        let v = knodes.by_name("v").ok_or_else(|| missing("v"))?;
        let sd = knodes.by_name("sd").ok_or_else(|| missing("sd"))?;
        let t = knodes.by_name("t");
        let mu = Self::location(&mut knodes, v, t)?;
        knodes.add(Self::likelihood(false, mu, sd))?;

        Ok(Templates { knodes, params })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::domain::DependsOn;

    fn names(t: &Templates) -> Vec<&str> {
        t.knodes.iter().map(|(_, k)| k.name()).collect()
    }

    #[test]
    fn group_templates_and_layout() {
        let deps = DependsOn::new().with("v", "cond");
        let include = BTreeSet::new();
        let ctx = FactoryContext {
            depends_on: &deps,
            include: &include,
        };
        let t = RtModel.create_knodes(&ctx).unwrap();

        assert_eq!(names(&t), vec!["v", "v_var", "v_subj", "sd", "rt"]);
        let rt = t.knodes.get(t.knodes.by_name("rt").unwrap());
        assert_eq!(rt.resolved_depends(), &["cond".to_string(), "subj_idx".to_string()]);
        assert!(rt.is_observed());

        assert_eq!(t.params.len(), 2);
        assert!(t.params[0].has_subj_nodes());
        assert_eq!(t.params[0].var.as_deref(), Some("v_var"));
        assert!(!t.params[1].has_subj_nodes());
    }

    #[test]
    fn single_subject_templates_are_flat() {
        let deps = DependsOn::new().with("v", "cond");
        let include: BTreeSet<String> = ["t".to_string()].into();
        let ctx = FactoryContext {
            depends_on: &deps,
            include: &include,
        };
        let t = RtModel.create_knodes_single_subj(&ctx).unwrap();

        assert_eq!(names(&t), vec!["v", "sd", "t", "mu", "rt"]);
        let rt = t.knodes.get(t.knodes.by_name("rt").unwrap());
        assert!(!rt.is_subj());
        assert_eq!(rt.resolved_depends(), &["cond".to_string()]);
        assert!(t.params.iter().all(|p| !p.has_subj_nodes()));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let deps = DependsOn::new();
        let include: BTreeSet<String> = ["z".to_string()].into();
        let ctx = FactoryContext {
            depends_on: &deps,
            include: &include,
        };
        assert!(matches!(RtModel.create_knodes(&ctx), Err(AppError::Config(_))));

        let deps = DependsOn::new().with("a", "cond");
        let include = BTreeSet::new();
        let ctx = FactoryContext {
            depends_on: &deps,
            include: &include,
        };
        assert!(RtModel.create_knodes_single_subj(&ctx).is_err());
    }

    #[test]
    fn spread_is_floored() {
        assert_eq!(spread(&[1.0]), MIN_SPREAD);
        assert_eq!(spread(&[2.0, 2.0]), MIN_SPREAD);
        assert!((spread(&[1.0, 3.0]) - 1.0).abs() < 1e-12);
    }
}
