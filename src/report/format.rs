//! Terminal formatting: registry tables, posterior stats, MAP and
//! initialization summaries.
//!
//! Formatting lives here so the model code stays free of presentation and
//! output changes stay local.

use crate::domain::Value;
use crate::fit::{MapOutcome, SubjInitReport};
use crate::graph::NodeArena;
use crate::model::HierarchicalModel;
use crate::registry::{DicInfo, NodeRegistry, RegistryRow};

/// One line per node: name, template, kind and current value.
pub fn format_registry(registry: &NodeRegistry, arena: &NodeArena) -> String {
    let mut out = String::new();
    push_line(
        &mut out,
        format!("{:<28} {:<12} {:<10} {:>12}", "node", "template", "kind", "value"),
    );
    push_line(&mut out, format!("{:-<28} {:-<12} {:-<10} {:-<12}", "", "", "", ""));

    for row in registry.rows() {
        let value = &arena.get(row.node).value;
        let shown = match value {
            Value::Array(v) if row.observed => format!("<{} obs>", v.len()),
            _ => value.to_string(),
        };
        push_line(
            &mut out,
            format!(
                "{:<28} {:<12} {:<10} {:>12}",
                truncate(&row.node_name, 28),
                truncate(&row.knode_name, 12),
                kind(row),
                shown
            ),
        );
    }
    push_line(&mut out, format!("{} nodes", registry.len()));
    out
}

fn kind(row: &RegistryRow) -> &'static str {
    match (row.stochastic, row.observed) {
        (_, true) => "observed",
        (true, false) => "free",
        (false, false) => "determ.",
    }
}

/// Posterior summary table; rows without stats are skipped.
pub fn format_stats(rows: &[&RegistryRow]) -> String {
    let mut out = String::new();
    push_line(
        &mut out,
        format!(
            "{:<28} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}",
            "node", "mean", "std", "2.5q", "25q", "50q", "75q", "97.5q", "mc err"
        ),
    );
    for row in rows {
        let Some(s) = &row.stats else {
            continue;
        };
        push_line(
            &mut out,
            format!(
                "{:<28} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>9.4}",
                truncate(&row.node_name, 28),
                s.mean,
                s.std,
                s.q2_5,
                s.q25,
                s.q50,
                s.q75,
                s.q97_5,
                s.mc_err
            ),
        );
    }
    out
}

pub fn format_dic(info: &DicInfo) -> String {
    format!(
        "DIC: {:.3}\ndeviance: {:.3}\npD: {:.3}\n",
        info.dic, info.deviance, info.pd
    )
}

pub fn format_map_summary(outcome: &MapOutcome) -> String {
    let mut out = String::new();
    out.push_str("=== MAP ===\n");
    out.push_str(&format!("Runs: {}\n", fmt_vec(&outcome.logps)));
    out.push_str(&format!(
        "Best logp: {:.4} ({} iterations, {})\n",
        outcome.best.logp,
        outcome.best.iterations,
        if outcome.best.converged { "converged" } else { "not converged" }
    ));
    if let Some(gap) = outcome.gap {
        let flag = if outcome.diverged { "  <-- runs disagree" } else { "" };
        out.push_str(&format!("Gap to second best: {gap:.4}{flag}\n"));
    }
    out.push('\n');
    for (name, value) in &outcome.best.values {
        out.push_str(&format!("{name:<28} {value}\n"));
    }
    out
}

/// Per-subject fit quality plus the seeded group-level values.
pub fn format_subj_init(report: &SubjInitReport, model: &HierarchicalModel) -> String {
    let mut out = String::new();
    out.push_str("=== Subject-by-subject initialization ===\n");
    for fit in &report.fits {
        let flag = if fit.diverged { " (runs disagree)" } else { "" };
        out.push_str(&format!("subject {:>4}  logp {:>12.4}{flag}\n", fit.subj, fit.logp));
    }
    out.push_str(&format!("{} nodes updated\n\n", report.updated));

    let arena = &model.graph().arena;
    for layout in model.params() {
        let names = std::iter::once(layout.group.as_str()).chain(layout.var.as_deref());
        for knode in names {
            for row in model.registry().knode_rows(knode) {
                push_line(
                    &mut out,
                    format!("{:<28} {}", row.node_name, arena.get(row.node).value),
                );
            }
        }
    }
    out
}

fn push_line(out: &mut String, line: String) {
    out.push_str(line.trim_end());
    out.push('\n');
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.4}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::fit::MapResult;
    use crate::registry::{NodeStats, TraceStore, dic_info};

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("v(A).1", 10), "v(A).1");
        assert_eq!(truncate("abcdefghij", 5), "abcd.");
    }

    #[test]
    fn stats_table_skips_rows_without_stats() {
        let with = RegistryRow {
            node_name: "v(A)".to_string(),
            knode_name: "v".to_string(),
            stochastic: true,
            observed: false,
            subj: false,
            node: crate::graph::NodeId(0),
            keys: BTreeMap::new(),
            stats: NodeStats::from_trace(&[1.0, 2.0, 3.0]),
        };
        let without = RegistryRow {
            node_name: "v(B)".to_string(),
            stats: None,
            ..with.clone()
        };
        let table = format_stats(&[&with, &without]);
        assert_eq!(table.lines().count(), 2);
        assert!(table.contains("v(A)"));
        assert!(!table.contains("v(B)"));
    }

    #[test]
    fn map_summary_flags_divergence() {
        let outcome = MapOutcome {
            best: MapResult {
                logp: -41.0,
                values: BTreeMap::from([("v()".to_string(), Value::Scalar(0.5))]),
                iterations: 12,
                converged: true,
            },
            logps: vec![-49.0, -41.0],
            gap: Some(8.0),
            diverged: true,
        };
        let text = format_map_summary(&outcome);
        assert!(text.contains("runs disagree"));
        assert!(text.contains("v()"));
        assert!(text.contains("0.5000"));
    }

    #[test]
    fn dic_lines() {
        let mut store = TraceStore::new();
        store.set_deviance(vec![10.0, 12.0, 14.0], Some(9.0));
        let text = format_dic(&dic_info(&store).unwrap());
        assert_eq!(text, "DIC: 15.000\ndeviance: 12.000\npD: 3.000\n");
    }
}
