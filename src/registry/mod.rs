//! Node registry: one row per concrete node of a build.
//!
//! Each template's expansion produces a registry fragment; the builder
//! concatenates the fragments into the model registry. Rows are keyed by the
//! (globally unique) node name.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::domain::KeyValue;
use crate::error::AppError;
use crate::graph::NodeId;

pub mod stats;

pub use stats::{DicInfo, NodeStats, SamplingSession, TraceStore, dic_info};

#[derive(Debug, Clone, Serialize)]
pub struct RegistryRow {
    pub node_name: String,
    pub knode_name: String,
    pub stochastic: bool,
    pub observed: bool,
    pub subj: bool,
    #[serde(skip)]
    pub node: NodeId,
    /// Realized value of every resolved dependency column.
    pub keys: BTreeMap<String, KeyValue>,
    pub stats: Option<NodeStats>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    columns: Vec<String>,
    rows: Vec<RegistryRow>,
    index: HashMap<String, usize>,
}

impl NodeRegistry {
    /// Empty registry whose key columns are the data columns.
    pub fn new(columns: &[String]) -> Self {
        Self {
            columns: columns.to_vec(),
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn push(&mut self, row: RegistryRow) -> Result<(), AppError> {
        if self.index.contains_key(&row.node_name) {
            return Err(AppError::template(
                &row.knode_name,
                format!("node name `{}` is already registered", row.node_name),
            ));
        }
        self.index.insert(row.node_name.clone(), self.rows.len());
        self.rows.push(row);
        Ok(())
    }

    /// Concatenate fragments in order.
    pub fn concat(
        columns: &[String],
        fragments: impl IntoIterator<Item = NodeRegistry>,
    ) -> Result<Self, AppError> {
        let mut out = NodeRegistry::new(columns);
        for fragment in fragments {
            for row in fragment.rows {
                out.push(row)?;
            }
        }
        Ok(out)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[RegistryRow] {
        &self.rows
    }

    pub fn get(&self, node_name: &str) -> Option<&RegistryRow> {
        self.index.get(node_name).map(|&i| &self.rows[i])
    }

    /// Rows of one template, in expansion order.
    pub fn knode_rows<'a>(&'a self, knode_name: &'a str) -> impl Iterator<Item = &'a RegistryRow> {
        self.rows.iter().filter(move |r| r.knode_name == knode_name)
    }

    /// Fill stats for every row with a trace; returns how many were filled.
    pub fn append_stats(&mut self, session: &dyn SamplingSession) -> usize {
        let mut filled = 0;
        for row in &mut self.rows {
            if let Some(stats) = session.trace(&row.node_name).and_then(NodeStats::from_trace) {
                row.stats = Some(stats);
                filled += 1;
            }
        }
        filled
    }

    /// Stochastic, non-observed rows matching every `(column, value)` filter.
    ///
    /// Filters may name a key column, `knode_name`, or `subj`.
    pub fn stats_rows(&self, filters: &[(String, KeyValue)]) -> Vec<&RegistryRow> {
        self.rows
            .iter()
            .filter(|r| r.stochastic && !r.observed)
            .filter(|r| filters.iter().all(|(col, value)| row_matches(r, col, value)))
            .collect()
    }
}

fn row_matches(row: &RegistryRow, column: &str, value: &KeyValue) -> bool {
    match column {
        "knode_name" => *value == KeyValue::Text(row.knode_name.clone()),
        "subj" => *value == KeyValue::Int(i64::from(row.subj)),
        _ => row.keys.get(column) == Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, knode: &str, keys: &[(&str, KeyValue)]) -> RegistryRow {
        RegistryRow {
            node_name: name.to_string(),
            knode_name: knode.to_string(),
            stochastic: true,
            observed: false,
            subj: keys.iter().any(|(k, _)| *k == "subj_idx"),
            node: NodeId(0),
            keys: keys.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            stats: None,
        }
    }

    #[test]
    fn concat_keeps_fragment_order() {
        let cols = vec!["cond".to_string()];
        let mut a = NodeRegistry::new(&cols);
        a.push(row("v(A)", "v", &[("cond", "A".into())])).unwrap();
        let mut b = NodeRegistry::new(&cols);
        b.push(row("a()", "a", &[])).unwrap();

        let all = NodeRegistry::concat(&cols, [a, b]).unwrap();
        let names: Vec<&str> = all.rows().iter().map(|r| r.node_name.as_str()).collect();
        assert_eq!(names, vec!["v(A)", "a()"]);
        assert!(all.get("a()").is_some());
    }

    #[test]
    fn concat_rejects_duplicate_names() {
        let cols = Vec::new();
        let mut a = NodeRegistry::new(&cols);
        a.push(row("v()", "v", &[])).unwrap();
        let mut b = NodeRegistry::new(&cols);
        b.push(row("v()", "v", &[])).unwrap();
        assert!(NodeRegistry::concat(&cols, [a, b]).is_err());
    }

    #[test]
    fn append_stats_fills_traced_rows_only() {
        let mut reg = NodeRegistry::new(&[]);
        reg.push(row("v()", "v", &[])).unwrap();
        reg.push(row("a()", "a", &[])).unwrap();

        let mut store = TraceStore::new();
        store.insert("v()", vec![1.0, 2.0, 3.0]);
        assert_eq!(reg.append_stats(&store), 1);
        assert_eq!(reg.get("v()").unwrap().stats.as_ref().unwrap().mean, 2.0);
        assert!(reg.get("a()").unwrap().stats.is_none());
    }

    #[test]
    fn stats_rows_filter_by_key_and_flags() {
        let mut reg = NodeRegistry::new(&["subj_idx".to_string()]);
        reg.push(row("v_subj().1", "v_subj", &[("subj_idx", KeyValue::Int(1))]))
            .unwrap();
        reg.push(row("v_subj().2", "v_subj", &[("subj_idx", KeyValue::Int(2))]))
            .unwrap();
        let mut obs = row("rt().1", "rt", &[("subj_idx", KeyValue::Int(1))]);
        obs.observed = true;
        reg.push(obs).unwrap();

        assert_eq!(reg.stats_rows(&[]).len(), 2);
        let one = reg.stats_rows(&[("subj_idx".to_string(), KeyValue::Int(2))]);
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].node_name, "v_subj().2");
        let by_knode = reg.stats_rows(&[("knode_name".to_string(), "v_subj".into())]);
        assert_eq!(by_knode.len(), 2);
    }
}
