//! Exports: node registry (CSV / JSON), MAP results (JSON) and trial tables
//! (CSV).
//!
//! The CSV outputs are meant to be easy to consume in spreadsheets or
//! downstream scripts; the JSON documents carry a generation timestamp.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::data::TrialData;
use crate::domain::Value;
use crate::error::AppError;
use crate::fit::MapOutcome;
use crate::registry::{NodeRegistry, NodeStats, RegistryRow};

const STAT_COLUMNS: [&str; 8] = [
    "mean", "std", "q2.5", "q25", "q50", "q75", "q97.5", "mc_err",
];

fn create(path: &Path) -> Result<File, AppError> {
    File::create(path).map_err(|e| {
        AppError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to create '{}': {e}", path.display()),
        ))
    })
}

fn stat_cells(stats: Option<&NodeStats>) -> Vec<String> {
    match stats {
        Some(s) => [s.mean, s.std, s.q2_5, s.q25, s.q50, s.q75, s.q97_5, s.mc_err]
            .iter()
            .map(|v| format!("{v:.6}"))
            .collect(),
        None => vec![String::new(); STAT_COLUMNS.len()],
    }
}

/// One row per node; key columns follow the data columns, empty when the
/// node does not depend on them.
pub fn write_registry_csv_to<W: Write>(out: W, registry: &NodeRegistry) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_writer(out);

    let mut header = vec!["node", "knode_name", "stochastic", "observed", "subj"];
    header.extend(registry.columns().iter().map(String::as_str));
    header.extend(STAT_COLUMNS);
    writer.write_record(&header)?;

    for row in registry.rows() {
        let mut record = vec![
            row.node_name.clone(),
            row.knode_name.clone(),
            row.stochastic.to_string(),
            row.observed.to_string(),
            row.subj.to_string(),
        ];
        record.extend(
            registry
                .columns()
                .iter()
                .map(|c| row.keys.get(c).map(ToString::to_string).unwrap_or_default()),
        );
        record.extend(stat_cells(row.stats.as_ref()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_registry_csv(path: &Path, registry: &NodeRegistry) -> Result<(), AppError> {
    write_registry_csv_to(create(path)?, registry)
}

#[derive(Debug, Serialize)]
struct RegistryDocument<'a> {
    generated_at: String,
    columns: &'a [String],
    nodes: &'a [RegistryRow],
}

pub fn write_registry_json(path: &Path, registry: &NodeRegistry) -> Result<(), AppError> {
    let doc = RegistryDocument {
        generated_at: timestamp(),
        columns: registry.columns(),
        nodes: registry.rows(),
    };
    serde_json::to_writer_pretty(create(path)?, &doc)?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct MapDocument<'a> {
    generated_at: String,
    logp: f64,
    run_logps: &'a [f64],
    gap: Option<f64>,
    diverged: bool,
    iterations: usize,
    converged: bool,
    values: &'a BTreeMap<String, Value>,
}

pub fn write_map_json(path: &Path, outcome: &MapOutcome) -> Result<(), AppError> {
    let doc = MapDocument {
        generated_at: timestamp(),
        logp: outcome.best.logp,
        run_logps: &outcome.logps,
        gap: outcome.gap,
        diverged: outcome.diverged,
        iterations: outcome.best.iterations,
        converged: outcome.best.converged,
        values: &outcome.best.values,
    };
    serde_json::to_writer_pretty(create(path)?, &doc)?;
    Ok(())
}

pub fn write_trials_csv_to<W: Write>(out: W, data: &TrialData) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(data.column_names())?;

    let columns: Vec<_> = data
        .column_names()
        .iter()
        .filter_map(|name| data.column(name))
        .collect();
    for row in 0..data.n_rows() {
        writer.write_record(columns.iter().map(|c| c.key_at(row).to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_trials_csv(path: &Path, data: &TrialData) -> Result<(), AppError> {
    write_trials_csv_to(create(path)?, data)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Column;
    use crate::domain::KeyValue;
    use crate::graph::NodeId;
    use crate::io::ingest::read_trials;
    use crate::registry::TraceStore;

    fn registry() -> NodeRegistry {
        let cols = vec!["rt".to_string(), "subj_idx".to_string(), "cond".to_string()];
        let mut reg = NodeRegistry::new(&cols);
        reg.push(RegistryRow {
            node_name: "v(A)".to_string(),
            knode_name: "v".to_string(),
            stochastic: true,
            observed: false,
            subj: false,
            node: NodeId(0),
            keys: BTreeMap::from([("cond".to_string(), KeyValue::from("A"))]),
            stats: None,
        })
        .unwrap();
        reg.push(RegistryRow {
            node_name: "v_subj(A).2".to_string(),
            knode_name: "v_subj".to_string(),
            stochastic: true,
            observed: false,
            subj: true,
            node: NodeId(1),
            keys: BTreeMap::from([
                ("cond".to_string(), KeyValue::from("A")),
                ("subj_idx".to_string(), KeyValue::Int(2)),
            ]),
            stats: None,
        })
        .unwrap();
        reg
    }

    #[test]
    fn registry_csv_has_key_and_stat_columns() {
        let mut reg = registry();
        let mut store = TraceStore::new();
        store.insert("v(A)", vec![1.0, 2.0, 3.0]);
        reg.append_stats(&store);

        let mut buf = Vec::new();
        write_registry_csv_to(&mut buf, &reg).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "node,knode_name,stochastic,observed,subj,rt,subj_idx,cond,mean,std,q2.5,q25,q50,q75,q97.5,mc_err"
        );
        assert!(lines[1].starts_with("v(A),v,true,false,false,,,A,2.000000,"));
        assert_eq!(lines[2], "v_subj(A).2,v_subj,true,false,true,,2,A,,,,,,,,");
    }

    #[test]
    fn trials_csv_reads_back() {
        let data = TrialData::new()
            .with_column("rt", Column::Float(vec![0.5, 0.75]))
            .unwrap()
            .with_column("subj_idx", Column::Int(vec![1, 2]))
            .unwrap()
            .with_column("cond", Column::Text(vec!["A".to_string(), "B".to_string()]))
            .unwrap();

        let mut buf = Vec::new();
        write_trials_csv_to(&mut buf, &data).unwrap();
        let back = read_trials(buf.as_slice()).unwrap().data;
        assert_eq!(back, data);
    }

    #[test]
    fn timestamp_is_rfc3339_utc() {
        let ts = timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
