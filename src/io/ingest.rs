//! CSV ingest of trial data.
//!
//! Turns a trial-level CSV into a typed `TrialData` table:
//!
//! - headers are trimmed and stripped of a UTF-8 BOM
//! - each column's type is inferred from all of its cells: `Int` if every cell
//!   parses as an integer, else `Float` if every cell parses as a number, else
//!   `Text`
//! - malformed rows (wrong field count, empty cells) are skipped and reported

use std::fs::File;
use std::path::Path;

use csv::StringRecord;
use tracing::warn;

use crate::data::{Column, TrialData};
use crate::error::AppError;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct IngestedTrials {
    pub data: TrialData,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

impl IngestedTrials {
    pub fn rows_used(&self) -> usize {
        self.data.n_rows()
    }
}

pub fn load_trials(path: &Path) -> Result<IngestedTrials, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::Data(format!("Failed to open CSV '{}': {e}", path.display()))
    })?;
    read_trials(file)
}

pub fn read_trials<R: std::io::Read>(reader: R) -> Result<IngestedTrials, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(normalize_header_name)
        .collect();
    if headers.is_empty() || headers.iter().any(String::is_empty) {
        return Err(AppError::Data("CSV header has empty column names.".to_string()));
    }
    for (i, name) in headers.iter().enumerate() {
        if headers[..i].contains(name) {
            return Err(AppError::Data(format!("Duplicate column `{name}` in CSV header.")));
        }
    }

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Line numbers are 1-based and the header is line 1.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };
        match check_record(&record, &headers) {
            Ok(()) => {
                for (col, value) in cells.iter_mut().zip(record.iter()) {
                    col.push(value.to_string());
                }
            }
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if !row_errors.is_empty() {
        warn!(skipped = row_errors.len(), rows_read, "skipped malformed CSV rows");
    }
    if cells[0].is_empty() {
        return Err(AppError::Data("No valid rows in CSV.".to_string()));
    }

    let mut data = TrialData::new();
    for (name, values) in headers.iter().zip(cells) {
        data.push_column(name, infer_column(values))?;
    }

    Ok(IngestedTrials {
        data,
        row_errors,
        rows_read,
    })
}

fn normalize_header_name(name: &str) -> String {
    name.trim().trim_start_matches('\u{feff}').to_string()
}

fn check_record(record: &StringRecord, headers: &[String]) -> Result<(), String> {
    if record.len() != headers.len() {
        return Err(format!(
            "Expected {} fields, found {}.",
            headers.len(),
            record.len()
        ));
    }
    if let Some(pos) = record.iter().position(str::is_empty) {
        return Err(format!("Empty value in column `{}`.", headers[pos]));
    }
    Ok(())
}

fn infer_column(values: Vec<String>) -> Column {
    let ints: Option<Vec<i64>> = values.iter().map(|v| v.parse::<i64>().ok()).collect();
    if let Some(ints) = ints {
        return Column::Int(ints);
    }
    let floats: Option<Vec<f64>> = values
        .iter()
        .map(|v| v.parse::<f64>().ok().filter(|x| x.is_finite()))
        .collect();
    match floats {
        Some(floats) => Column::Float(floats),
        None => Column::Text(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::KeyValue;

    #[test]
    fn infers_column_types() {
        let csv = "\u{feff}rt, response ,subj_idx,cond\n0.5,1,1,A\n0.61,0,1,B\n0.7,1,2,A\n";
        let ingested = read_trials(csv.as_bytes()).unwrap();
        let data = &ingested.data;

        assert_eq!(data.column_names(), &["rt", "response", "subj_idx", "cond"]);
        assert!(matches!(data.column("rt"), Some(Column::Float(_))));
        assert!(matches!(data.column("response"), Some(Column::Int(_))));
        assert!(matches!(data.column("cond"), Some(Column::Text(_))));
        assert_eq!(data.subjects().unwrap(), Some(vec![1, 2]));
        assert_eq!(ingested.rows_used(), 3);
    }

    #[test]
    fn skips_malformed_rows() {
        let csv = "rt,cond\n0.5,A\n0.6\n,B\n0.7,B\n";
        let ingested = read_trials(csv.as_bytes()).unwrap();
        assert_eq!(ingested.rows_read, 4);
        assert_eq!(ingested.rows_used(), 2);
        let lines: Vec<usize> = ingested.row_errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 4]);
        assert_eq!(
            ingested.data.unique("cond").unwrap(),
            vec![KeyValue::from("A"), KeyValue::from("B")]
        );
    }

    #[test]
    fn mixed_numbers_become_floats() {
        let csv = "x\n1\n2.5\n";
        let data = read_trials(csv.as_bytes()).unwrap().data;
        assert_eq!(data.numeric_values("x", &[0, 1]).unwrap(), vec![1.0, 2.5]);
    }

    #[test]
    fn empty_or_broken_input_is_a_data_error() {
        assert!(matches!(read_trials("rt\n".as_bytes()), Err(AppError::Data(_))));
        assert!(matches!(read_trials("rt,rt\n1,2\n".as_bytes()), Err(AppError::Data(_))));
    }
}
