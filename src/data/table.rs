//! Columnar trial table.
//!
//! One row per trial. Columns are typed (`Int`, `Float`, `Text`) so that any
//! of them can serve as a dependency key, while `Int`/`Float` columns can also
//! be bound as observed values.

use std::collections::BTreeMap;

use crate::domain::{GroupKey, KeyValue, SUBJ_COL};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Int(v) => v.len(),
            Column::Float(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn key_at(&self, row: usize) -> KeyValue {
        match self {
            Column::Int(v) => KeyValue::Int(v[row]),
            Column::Float(v) => KeyValue::Float(v[row]),
            Column::Text(v) => KeyValue::Text(v[row].clone()),
        }
    }

    pub fn numeric_at(&self, row: usize) -> Option<f64> {
        match self {
            Column::Int(v) => Some(v[row] as f64),
            Column::Float(v) => Some(v[row]),
            Column::Text(_) => None,
        }
    }

    fn take(&self, rows: &[usize]) -> Column {
        match self {
            Column::Int(v) => Column::Int(rows.iter().map(|&i| v[i]).collect()),
            Column::Float(v) => Column::Float(rows.iter().map(|&i| v[i]).collect()),
            Column::Text(v) => Column::Text(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

/// Read-only trial dataset shared by all templates of a build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialData {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl TrialData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column insert; all columns must share one length.
    pub fn with_column(mut self, name: &str, column: Column) -> Result<Self, AppError> {
        self.push_column(name, column)?;
        Ok(self)
    }

    pub fn push_column(&mut self, name: &str, column: Column) -> Result<(), AppError> {
        if self.has_column(name) {
            return Err(AppError::Data(format!("Duplicate column `{name}`.")));
        }
        if !self.names.is_empty() && column.len() != self.n_rows {
            return Err(AppError::Data(format!(
                "Column `{name}` has {} rows, expected {}.",
                column.len(),
                self.n_rows
            )));
        }
        self.n_rows = column.len();
        self.names.push(name.to_string());
        self.columns.push(column);
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| &self.columns[idx])
    }

    fn require(&self, name: &str) -> Result<&Column, AppError> {
        self.column(name)
            .ok_or_else(|| AppError::Data(format!("Column `{name}` not found in data.")))
    }

    /// Numeric values of `name` at `rows`.
    pub fn numeric_values(&self, name: &str, rows: &[usize]) -> Result<Vec<f64>, AppError> {
        let column = self.require(name)?;
        rows.iter()
            .map(|&row| {
                column
                    .numeric_at(row)
                    .ok_or_else(|| AppError::Data(format!("Column `{name}` is not numeric.")))
            })
            .collect()
    }

    /// Sorted distinct values of a column.
    pub fn unique(&self, name: &str) -> Result<Vec<KeyValue>, AppError> {
        let column = self.require(name)?;
        let mut values: Vec<KeyValue> = (0..self.n_rows).map(|i| column.key_at(i)).collect();
        values.sort();
        values.dedup();
        Ok(values)
    }

    /// Partition row indices by the values of `cols` (in that order).
    pub fn group_by(&self, cols: &[String]) -> Result<BTreeMap<GroupKey, Vec<usize>>, AppError> {
        let columns: Vec<&Column> = cols
            .iter()
            .map(|c| self.require(c))
            .collect::<Result<_, _>>()?;

        let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
        for row in 0..self.n_rows {
            let key: GroupKey = columns.iter().map(|c| c.key_at(row)).collect();
            groups.entry(key).or_default().push(row);
        }
        Ok(groups)
    }

    /// Sorted distinct subject ids, if a `subj_idx` column exists.
    pub fn subjects(&self) -> Result<Option<Vec<i64>>, AppError> {
        if !self.has_column(SUBJ_COL) {
            return Ok(None);
        }
        let ids = self
            .unique(SUBJ_COL)?
            .into_iter()
            .map(|v| {
                v.as_int().ok_or_else(|| {
                    AppError::Data(format!("Column `{SUBJ_COL}` must hold integers."))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(ids))
    }

    /// Row subset, preserving column order.
    pub fn take(&self, rows: &[usize]) -> TrialData {
        TrialData {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(rows)).collect(),
            n_rows: rows.len(),
        }
    }

    /// Rows where `name == value`.
    pub fn filter_eq(&self, name: &str, value: &KeyValue) -> Result<TrialData, AppError> {
        let column = self.require(name)?;
        let rows: Vec<usize> = (0..self.n_rows)
            .filter(|&i| column.key_at(i) == *value)
            .collect();
        Ok(self.take(&rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TrialData {
        TrialData::new()
            .with_column("rt", Column::Float(vec![0.5, 0.6, 0.7, 0.8, 0.9, 1.0]))
            .unwrap()
            .with_column("subj_idx", Column::Int(vec![1, 1, 1, 2, 2, 2]))
            .unwrap()
            .with_column(
                "cond",
                Column::Text(["A", "B", "A", "B", "A", "B"].map(String::from).to_vec()),
            )
            .unwrap()
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = table()
            .with_column("x", Column::Int(vec![1, 2]))
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn group_by_covers_every_row_once() {
        let t = table();
        let groups = t
            .group_by(&["cond".to_string(), "subj_idx".to_string()])
            .unwrap();
        assert_eq!(groups.len(), 4);
        let total: usize = groups.values().map(Vec::len).sum();
        assert_eq!(total, t.n_rows());

        let key = vec![KeyValue::from("A"), KeyValue::Int(1)];
        assert_eq!(groups[&key], vec![0, 2]);
    }

    #[test]
    fn subjects_are_sorted_and_unique() {
        assert_eq!(table().subjects().unwrap(), Some(vec![1, 2]));
        let no_subj = TrialData::new()
            .with_column("rt", Column::Float(vec![1.0]))
            .unwrap();
        assert_eq!(no_subj.subjects().unwrap(), None);
    }

    #[test]
    fn filter_eq_keeps_matching_rows() {
        let t = table().filter_eq("subj_idx", &KeyValue::Int(2)).unwrap();
        assert_eq!(t.n_rows(), 3);
        assert_eq!(t.numeric_values("rt", &[0, 1, 2]).unwrap(), vec![0.8, 0.9, 1.0]);
    }

    #[test]
    fn text_columns_are_not_numeric() {
        assert!(table().numeric_values("cond", &[0]).is_err());
    }
}
