//! Shared domain types.
//!
//! These types are intentionally lightweight and serializable so they can be:
//!
//! - used as group keys during expansion
//! - stored in registry rows
//! - exported to CSV/JSON

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Name of the column identifying the hierarchical grouping unit.
pub const SUBJ_COL: &str = "subj_idx";

/// One data value used as (part of) a group key.
///
/// Floats compare by `f64::total_cmp` so keys can live in ordered maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl KeyValue {
    fn rank(&self) -> u8 {
        match self {
            KeyValue::Int(_) => 0,
            KeyValue::Float(_) => 1,
            KeyValue::Text(_) => 2,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            KeyValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValue {}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyValue::Int(a), KeyValue::Int(b)) => a.cmp(b),
            (KeyValue::Float(a), KeyValue::Float(b)) => a.total_cmp(b),
            (KeyValue::Text(a), KeyValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            KeyValue::Int(v) => v.hash(state),
            KeyValue::Float(v) => v.to_bits().hash(state),
            KeyValue::Text(v) => v.hash(state),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Float(v) => write!(f, "{v}"),
            KeyValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Text(value.to_string())
    }
}

/// Values over a template's resolved dependency columns, in that order.
pub type GroupKey = Vec<KeyValue>;

/// Dot-join key values (`A.1`), as used in node names and error messages.
pub fn join_key(key: &[KeyValue]) -> String {
    key.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Current value of a concrete node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(f64),
    Array(Vec<f64>),
}

impl Value {
    pub fn len(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Array(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[f64] {
        match self {
            Value::Scalar(v) => std::slice::from_ref(v),
            Value::Array(v) => v,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        match self {
            Value::Scalar(v) => std::slice::from_mut(v),
            Value::Array(v) => v,
        }
    }

    /// Scalar view; arrays collapse to their mean.
    pub fn scalar(&self) -> f64 {
        match self {
            Value::Scalar(v) => *v,
            Value::Array(v) if v.is_empty() => f64::NAN,
            Value::Array(v) => v.iter().sum::<f64>() / v.len() as f64,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) => write!(f, "{v:.4}"),
            Value::Array(v) => {
                let parts: Vec<String> = v.iter().map(|x| format!("{x:.4}")).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// A list of dependency columns for one parameter.
///
/// A bare string normalizes to a one-element list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnList(pub Vec<String>);

impl From<&str> for ColumnList {
    fn from(value: &str) -> Self {
        ColumnList(vec![value.to_string()])
    }
}

impl From<String> for ColumnList {
    fn from(value: String) -> Self {
        ColumnList(vec![value])
    }
}

impl From<Vec<&str>> for ColumnList {
    fn from(value: Vec<&str>) -> Self {
        ColumnList(value.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for ColumnList {
    fn from(value: Vec<String>) -> Self {
        ColumnList(value)
    }
}

impl<const N: usize> From<[&str; N]> for ColumnList {
    fn from(value: [&str; N]) -> Self {
        ColumnList(value.iter().map(|s| s.to_string()).collect())
    }
}

/// Which data columns force distinct instances of which parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependsOn {
    map: BTreeMap<String, Vec<String>>,
}

impl DependsOn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, param: &str, columns: impl Into<ColumnList>) -> Self {
        self.insert(param, columns);
        self
    }

    pub fn insert(&mut self, param: &str, columns: impl Into<ColumnList>) {
        self.map.insert(param.to_string(), columns.into().0);
    }

    /// Columns for `param`; empty when undeclared.
    pub fn get(&self, param: &str) -> &[String] {
        self.map.get(param).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.map.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Parse the CLI form `param=col1,col2`.
    pub fn parse_entry(&mut self, entry: &str) -> Result<(), AppError> {
        let Some((param, cols)) = entry.split_once('=') else {
            return Err(AppError::Config(format!(
                "Invalid --depends entry '{entry}'. Expected PARAM=COL[,COL...]."
            )));
        };
        let param = param.trim();
        let cols: Vec<String> = cols
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if param.is_empty() || cols.is_empty() {
            return Err(AppError::Config(format!(
                "Invalid --depends entry '{entry}'. Expected PARAM=COL[,COL...]."
            )));
        }
        self.map.insert(param.to_string(), cols);
        Ok(())
    }
}

/// Model construction settings.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// `None` infers group mode from the data.
    pub is_group_model: Option<bool>,
    pub depends_on: DependsOn,
    /// Optional parameters switched on for the factory.
    pub include: BTreeSet<String>,
    /// Guarded build attempts before the final unguarded one.
    pub max_retries: usize,
    /// Seed for starting values.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            is_group_model: None,
            depends_on: DependsOn::new(),
            include: BTreeSet::new(),
            max_retries: 8,
            seed: 42,
        }
    }
}

/// Point-estimation settings.
#[derive(Debug, Clone)]
pub struct MapConfig {
    /// Number of optimizer runs, each from fresh starting values.
    pub runs: usize,
    /// Log-probability gap between the two best runs that triggers a warning.
    pub warn_crit: f64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            runs: 2,
            warn_crit: 5.0,
        }
    }
}

/// Synthetic trial generation settings.
#[derive(Debug, Clone)]
pub struct SampleConfig {
    pub n_subjects: usize,
    pub trials_per_condition: usize,
    pub conditions: Vec<String>,
    /// Group mean reaction time (seconds).
    pub v_mean: f64,
    /// Between-subject spread of the subject means.
    pub v_spread: f64,
    /// Additive shift per condition index.
    pub cond_shift: f64,
    /// Within-subject trial noise.
    pub noise_sd: f64,
    pub seed: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            n_subjects: 5,
            trials_per_condition: 40,
            conditions: vec!["A".to_string(), "B".to_string()],
            v_mean: 0.8,
            v_spread: 0.1,
            cond_shift: 0.15,
            noise_sd: 0.2,
            seed: 42,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_values_order_within_and_across_kinds() {
        assert!(KeyValue::Int(1) < KeyValue::Int(2));
        assert!(KeyValue::Float(0.5) < KeyValue::Float(1.5));
        assert!(KeyValue::from("A") < KeyValue::from("B"));
        assert!(KeyValue::Int(99) < KeyValue::from("A"));
    }

    #[test]
    fn join_key_is_dot_separated() {
        let key = vec![KeyValue::from("A"), KeyValue::Int(3)];
        assert_eq!(join_key(&key), "A.3");
        assert_eq!(join_key(&[]), "");
    }

    #[test]
    fn bare_string_normalizes_to_one_column() {
        let deps = DependsOn::new().with("v", "cond");
        assert_eq!(deps.get("v"), &["cond".to_string()]);
        assert!(deps.get("a").is_empty());
    }

    #[test]
    fn parse_entry_splits_columns() {
        let mut deps = DependsOn::new();
        deps.parse_entry("v=cond, stim").unwrap();
        assert_eq!(deps.get("v"), &["cond".to_string(), "stim".to_string()]);
        assert!(deps.parse_entry("v").is_err());
        assert!(deps.parse_entry("v=").is_err());
    }
}
