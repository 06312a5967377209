// tsflow-core/src/domain/dataset/mod.rs

pub mod flags;
pub mod mask;

pub use flags::{Assessment, FlagDefinition, FlagRecorder, MAX_QC_BIT};
pub use mask::FailureMask;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::error::DomainError;

/// Prefix that marks a companion QC variable (`qc_temp` holds the flags of `temp`).
pub const QC_PREFIX: &str = "qc_";
/// Name of the coordinate variable holding seconds since the Unix epoch.
pub const TIME: &str = "time";
/// Global attribute identifying the datastream a dataset belongs to.
pub const DATASTREAM_ATTR: &str = "datastream";
/// Per-variable attribute holding the missing-value sentinel.
pub const FILL_VALUE_ATTR: &str = "_FillValue";

pub type Attributes = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub enum VariableData {
    Float(#[serde(with = "nan_as_null")] Vec<f64>),
    Flags(Vec<u32>),
}

/// Missing values are NaN, and a NaN equals another NaN here so that a
/// dataset always equals its own clone.
impl PartialEq for VariableData {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (VariableData::Float(a), VariableData::Float(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
            }
            (VariableData::Flags(a), VariableData::Flags(b)) => a == b,
            _ => false,
        }
    }
}

impl VariableData {
    pub fn len(&self) -> usize {
        match self {
            VariableData::Float(v) => v.len(),
            VariableData::Flags(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub dims: Vec<String>,
    pub data: VariableData,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: Attributes,
}

impl Variable {
    pub fn float(name: impl Into<String>, dims: &[&str], values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            dims: dims.iter().map(|d| d.to_string()).collect(),
            data: VariableData::Float(values),
            attrs: Attributes::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn values(&self) -> Option<&[f64]> {
        match &self.data {
            VariableData::Float(v) => Some(v),
            VariableData::Flags(_) => None,
        }
    }

    pub fn values_mut(&mut self) -> Option<&mut Vec<f64>> {
        match &mut self.data {
            VariableData::Float(v) => Some(v),
            VariableData::Flags(_) => None,
        }
    }

    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attrs.get(key).and_then(serde_json::Value::as_f64)
    }

    pub fn fill_value(&self) -> Option<f64> {
        self.attr_f64(FILL_VALUE_ATTR)
    }

    pub fn is_companion(&self) -> bool {
        is_companion(&self.name)
    }
}

/// A labeled collection of variables, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub attrs: Attributes,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

pub fn is_companion(name: &str) -> bool {
    name.starts_with(QC_PREFIX)
}

pub fn companion_name(variable: &str) -> String {
    format!("{}{}", QC_PREFIX, variable)
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.insert(variable);
        self
    }

    /// Inserts a variable, replacing any variable of the same name in place.
    pub fn insert(&mut self, variable: Variable) {
        match self.variables.iter_mut().find(|v| v.name == variable.name) {
            Some(existing) => *existing = variable,
            None => self.variables.push(variable),
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.iter_mut().find(|v| v.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variable(name).is_some()
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    /// Variable names minus companion QC variables, in declaration order.
    pub fn non_qc_variable_names(&self) -> Vec<String> {
        self.variables
            .iter()
            .filter(|v| !v.is_companion())
            .map(|v| v.name.clone())
            .collect()
    }

    pub fn datastream(&self) -> Option<&str> {
        self.attrs.get(DATASTREAM_ATTR).and_then(|v| v.as_str())
    }

    pub fn set_datastream(&mut self, datastream: &str) {
        self.attrs
            .insert(DATASTREAM_ATTR.to_string(), datastream.to_string().into());
    }

    pub fn time_values(&self) -> Option<&[f64]> {
        self.variable(TIME).and_then(Variable::values)
    }

    /// First and last timestamps of the `time` variable.
    pub fn time_bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let times = self.time_values()?;
        let first = times.iter().find(|t| t.is_finite())?;
        let last = times.iter().rev().find(|t| t.is_finite())?;
        Some((to_datetime(*first)?, to_datetime(*last)?))
    }

    /// Concatenates datasets along the `time` dimension.
    ///
    /// Variables without a leading `time` dimension are taken from the first
    /// dataset. Time-dimensioned variables must exist in every dataset.
    pub fn concat_time(datasets: Vec<Dataset>) -> Result<Option<Dataset>, DomainError> {
        let mut iter = datasets.into_iter();
        let Some(mut merged) = iter.next() else {
            return Ok(None);
        };

        for next in iter {
            for variable in merged.variables.iter_mut() {
                if variable.dims.first().map(String::as_str) != Some(TIME) {
                    continue;
                }
                let other = next
                    .variable(&variable.name)
                    .ok_or_else(|| DomainError::VariableNotFound(variable.name.clone()))?;

                match (&mut variable.data, &other.data) {
                    (VariableData::Float(a), VariableData::Float(b)) => a.extend_from_slice(b),
                    (VariableData::Flags(a), VariableData::Flags(b)) => a.extend_from_slice(b),
                    _ => {
                        return Err(DomainError::DatasetError(format!(
                            "Variable '{}' changes type between concatenated datasets",
                            variable.name
                        )));
                    }
                }
            }
        }

        Ok(Some(merged))
    }
}

fn to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    let secs = seconds.floor();
    let nanos = ((seconds - secs) * 1e9).round() as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
}

// JSON has no NaN: missing values travel as null.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| if v.is_nan() { None } else { Some(*v) }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let raw: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::new()
            .with_attr(DATASTREAM_ATTR, "sgp.met.b1")
            .with_variable(Variable::float(TIME, &[TIME], vec![0.0, 60.0, 120.0]))
            .with_variable(Variable::float("temp", &[TIME], vec![50.0, 150.0, 90.0]))
            .with_variable(Variable::float("pressure", &[TIME], vec![1.0, 1.0, 1.0]))
            .with_variable(Variable {
                name: "qc_temp".into(),
                dims: vec![TIME.into()],
                data: VariableData::Flags(vec![0, 0, 0]),
                attrs: Attributes::new(),
            })
    }

    #[test]
    fn test_non_qc_variable_names_skips_companions() {
        let ds = sample();
        assert_eq!(
            ds.non_qc_variable_names(),
            vec!["time", "temp", "pressure"]
        );
        assert_eq!(ds.variable_names().len(), 4);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut ds = sample();
        ds.insert(Variable::float("temp", &[TIME], vec![1.0, 2.0, 3.0]));
        assert_eq!(ds.variable_names()[1], "temp");
        assert_eq!(ds.variable("temp").unwrap().values().unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_time_bounds() {
        let ds = sample();
        let (start, end) = ds.time_bounds().unwrap();
        assert_eq!(start.timestamp(), 0);
        assert_eq!(end.timestamp(), 120);
    }

    #[test]
    fn test_json_keeps_nan_as_null() {
        let ds = Dataset::new().with_variable(Variable::float("x", &[TIME], vec![1.0, f64::NAN]));
        let json = serde_json::to_string(&ds).unwrap();
        assert!(json.contains("null"));

        let back: Dataset = serde_json::from_str(&json).unwrap();
        let values = back.variable("x").unwrap().values().unwrap();
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());
    }

    #[test]
    fn test_concat_time_appends_time_variables() {
        let a = sample();
        let mut b = sample();
        b.insert(Variable::float(TIME, &[TIME], vec![180.0, 240.0, 300.0]));

        let merged = Dataset::concat_time(vec![a, b]).unwrap().unwrap();
        assert_eq!(merged.time_values().unwrap().len(), 6);
        match &merged.variable("qc_temp").unwrap().data {
            VariableData::Flags(f) => assert_eq!(f.len(), 6),
            _ => panic!("expected flags"),
        }
    }

    #[test]
    fn test_dataset_with_missing_values_equals_its_clone() {
        let ds = Dataset::new()
            .with_variable(Variable::float("temp", &[TIME], vec![1.0, f64::NAN]));
        assert_eq!(ds, ds.clone());

        let other = Dataset::new()
            .with_variable(Variable::float("temp", &[TIME], vec![1.0, 2.0]));
        assert_ne!(ds, other);
    }

    #[test]
    fn test_concat_time_empty_is_none() {
        assert!(Dataset::concat_time(vec![]).unwrap().is_none());
    }
}
