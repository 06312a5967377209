// tsflow-core/src/domain/dataset/flags.rs
//
// Bit-packed companion flags. Bit `n` of `qc_<var>` is set on every element
// that failed the test registered under `n`; the bit -> (meaning, assessment)
// table lives in the companion's attributes so it travels with the data.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::{Attributes, Dataset, FailureMask, Variable, VariableData, companion_name};
use crate::domain::error::{ConfigurationError, DomainError};

/// Flags are stored as `u32`.
pub const MAX_QC_BIT: u32 = 32;

const FLAG_MASKS: &str = "flag_masks";
const FLAG_MEANINGS: &str = "flag_meanings";
const FLAG_ASSESSMENTS: &str = "flag_assessments";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum Assessment {
    #[default]
    Bad,
    Indeterminate,
}

impl fmt::Display for Assessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assessment::Bad => write!(f, "bad"),
            Assessment::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

impl Assessment {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "bad" => Some(Assessment::Bad),
            "indeterminate" => Some(Assessment::Indeterminate),
            _ => None,
        }
    }
}

/// What one bit of a companion variable means.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagDefinition {
    pub bit: u32,
    pub meaning: String,
    pub assessment: Assessment,
}

impl FlagDefinition {
    pub fn new(bit: u32, meaning: impl Into<String>, assessment: Assessment) -> Self {
        Self {
            bit,
            meaning: meaning.into(),
            assessment,
        }
    }

    pub fn mask(&self) -> Option<u32> {
        (1..=MAX_QC_BIT)
            .contains(&self.bit)
            .then(|| 1u32 << (self.bit - 1))
    }

    fn same_test(&self, other: &FlagDefinition) -> bool {
        self.meaning == other.meaning && self.assessment == other.assessment
    }
}

/// Sink for per-element test outcomes.
pub trait FlagRecorder {
    /// Writes `mask` into bit `flag.bit` of the companion of `variable`,
    /// creating the companion (all bits clear) on first use.
    ///
    /// Re-recording the same test is idempotent. A bit already owned by a
    /// different test is rejected with [`ConfigurationError::BitCollision`]
    /// before any element is touched.
    fn record(
        &mut self,
        variable: &str,
        mask: &FailureMask,
        flag: &FlagDefinition,
    ) -> Result<(), DomainError>;
}

impl FlagRecorder for Dataset {
    fn record(
        &mut self,
        variable: &str,
        mask: &FailureMask,
        flag: &FlagDefinition,
    ) -> Result<(), DomainError> {
        let bit_mask = flag.mask().ok_or_else(|| ConfigurationError::InvalidQcBit {
            test: flag.meaning.clone(),
            bit: flag.bit,
        })?;

        let parent = self
            .variable(variable)
            .ok_or_else(|| DomainError::VariableNotFound(variable.to_string()))?;
        let expected = parent.len();
        if mask.len() != expected {
            return Err(DomainError::ShapeMismatch {
                variable: variable.to_string(),
                expected,
                actual: mask.len(),
            });
        }
        let dims = parent.dims.clone();

        let qc_name = companion_name(variable);
        let already_registered = match self.variable(&qc_name) {
            Some(companion) => {
                if companion.len() != expected {
                    return Err(DomainError::ShapeMismatch {
                        variable: qc_name,
                        expected,
                        actual: companion.len(),
                    });
                }
                match flag_table_of(companion).into_iter().find(|e| e.bit == flag.bit) {
                    Some(existing) if existing.same_test(flag) => true,
                    Some(existing) => {
                        return Err(ConfigurationError::BitCollision {
                            variable: variable.to_string(),
                            bit: flag.bit,
                            existing: existing.meaning,
                            incoming: flag.meaning.clone(),
                        }
                        .into());
                    }
                    None => false,
                }
            }
            None => {
                self.insert(new_companion(variable, &qc_name, dims, expected));
                if let Some(parent) = self.variable_mut(variable) {
                    parent
                        .attrs
                        .insert("ancillary_variables".into(), qc_name.clone().into());
                }
                false
            }
        };

        let companion = self
            .variable_mut(&qc_name)
            .ok_or_else(|| DomainError::VariableNotFound(qc_name.clone()))?;

        let VariableData::Flags(bits) = &mut companion.data else {
            return Err(DomainError::DatasetError(format!(
                "Companion '{}' does not hold integer flags",
                qc_name
            )));
        };
        for (value, failed) in bits.iter_mut().zip(mask.iter()) {
            if failed {
                *value |= bit_mask;
            } else {
                *value &= !bit_mask;
            }
        }

        if !already_registered {
            push_entry(&mut companion.attrs, flag, bit_mask);
        }

        Ok(())
    }
}

impl Dataset {
    /// Bits registered on the companion of `variable`, in registration order.
    pub fn flag_table(&self, variable: &str) -> Vec<FlagDefinition> {
        self.variable(&companion_name(variable))
            .map(flag_table_of)
            .unwrap_or_default()
    }

    /// Elements of `variable` that failed the test registered under `bit`.
    pub fn failed_elements(&self, variable: &str, bit: u32) -> Option<FailureMask> {
        let bit_mask = FlagDefinition::new(bit, "", Assessment::Bad).mask()?;
        let companion = self.variable(&companion_name(variable))?;
        match &companion.data {
            VariableData::Flags(bits) => Some(bits.iter().map(|b| b & bit_mask != 0).collect()),
            VariableData::Float(_) => None,
        }
    }
}

fn new_companion(parent: &str, qc_name: &str, dims: Vec<String>, len: usize) -> Variable {
    let mut attrs = Attributes::new();
    attrs.insert(
        "long_name".into(),
        format!("Quality check results on variable: {}", parent).into(),
    );
    attrs.insert("units".into(), "1".into());
    attrs.insert("standard_name".into(), "quality_flag".into());
    attrs.insert(FLAG_MASKS.into(), Value::Array(vec![]));
    attrs.insert(FLAG_MEANINGS.into(), Value::Array(vec![]));
    attrs.insert(FLAG_ASSESSMENTS.into(), Value::Array(vec![]));

    Variable {
        name: qc_name.to_string(),
        dims,
        data: VariableData::Flags(vec![0; len]),
        attrs,
    }
}

fn push_entry(attrs: &mut Attributes, flag: &FlagDefinition, bit_mask: u32) {
    append(attrs, FLAG_MASKS, bit_mask.into());
    append(attrs, FLAG_MEANINGS, flag.meaning.clone().into());
    append(attrs, FLAG_ASSESSMENTS, flag.assessment.to_string().into());
}

fn append(attrs: &mut Attributes, key: &str, value: Value) {
    let slot = attrs
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(vec![]));
    match slot {
        Value::Array(list) => list.push(value),
        other => *other = Value::Array(vec![value]),
    }
}

fn flag_table_of(companion: &Variable) -> Vec<FlagDefinition> {
    let list = |key: &str| -> Vec<Value> {
        match companion.attrs.get(key) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    };

    let masks = list(FLAG_MASKS);
    let meanings = list(FLAG_MEANINGS);
    let assessments = list(FLAG_ASSESSMENTS);

    masks
        .iter()
        .zip(meanings.iter())
        .zip(assessments.iter())
        .filter_map(|((mask, meaning), assessment)| {
            let mask = mask.as_u64().filter(|m| m.is_power_of_two())?;
            Some(FlagDefinition {
                bit: mask.trailing_zeros() + 1,
                meaning: meaning.as_str()?.to_string(),
                assessment: Assessment::parse(assessment.as_str()?)?,
            })
        })
        .collect()
}
