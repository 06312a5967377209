// tsflow-core/src/domain/qc/definition.rs

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use validator::{Validate, ValidationError};

use crate::domain::dataset::{Assessment, FlagDefinition};
use crate::domain::error::ConfigurationError;

/// Sentinel in `variables` meaning "every non-companion variable of the dataset".
pub const ALL_VARIABLES: &str = "ALL";

pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Late-bound pointer to a plugin: `<namespace>.<Symbol>` plus its parameters.
#[derive(Debug, Deserialize, Validate, Clone, PartialEq)]
pub struct HandlerReference {
    #[validate(length(min = 1, message = "classname cannot be empty"))]
    pub classname: String,
    #[serde(default)]
    pub parameters: Parameters,
}

impl HandlerReference {
    pub fn new(classname: impl Into<String>) -> Self {
        Self {
            classname: classname.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }
}

/// Failure actions of a test, normalized at parse time.
///
/// A mapping with a top-level `classname` is a single reference; any other
/// mapping is a named set of references, invoked in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ErrorHandlers {
    #[default]
    None,
    Single(HandlerReference),
    Many(Vec<(String, HandlerReference)>),
}

impl ErrorHandlers {
    /// `(name, reference)` pairs in invocation order. A single handler is named
    /// after its classname.
    pub fn entries(&self) -> Vec<(&str, &HandlerReference)> {
        match self {
            ErrorHandlers::None => Vec::new(),
            ErrorHandlers::Single(reference) => vec![(reference.classname.as_str(), reference)],
            ErrorHandlers::Many(named) => named.iter().map(|(n, r)| (n.as_str(), r)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ErrorHandlers::None => true,
            ErrorHandlers::Single(_) => false,
            ErrorHandlers::Many(named) => named.is_empty(),
        }
    }
}

impl<'de> Deserialize<'de> for ErrorHandlers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HandlersVisitor;

        impl<'de> Visitor<'de> for HandlersVisitor {
            type Value = ErrorHandlers;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a handler reference or a mapping of named handler references")
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(ErrorHandlers::None)
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(ErrorHandlers::None)
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
                d.deserialize_map(self)
            }

            // Buffered so the shape is decided on the presence of `classname`
            // and a malformed entry reports its own field error.
            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, serde_json::Value)> = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, serde_json::Value>()? {
                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(de::Error::custom(format!("duplicate key '{}'", key)));
                    }
                    entries.push((key, value));
                }

                if entries.iter().any(|(k, _)| k == "classname") {
                    let object = entries.into_iter().collect::<serde_json::Map<_, _>>();
                    return HandlerReference::deserialize(serde_json::Value::Object(object))
                        .map(ErrorHandlers::Single)
                        .map_err(de::Error::custom);
                }

                entries
                    .into_iter()
                    .map(|(name, value)| {
                        HandlerReference::deserialize(value)
                            .map(|reference| (name.clone(), reference))
                            .map_err(|e| {
                                <A::Error as de::Error>::custom(format!(
                                    "error handler '{}': {}",
                                    name, e
                                ))
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(ErrorHandlers::Many)
            }
        }

        deserializer.deserialize_option(HandlersVisitor)
    }
}

#[derive(Debug, Deserialize, Validate, Clone)]
#[validate(schema(function = "validate_error_handlers"))]
pub struct QcTestDefinition {
    /// Key of the test in the `qc_tests` mapping.
    #[serde(skip)]
    pub name: String,

    #[validate(length(min = 1, message = "description cannot be empty"))]
    pub description: String,

    #[serde(default)]
    pub assessment: Assessment,

    #[validate(range(min = 1, max = 32))]
    pub qc_bit: u32,

    #[validate(length(min = 1, message = "a test needs at least one variable"))]
    pub variables: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    #[validate(nested)]
    pub operator: HandlerReference,

    #[serde(default)]
    pub error_handlers: ErrorHandlers,
}

impl QcTestDefinition {
    pub fn new(name: &str, qc_bit: u32, operator: HandlerReference) -> Self {
        Self {
            name: name.to_string(),
            description: name.to_string(),
            assessment: Assessment::Bad,
            qc_bit,
            variables: vec![ALL_VARIABLES.to_string()],
            exclude: Vec::new(),
            operator,
            error_handlers: ErrorHandlers::None,
        }
    }

    pub fn targets_all(&self) -> bool {
        self.variables.iter().any(|v| v == ALL_VARIABLES)
    }

    pub fn flag(&self) -> FlagDefinition {
        FlagDefinition::new(self.qc_bit, self.description.clone(), self.assessment)
    }
}

fn validate_error_handlers(test: &QcTestDefinition) -> Result<(), ValidationError> {
    if test
        .error_handlers
        .entries()
        .iter()
        .any(|(_, r)| r.classname.trim().is_empty())
    {
        return Err(ValidationError::new("empty_classname"));
    }
    Ok(())
}

/// Tests of one pipeline, in declaration order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Ordered<QcTestDefinition>")]
pub struct QcTestSuite {
    tests: Vec<QcTestDefinition>,
}

impl From<Ordered<QcTestDefinition>> for QcTestSuite {
    fn from(ordered: Ordered<QcTestDefinition>) -> Self {
        let tests = ordered
            .0
            .into_iter()
            .map(|(name, mut test)| {
                test.name = name;
                test
            })
            .collect();
        Self { tests }
    }
}

impl QcTestSuite {
    pub fn new(tests: Vec<QcTestDefinition>) -> Self {
        Self { tests }
    }

    pub fn iter(&self) -> impl Iterator<Item = &QcTestDefinition> {
        self.tests.iter()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&QcTestDefinition> {
        self.tests.iter().find(|t| t.name == name)
    }

    /// Field validation of every test; reports the first invalid one.
    pub fn validate_tests(&self) -> Result<(), (&str, validator::ValidationErrors)> {
        for test in &self.tests {
            test.validate().map_err(|e| (test.name.as_str(), e))?;
        }
        Ok(())
    }

    /// Rejects bits outside 1..=32 and bits shared by two tests.
    pub fn check_bits(&self) -> Result<(), ConfigurationError> {
        let mut owners: HashMap<u32, &str> = HashMap::new();
        for test in &self.tests {
            if test.flag().mask().is_none() {
                return Err(ConfigurationError::InvalidQcBit {
                    test: test.name.clone(),
                    bit: test.qc_bit,
                });
            }
            if let Some(first) = owners.insert(test.qc_bit, &test.name) {
                return Err(ConfigurationError::DuplicateQcBit {
                    bit: test.qc_bit,
                    first: first.to_string(),
                    second: test.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A mapping deserialized into `(key, value)` pairs, keeping source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ordered<T>(pub Vec<(String, T)>);

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Ordered<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = Ordered<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries: Vec<(String, T)> = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(de::Error::custom(format!("duplicate key '{}'", key)));
                    }
                    entries.push((key, value));
                }
                Ok(Ordered(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SUITE: &str = r#"
zz_first:
  description: "Missing value"
  assessment: indeterminate
  qc_bit: 2
  variables: [ALL]
  exclude: [time]
  operator:
    classname: tsflow.qc.operators.CheckMissing
aa_second:
  description: "Above max"
  qc_bit: 1
  variables: [temp]
  operator:
    classname: tsflow.qc.operators.CheckMax
    parameters:
      value: 100
  error_handlers:
    classname: tsflow.qc.error_handlers.RecordWarning
mm_third:
  description: "Below min"
  qc_bit: 3
  variables: [temp]
  operator:
    classname: tsflow.qc.operators.CheckMin
  error_handlers:
    log:
      classname: tsflow.qc.error_handlers.RecordWarning
    remove:
      classname: tsflow.qc.error_handlers.RemoveFailedValues
    abort:
      classname: tsflow.qc.error_handlers.FailPipeline
"#;

    #[test]
    fn test_suite_keeps_declaration_order() {
        let suite: QcTestSuite = serde_yaml::from_str(SUITE).unwrap();
        let names: Vec<_> = suite.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["zz_first", "aa_second", "mm_third"]);
        assert!(suite.validate_tests().is_ok());
        assert!(suite.check_bits().is_ok());
    }

    #[test]
    fn test_error_handler_shapes() {
        let suite: QcTestSuite = serde_yaml::from_str(SUITE).unwrap();

        assert_eq!(suite.get("zz_first").unwrap().error_handlers, ErrorHandlers::None);

        let single = &suite.get("aa_second").unwrap().error_handlers;
        assert!(matches!(single, ErrorHandlers::Single(r) if r.classname.ends_with("RecordWarning")));

        let many = suite.get("mm_third").unwrap().error_handlers.entries();
        let names: Vec<_> = many.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["log", "remove", "abort"]);
    }

    #[test]
    fn test_operator_parameters_and_assessment() {
        let suite: QcTestSuite = serde_yaml::from_str(SUITE).unwrap();
        let max = suite.get("aa_second").unwrap();
        assert_eq!(max.operator.parameters["value"], 100);
        assert_eq!(max.assessment, Assessment::Bad);
        assert_eq!(
            suite.get("zz_first").unwrap().assessment,
            Assessment::Indeterminate
        );
        assert!(suite.get("zz_first").unwrap().targets_all());
    }

    #[test]
    fn test_duplicate_bits_rejected() {
        let op = HandlerReference::new("tsflow.qc.operators.CheckMissing");
        let suite = QcTestSuite::new(vec![
            QcTestDefinition::new("a", 1, op.clone()),
            QcTestDefinition::new("b", 1, op),
        ]);
        assert_eq!(
            suite.check_bits().unwrap_err(),
            ConfigurationError::DuplicateQcBit {
                bit: 1,
                first: "a".into(),
                second: "b".into(),
            }
        );
    }

    #[test]
    fn test_validation_rejects_bad_bit_and_empty_variables() {
        let mut test = QcTestDefinition::new("a", 33, HandlerReference::new("x.Y"));
        test.variables.clear();
        let errors = test.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("qc_bit"));
        assert!(fields.contains_key("variables"));
    }

    #[test]
    fn test_duplicate_test_names_rejected() {
        let yaml = "a: {description: d, qc_bit: 1, variables: [x], operator: {classname: a.B}}\n\
                    a: {description: d, qc_bit: 2, variables: [x], operator: {classname: a.B}}\n";
        assert!(serde_yaml::from_str::<QcTestSuite>(yaml).is_err());
    }

    #[test]
    fn test_misspelled_handler_field_is_reported() {
        let yaml = "a:\n  description: d\n  qc_bit: 1\n  variables: [x]\n  operator: {classname: a.B}\n  error_handlers:\n    warn: {classnme: a.C}\n";
        let err = serde_yaml::from_str::<QcTestSuite>(yaml).unwrap_err().to_string();
        assert!(err.contains("error handler 'warn'"), "{}", err);
        assert!(err.contains("classname"), "{}", err);
    }

    #[test]
    fn test_null_error_handlers_is_none() {
        let yaml = "a: {description: d, qc_bit: 1, variables: [x], operator: {classname: a.B}, error_handlers: ~}\n";
        let suite: QcTestSuite = serde_yaml::from_str(yaml).unwrap();
        assert!(suite.get("a").unwrap().error_handlers.is_empty());
    }

    #[test]
    fn test_empty_handler_classname_rejected() {
        let mut test = QcTestDefinition::new("a", 1, HandlerReference::new("x.Y"));
        test.error_handlers = ErrorHandlers::Many(vec![("warn".into(), HandlerReference::new(" "))]);
        assert!(test.validate().is_err());
        test.error_handlers = ErrorHandlers::Single(HandlerReference::new("x.Z"));
        assert!(test.validate().is_ok());
    }
}
