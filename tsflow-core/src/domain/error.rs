// tsflow-core/src/domain/error.rs

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::qc::handler::HandlerError;

#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    // --- CONFIGURATION (fatal, raised before any side effect of the test) ---
    #[error(transparent)]
    #[diagnostic(transparent)]
    Configuration(#[from] ConfigurationError),

    // --- HANDLER LOOKUP ---
    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Handler '{reference}' could not be constructed for test '{test}': {source}")]
    #[diagnostic(
        code(tsflow::domain::qc::construction),
        help("Check the 'parameters' block of this handler in the pipeline config.")
    )]
    HandlerConstruction {
        test: String,
        reference: String,
        #[source]
        source: HandlerError,
    },

    // --- PER-VARIABLE RUNTIME FAILURES (aggregated per test) ---
    #[error("QC test '{test}' failed on {} variable(s): {}", .failures.len(), summarize(.failures))]
    #[diagnostic(code(tsflow::domain::qc::execution))]
    QcTestExecution {
        test: String,
        failures: Vec<VariableFailure>,
    },

    // --- DATASET ---
    #[error("Variable '{0}' not found in dataset")]
    #[diagnostic(code(tsflow::domain::dataset::variable_not_found))]
    VariableNotFound(String),

    #[error("Mask for '{variable}' has {actual} elements, the variable has {expected}")]
    #[diagnostic(code(tsflow::domain::dataset::shape))]
    ShapeMismatch {
        variable: String,
        expected: usize,
        actual: usize,
    },

    #[error("Dataset Error: {0}")]
    #[diagnostic(code(tsflow::domain::dataset))]
    DatasetError(String),
}

impl DomainError {
    /// Names of the variables that failed inside an aggregated execution error.
    pub fn failed_variables(&self) -> Vec<&str> {
        match self {
            DomainError::QcTestExecution { failures, .. } => {
                failures.iter().map(|f| f.variable.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Error, Debug, Diagnostic, PartialEq)]
pub enum ConfigurationError {
    #[error("Test '{test}' excludes '{variable}', which is not in its resolved variable set")]
    #[diagnostic(
        code(tsflow::domain::config::exclude),
        help("Remove '{variable}' from 'exclude' or add it to 'variables'.")
    )]
    UnknownExclude { test: String, variable: String },

    #[error("qc_bit {bit} is used by both '{first}' and '{second}'")]
    #[diagnostic(
        code(tsflow::domain::config::duplicate_bit),
        help("Every QC test applied to a dataset needs its own qc_bit.")
    )]
    DuplicateQcBit {
        bit: u32,
        first: String,
        second: String,
    },

    #[error("Test '{test}' declares qc_bit {bit}, valid bits are 1..=32")]
    #[diagnostic(code(tsflow::domain::config::invalid_bit))]
    InvalidQcBit { test: String, bit: u32 },

    #[error(
        "Bit {bit} of '{variable}' already records '{existing}', refusing to overwrite it with '{incoming}'"
    )]
    #[diagnostic(
        code(tsflow::domain::flags::collision),
        help("Two different tests share a qc_bit; the companion flags would be corrupted.")
    )]
    BitCollision {
        variable: String,
        bit: u32,
        existing: String,
        incoming: String,
    },

    #[error("Test '{test}' targets no variables")]
    #[diagnostic(code(tsflow::domain::config::empty_variables))]
    EmptyVariables { test: String },
}

#[derive(Error, Debug, Diagnostic, PartialEq)]
pub enum ResolutionError {
    #[error("Handler reference '{0}' is not of the form '<namespace>.<Symbol>'")]
    #[diagnostic(code(tsflow::domain::resolve::malformed))]
    MalformedReference(String),

    #[error("Namespace '{namespace}' of handler '{reference}' is not registered")]
    #[diagnostic(
        code(tsflow::domain::resolve::namespace),
        help("Register the plugin namespace on the HandlerRegistry before running the pipeline.")
    )]
    NamespaceNotFound { reference: String, namespace: String },

    #[error("'{symbol}' is not registered in namespace '{namespace}'")]
    #[diagnostic(code(tsflow::domain::resolve::symbol))]
    SymbolNotFound {
        reference: String,
        namespace: String,
        symbol: String,
    },
}

/// Where inside a test a variable failed.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureStage {
    Operator,
    ErrorHandler(String),
    Recording,
}

#[derive(Debug)]
pub struct VariableFailure {
    pub variable: String,
    pub stage: FailureStage,
    pub cause: String,
}

fn summarize(failures: &[VariableFailure]) -> String {
    failures
        .iter()
        .map(|f| match &f.stage {
            FailureStage::Operator => format!("{} (operator: {})", f.variable, f.cause),
            FailureStage::ErrorHandler(name) => {
                format!("{} (error handler '{}': {})", f.variable, name, f.cause)
            }
            FailureStage::Recording => format!("{} (recording: {})", f.variable, f.cause),
        })
        .collect::<Vec<_>>()
        .join("; ")
}
