// tsflow-core/src/domain/qc/handler.rs
//
// Plugin contracts. Handlers are built once per test application from a
// read-only view of the data, then receive the dataset again on every call:
// nothing outlives the checker that owns them.

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::dataset::{Dataset, FailureMask};
use crate::domain::qc::definition::{Parameters, QcTestDefinition};

#[derive(Error, Debug, Diagnostic, PartialEq)]
pub enum HandlerError {
    #[error("Missing parameter '{0}'")]
    #[diagnostic(code(tsflow::qc::handler::missing_parameter))]
    MissingParameter(String),

    #[error("Invalid parameter '{name}': {reason}")]
    #[diagnostic(code(tsflow::qc::handler::invalid_parameter))]
    InvalidParameter { name: String, reason: String },

    #[error("Variable '{0}' not found")]
    #[diagnostic(code(tsflow::qc::handler::variable_not_found))]
    VariableNotFound(String),

    #[error("{0}")]
    #[diagnostic(code(tsflow::qc::handler::failed))]
    Failed(String),
}

/// Everything a handler factory may look at while building an instance.
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    pub dataset: &'a Dataset,
    pub previous: Option<&'a Dataset>,
    pub test: &'a QcTestDefinition,
    pub parameters: &'a Parameters,
}

impl HandlerContext<'_> {
    pub fn f64_param(&self, key: &str) -> Result<Option<f64>, HandlerError> {
        match self.parameters.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| HandlerError::InvalidParameter {
                    name: key.to_string(),
                    reason: format!("expected a number, got {}", value),
                }),
        }
    }
}

/// The check itself.
pub trait QcOperator: Send {
    /// Returns the failure mask of `variable`, aligned to its elements, or
    /// `None` when the test does not apply to it (nothing is recorded then).
    fn run(
        &mut self,
        dataset: &Dataset,
        previous: Option<&Dataset>,
        variable: &str,
    ) -> Result<Option<FailureMask>, HandlerError>;
}

/// Side effect invoked when at least one element of a variable failed.
pub trait QcErrorHandler: Send {
    fn run(
        &mut self,
        dataset: &mut Dataset,
        variable: &str,
        mask: &FailureMask,
    ) -> Result<(), HandlerError>;
}

/// A resolved error handler with the name it was declared under.
pub struct NamedErrorHandler {
    pub name: String,
    pub handler: Box<dyn QcErrorHandler>,
}
