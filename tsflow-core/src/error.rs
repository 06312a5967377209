// tsflow-core/src/error.rs

use crate::domain::error::DomainError;
use crate::infrastructure::error::InfrastructureError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum TsflowError {
    // --- DOMAIN ERRORS (QC rules, flags, datasets) ---
    #[error(transparent)]
    #[diagnostic(transparent)]
    Domain(#[from] DomainError),

    // --- INFRASTRUCTURE ERRORS (IO, parsing, storage) ---
    #[error(transparent)]
    #[diagnostic(transparent)]
    Infrastructure(#[from] InfrastructureError),
}

// Manual implementation to avoid duplicate enum variant but keep ergonomics
impl From<std::io::Error> for TsflowError {
    fn from(err: std::io::Error) -> Self {
        TsflowError::Infrastructure(InfrastructureError::Io(err))
    }
}

impl TsflowError {
    /// The domain error behind this error, if any.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            TsflowError::Domain(e) => Some(e),
            _ => None,
        }
    }
}
