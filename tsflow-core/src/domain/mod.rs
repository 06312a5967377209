pub mod dataset;
pub mod error;
pub mod qc;

// Re-exports pratiques pour simplifier les imports ailleurs
pub use error::DomainError;
