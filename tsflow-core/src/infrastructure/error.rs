// tsflow-core/src/infrastructure/error.rs

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum InfrastructureError {
    // --- FILESYSTEM (IO) ---
    #[error("File System Error: {0}")]
    #[diagnostic(
        code(tsflow::infra::io),
        help("Check file permissions or path validity.")
    )]
    Io(#[from] std::io::Error),

    #[error("Failed to read '{path}': {source}")]
    #[diagnostic(code(tsflow::infra::read))]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // --- CONFIG / YAML ---
    #[error("YAML Parsing Error: {0}")]
    #[diagnostic(
        code(tsflow::infra::yaml),
        help("Check your YAML syntax (indentation, types).")
    )]
    YamlError(#[from] serde_yaml::Error),

    #[error("Configuration Error: {0}")]
    #[diagnostic(code(tsflow::infra::config))]
    ConfigError(String),

    #[error("Pipeline configuration not found at '{0}'")]
    #[diagnostic(code(tsflow::infra::config_missing))]
    ConfigNotFound(String),

    #[error("Invalid configuration in '{section}': {details}")]
    #[diagnostic(
        code(tsflow::infra::config_invalid),
        help("Fix the listed fields; every QC test needs a description, a qc_bit in 1..=32 and at least one variable.")
    )]
    Validation { section: String, details: String },

    // --- DATASETS (JSON) ---
    #[error("Dataset JSON Error: {0}")]
    #[diagnostic(code(tsflow::infra::json))]
    JsonError(#[from] serde_json::Error),

    #[error("Dataset file '{path}' is not valid JSON: {source}")]
    #[diagnostic(code(tsflow::infra::dataset_file))]
    DatasetFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // --- STORAGE ---
    #[error("Storage Error: {0}")]
    #[diagnostic(
        code(tsflow::infra::storage),
        help("Datasets need a 'datastream' attribute and a 'time' variable to be stored.")
    )]
    StorageError(String),
}

impl InfrastructureError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        InfrastructureError::ReadFile {
            path: path.into(),
            source,
        }
    }
}
