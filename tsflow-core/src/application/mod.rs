// tsflow-core/src/application/mod.rs

pub mod pipeline;
pub mod validation;

// --- RE-EXPORTS (FACADE PATTERN) ---
// Lets the CLI write `use tsflow_core::application::{run_pipeline, validate_config};`
// without knowing the internal file layout.

pub use pipeline::{RunResult, run_pipeline};
pub use validation::{ValidationIssue, ValidationReport, validate_config};
