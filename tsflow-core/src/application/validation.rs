// tsflow-core/src/application/validation.rs

use serde::Serialize;
use tracing::{debug, instrument};

use crate::domain::qc::{HandlerRegistry, QcTestDefinition};
use crate::infrastructure::config::PipelineConfig;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationIssue {
    /// Test the issue belongs to; `None` for suite-wide issues.
    pub test: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ValidationReport {
    pub datastream: String,
    pub tests: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Dry run of a pipeline config against a registry.
///
/// Reports every problem found instead of stopping at the first one: bits
/// shared by two tests, handler references the registry cannot resolve, and
/// excludes that can never match an explicit variable list. No dataset is
/// needed, so `ALL` excludes are only checked at run time.
#[instrument(skip_all, fields(datastream = %config.datastream))]
pub fn validate_config(config: &PipelineConfig, registry: &HandlerRegistry) -> ValidationReport {
    let mut report = ValidationReport {
        datastream: config.datastream.clone(),
        tests: config.qc_tests.len(),
        issues: Vec::new(),
    };

    if let Err(e) = config.qc_tests.check_bits() {
        report.issues.push(ValidationIssue {
            test: None,
            message: e.to_string(),
        });
    }

    for test in config.qc_tests.iter() {
        debug!(test = %test.name, "Validating test");
        for message in test_issues(test, registry) {
            report.issues.push(ValidationIssue {
                test: Some(test.name.clone()),
                message,
            });
        }
    }

    report
}

fn test_issues(test: &QcTestDefinition, registry: &HandlerRegistry) -> Vec<String> {
    let mut issues = Vec::new();

    if let Err(e) = registry.lookup_operator(&test.operator.classname) {
        issues.push(format!("operator: {}", e));
    }
    for (name, reference) in test.error_handlers.entries() {
        if let Err(e) = registry.lookup_error_handler(&reference.classname) {
            issues.push(format!("error handler '{}': {}", name, e));
        }
    }

    if !test.targets_all() {
        for excluded in &test.exclude {
            if !test.variables.contains(excluded) {
                issues.push(format!(
                    "excludes '{}', which is not one of its variables",
                    excluded
                ));
            }
        }
    }

    issues
}
