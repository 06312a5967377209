// tsflow-core/src/domain/qc/engine.rs

use std::collections::BTreeSet;
use tracing::{info, instrument};

use crate::domain::dataset::Dataset;
use crate::domain::error::DomainError;
use crate::domain::qc::checker::{QcChecker, TestReport};
use crate::domain::qc::definition::QcTestSuite;
use crate::domain::qc::registry::HandlerRegistry;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QcSummary {
    pub reports: Vec<TestReport>,
}

impl QcSummary {
    pub fn tests_applied(&self) -> usize {
        self.reports.len()
    }

    /// Variables with at least one failing element in any test.
    pub fn flagged_variables(&self) -> BTreeSet<&str> {
        self.reports
            .iter()
            .flat_map(|r| r.flagged.keys().map(String::as_str))
            .collect()
    }
}

/// Applies a test suite to a dataset, one test at a time in declaration order.
pub struct QcEngine<'r> {
    registry: &'r HandlerRegistry,
}

impl<'r> QcEngine<'r> {
    pub fn new(registry: &'r HandlerRegistry) -> Self {
        Self { registry }
    }

    /// Runs every test of `suite` against `dataset`.
    ///
    /// Bits are checked for the whole suite before the first test runs. Any
    /// error from a test (configuration, resolution or aggregated variable
    /// failures) stops the pass; tests already applied keep their flags.
    #[instrument(skip_all, fields(tests = suite.len(), datastream = dataset.datastream().unwrap_or("-")))]
    pub fn apply_tests(
        &self,
        dataset: &mut Dataset,
        suite: &QcTestSuite,
        previous: Option<&Dataset>,
    ) -> Result<QcSummary, DomainError> {
        suite.check_bits()?;

        let mut summary = QcSummary::default();
        for test in suite.iter() {
            info!(test = %test.name, bit = test.qc_bit, "Applying QC test");
            let report = QcChecker::new(dataset, previous, test, self.registry)?.run()?;
            summary.reports.push(report);
        }

        info!(
            applied = summary.tests_applied(),
            flagged = summary.flagged_variables().len(),
            "QC pass complete"
        );
        Ok(summary)
    }
}
