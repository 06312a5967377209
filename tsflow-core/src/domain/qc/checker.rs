// tsflow-core/src/domain/qc/checker.rs

use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

use crate::domain::dataset::{Dataset, FlagDefinition, FlagRecorder};
use crate::domain::error::{ConfigurationError, DomainError, FailureStage, VariableFailure};
use crate::domain::qc::definition::QcTestDefinition;
use crate::domain::qc::handler::{NamedErrorHandler, QcOperator};
use crate::domain::qc::registry::HandlerRegistry;

/// Outcome of one test applied to one dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestReport {
    pub test: String,
    pub qc_bit: u32,
    /// Variables whose result was written to their companion, in run order.
    pub recorded: Vec<String>,
    /// Variables the operator declared the test inapplicable to.
    pub skipped: Vec<String>,
    /// Failed element count per recorded variable, for variables with at least one failure.
    pub flagged: BTreeMap<String, usize>,
}

/// Expands the `ALL` sentinel and applies `exclude`.
///
/// `ALL` stands for every non-companion variable of `dataset`, in dataset
/// order. Explicit lists keep their declaration order (duplicates dropped).
/// Excluding a name that is not part of the resolved set is a configuration
/// error.
pub fn resolve_variables(
    test: &QcTestDefinition,
    dataset: &Dataset,
) -> Result<Vec<String>, ConfigurationError> {
    if test.variables.is_empty() {
        return Err(ConfigurationError::EmptyVariables {
            test: test.name.clone(),
        });
    }

    let mut variables: Vec<String> = if test.targets_all() {
        dataset.non_qc_variable_names()
    } else {
        let mut unique: Vec<String> = Vec::with_capacity(test.variables.len());
        for name in &test.variables {
            if !unique.contains(name) {
                unique.push(name.clone());
            }
        }
        unique
    };

    for excluded in &test.exclude {
        let Some(position) = variables.iter().position(|v| v == excluded) else {
            return Err(ConfigurationError::UnknownExclude {
                test: test.name.clone(),
                variable: excluded.clone(),
            });
        };
        variables.remove(position);
    }

    Ok(variables)
}

/// One test bound to one dataset.
///
/// Borrowing the dataset mutably for the checker's whole lifetime makes the
/// checker its only writer; `run` consumes the checker and hands it back.
pub struct QcChecker<'a> {
    dataset: &'a mut Dataset,
    previous: Option<&'a Dataset>,
    test: &'a QcTestDefinition,
    flag: FlagDefinition,
    variables: Vec<String>,
    operator: Box<dyn QcOperator>,
    error_handlers: Vec<NamedErrorHandler>,
}

impl<'a> QcChecker<'a> {
    /// Resolves variables, operator and error handlers. Every error raised
    /// here happens before the dataset is touched.
    #[instrument(skip_all, fields(test = %test.name))]
    pub fn new(
        dataset: &'a mut Dataset,
        previous: Option<&'a Dataset>,
        test: &'a QcTestDefinition,
        registry: &HandlerRegistry,
    ) -> Result<Self, DomainError> {
        let variables = resolve_variables(test, dataset)?;
        let flag = test.flag();
        check_collisions(dataset, &variables, &flag)?;

        let operator = registry.resolve_operator(&test.operator, dataset, previous, test)?;
        let error_handlers =
            registry.resolve_error_handlers(&test.error_handlers, dataset, previous, test)?;

        debug!(
            variables = ?variables,
            error_handlers = error_handlers.len(),
            "Checker ready"
        );

        Ok(Self {
            dataset,
            previous,
            test,
            flag,
            variables,
            operator,
            error_handlers,
        })
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Applies the test to every resolved variable in order.
    ///
    /// A variable whose operator, error handler or recording fails does not
    /// stop the others; those failures are returned together as
    /// [`DomainError::QcTestExecution`] once every variable has been visited.
    /// Configuration errors raised by the recorder abort immediately.
    #[instrument(skip_all, fields(test = %self.test.name, bit = self.test.qc_bit))]
    pub fn run(mut self) -> Result<TestReport, DomainError> {
        let mut report = TestReport {
            test: self.test.name.clone(),
            qc_bit: self.test.qc_bit,
            ..TestReport::default()
        };
        let mut failures: Vec<VariableFailure> = Vec::new();
        let variables = std::mem::take(&mut self.variables);

        for variable in variables {
            let Some(expected) = self.dataset.variable(&variable).map(|v| v.len()) else {
                warn!(variable = %variable, "Variable not found, skipping");
                failures.push(VariableFailure {
                    variable: variable.clone(),
                    stage: FailureStage::Operator,
                    cause: DomainError::VariableNotFound(variable).to_string(),
                });
                continue;
            };

            let mask = match self.operator.run(self.dataset, self.previous, &variable) {
                Ok(Some(mask)) => mask,
                Ok(None) => {
                    debug!(variable = %variable, "Test not applicable");
                    report.skipped.push(variable);
                    continue;
                }
                Err(e) => {
                    warn!(variable = %variable, error = %e, "Operator failed");
                    failures.push(VariableFailure {
                        variable,
                        stage: FailureStage::Operator,
                        cause: e.to_string(),
                    });
                    continue;
                }
            };

            if mask.len() != expected {
                let cause = DomainError::ShapeMismatch {
                    variable: variable.clone(),
                    expected,
                    actual: mask.len(),
                };
                warn!(variable = %variable, error = %cause, "Operator returned a misaligned mask");
                failures.push(VariableFailure {
                    variable,
                    stage: FailureStage::Operator,
                    cause: cause.to_string(),
                });
                continue;
            }

            let failed = mask.failed_count();
            if failed > 0 {
                for named in self.error_handlers.iter_mut() {
                    if let Err(e) = named.handler.run(self.dataset, &variable, &mask) {
                        warn!(variable = %variable, handler = %named.name, error = %e, "Error handler failed");
                        failures.push(VariableFailure {
                            variable: variable.clone(),
                            stage: FailureStage::ErrorHandler(named.name.clone()),
                            cause: e.to_string(),
                        });
                    }
                }
            }

            match self.dataset.record(&variable, &mask, &self.flag) {
                Ok(()) => {
                    debug!(variable = %variable, failed, "Recorded");
                    if failed > 0 {
                        report.flagged.insert(variable.clone(), failed);
                    }
                    report.recorded.push(variable);
                }
                Err(e @ DomainError::Configuration(_)) => return Err(e),
                Err(e) => failures.push(VariableFailure {
                    variable,
                    stage: FailureStage::Recording,
                    cause: e.to_string(),
                }),
            }
        }

        if !failures.is_empty() {
            return Err(DomainError::QcTestExecution {
                test: self.test.name.clone(),
                failures,
            });
        }

        info!(
            recorded = report.recorded.len(),
            skipped = report.skipped.len(),
            flagged = report.flagged.len(),
            "Test applied"
        );
        Ok(report)
    }
}

/// A bit already registered on a target companion by another test would be
/// rejected by the recorder; refuse it before any handler runs.
fn check_collisions(
    dataset: &Dataset,
    variables: &[String],
    flag: &FlagDefinition,
) -> Result<(), ConfigurationError> {
    for variable in variables {
        if let Some(existing) = dataset
            .flag_table(variable)
            .into_iter()
            .find(|e| e.bit == flag.bit && *e != *flag)
        {
            return Err(ConfigurationError::BitCollision {
                variable: variable.clone(),
                bit: flag.bit,
                existing: existing.meaning,
                incoming: flag.meaning.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::dataset::{Assessment, FailureMask, TIME, Variable, VariableData};
    use crate::domain::qc::definition::{ErrorHandlers, HandlerReference};
    use crate::domain::qc::handler::{HandlerError, QcErrorHandler};
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<String>>>;

    /// Flags values above `limit`; fails outright on variables named in `broken`.
    struct Above {
        limit: f64,
        broken: Vec<String>,
        calls: Calls,
    }

    impl QcOperator for Above {
        fn run(
            &mut self,
            dataset: &Dataset,
            _previous: Option<&Dataset>,
            variable: &str,
        ) -> Result<Option<FailureMask>, HandlerError> {
            self.calls.lock().unwrap().push(variable.to_string());
            if self.broken.iter().any(|b| b == variable) {
                return Err(HandlerError::Failed(format!("cannot check {}", variable)));
            }
            let Some(values) = dataset.variable(variable).and_then(|v| v.values()) else {
                return Ok(None);
            };
            if variable == TIME {
                return Ok(None);
            }
            Ok(Some(values.iter().map(|v| *v > self.limit).collect()))
        }
    }

    struct Spy {
        name: String,
        calls: Calls,
    }

    impl QcErrorHandler for Spy {
        fn run(
            &mut self,
            _dataset: &mut Dataset,
            variable: &str,
            mask: &FailureMask,
        ) -> Result<(), HandlerError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{}:{:?}", self.name, variable, mask.as_slice()));
            Ok(())
        }
    }

    /// Fails on `temp` only, after logging the call.
    struct RejectTemp {
        calls: Calls,
    }

    impl QcErrorHandler for RejectTemp {
        fn run(
            &mut self,
            _dataset: &mut Dataset,
            variable: &str,
            _mask: &FailureMask,
        ) -> Result<(), HandlerError> {
            self.calls.lock().unwrap().push(format!("reject:{}", variable));
            if variable == "temp" {
                return Err(HandlerError::Failed("temp rejected".into()));
            }
            Ok(())
        }
    }

    struct Harness {
        registry: HandlerRegistry,
        operator_calls: Calls,
        handler_calls: Calls,
    }

    fn harness(broken: &[&str]) -> Harness {
        let operator_calls: Calls = Arc::default();
        let handler_calls: Calls = Arc::default();
        let mut registry = HandlerRegistry::new();

        let calls = operator_calls.clone();
        let broken: Vec<String> = broken.iter().map(|s| s.to_string()).collect();
        registry
            .register_operator("test.operators.Above", move |ctx| {
                Ok(Box::new(Above {
                    limit: ctx.f64_param("limit")?.unwrap_or(100.0),
                    broken: broken.clone(),
                    calls: calls.clone(),
                }))
            })
            .unwrap();

        for name in ["Log", "Alert", "Fail"] {
            let calls = handler_calls.clone();
            registry
                .register_error_handler(&format!("test.handlers.{}", name), move |_| {
                    Ok(Box::new(Spy {
                        name: name.to_string(),
                        calls: calls.clone(),
                    }))
                })
                .unwrap();
        }

        let calls = handler_calls.clone();
        registry
            .register_error_handler("test.handlers.RejectTemp", move |_| {
                Ok(Box::new(RejectTemp {
                    calls: calls.clone(),
                }))
            })
            .unwrap();

        Harness {
            registry,
            operator_calls,
            handler_calls,
        }
    }

    fn dataset() -> Dataset {
        Dataset::new()
            .with_variable(Variable::float("temp", &[TIME], vec![50.0, 150.0, 90.0]))
            .with_variable(Variable::float("pressure", &[TIME], vec![1.0, 1.0, 1.0]))
            .with_variable(Variable {
                name: "qc_temp".into(),
                dims: vec![TIME.into()],
                data: VariableData::Flags(vec![0, 0, 0]),
                attrs: Default::default(),
            })
    }

    fn three_handlers() -> ErrorHandlers {
        ErrorHandlers::Many(vec![
            ("alert".into(), HandlerReference::new("test.handlers.Alert")),
            ("log".into(), HandlerReference::new("test.handlers.Log")),
            ("fail".into(), HandlerReference::new("test.handlers.Fail")),
        ])
    }

    fn above_test(name: &str, bit: u32) -> QcTestDefinition {
        QcTestDefinition::new(name, bit, HandlerReference::new("test.operators.Above"))
    }

    fn flags_of(ds: &Dataset, var: &str) -> Vec<u32> {
        match &ds.variable(&format!("qc_{}", var)).unwrap().data {
            VariableData::Flags(f) => f.clone(),
            _ => panic!("expected flags"),
        }
    }

    #[test]
    fn test_all_sentinel_drops_companions_and_excludes() {
        let ds = dataset()
            .with_variable(Variable::float("wind", &[TIME], vec![0.0; 3]));
        let mut test = above_test("t", 1);
        test.exclude = vec!["pressure".into()];

        assert_eq!(resolve_variables(&test, &ds).unwrap(), vec!["temp", "wind"]);
    }

    #[test]
    fn test_explicit_list_keeps_declaration_order() {
        let mut test = above_test("t", 1);
        test.variables = vec!["pressure".into(), "temp".into(), "pressure".into()];
        assert_eq!(
            resolve_variables(&test, &dataset()).unwrap(),
            vec!["pressure", "temp"]
        );
    }

    #[test]
    fn test_unknown_exclude_is_fatal_and_runs_nothing() {
        let h = harness(&[]);
        let mut ds = dataset();
        let mut test = above_test("t", 1);
        test.exclude = vec!["humidity".into()];

        let err = QcChecker::new(&mut ds, None, &test, &h.registry).err().unwrap();
        assert!(matches!(
            err,
            DomainError::Configuration(ConfigurationError::UnknownExclude { ref variable, .. })
                if variable == "humidity"
        ));
        assert!(h.operator_calls.lock().unwrap().is_empty());
        assert_eq!(ds, dataset());
    }

    #[test]
    fn test_end_to_end_flags_and_handlers() {
        let h = harness(&[]);
        let mut ds = dataset();
        let mut test = above_test("check_max", 1);
        test.description = "Value above 100".into();
        test.assessment = Assessment::Indeterminate;
        test.exclude = vec!["pressure".into()];
        test.error_handlers = three_handlers();

        let checker = QcChecker::new(&mut ds, None, &test, &h.registry).unwrap();
        assert_eq!(checker.variables(), &["temp".to_string()]);
        let report = checker.run().unwrap();

        assert_eq!(report.recorded, vec!["temp"]);
        assert_eq!(report.flagged.get("temp"), Some(&1));
        assert_eq!(flags_of(&ds, "temp"), vec![0, 1, 0]);
        assert_eq!(
            ds.flag_table("temp"),
            vec![FlagDefinition::new(1, "Value above 100", Assessment::Indeterminate)]
        );
        assert_eq!(
            *h.handler_calls.lock().unwrap(),
            vec![
                "Alert:temp:[false, true, false]",
                "Log:temp:[false, true, false]",
                "Fail:temp:[false, true, false]",
            ]
        );
    }

    #[test]
    fn test_no_failures_invokes_no_handler_but_records() {
        let h = harness(&[]);
        let mut ds = dataset();
        let mut test = above_test("t", 4);
        test.variables = vec!["pressure".into()];
        test.error_handlers = three_handlers();

        let report = QcChecker::new(&mut ds, None, &test, &h.registry)
            .unwrap()
            .run()
            .unwrap();

        assert!(h.handler_calls.lock().unwrap().is_empty());
        assert_eq!(report.recorded, vec!["pressure"]);
        assert!(report.flagged.is_empty());
        assert_eq!(flags_of(&ds, "pressure"), vec![0, 0, 0]);
        assert_eq!(ds.flag_table("pressure")[0].bit, 4);
    }

    #[test]
    fn test_skipped_variable_is_not_recorded() {
        let h = harness(&[]);
        let mut ds = dataset()
            .with_variable(Variable::float(TIME, &[TIME], vec![0.0, 60.0, 120.0]));
        let mut test = above_test("t", 1);
        test.variables = vec![TIME.into()];
        test.error_handlers = three_handlers();

        let report = QcChecker::new(&mut ds, None, &test, &h.registry)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(report.skipped, vec![TIME]);
        assert!(!ds.contains("qc_time"));
        assert!(h.handler_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failing_variable_does_not_stop_the_next() {
        let h = harness(&["temp"]);
        let mut ds = dataset();
        let mut test = above_test("t", 2);
        test.variables = vec!["temp".into(), "pressure".into()];

        let err = QcChecker::new(&mut ds, None, &test, &h.registry)
            .unwrap()
            .run()
            .unwrap_err();

        assert_eq!(err.failed_variables(), vec!["temp"]);
        assert_eq!(*h.operator_calls.lock().unwrap(), vec!["temp", "pressure"]);
        assert_eq!(ds.flag_table("pressure")[0].bit, 2);
        assert!(ds.flag_table("temp").is_empty());
    }

    #[test]
    fn test_missing_variable_is_a_variable_failure() {
        let h = harness(&[]);
        let mut ds = dataset();
        let mut test = above_test("t", 1);
        test.variables = vec!["humidity".into(), "temp".into()];

        let err = QcChecker::new(&mut ds, None, &test, &h.registry)
            .unwrap()
            .run()
            .unwrap_err();
        assert_eq!(err.failed_variables(), vec!["humidity"]);
        assert_eq!(flags_of(&ds, "temp"), vec![0, 1, 0]);
    }

    #[test]
    fn test_bit_owned_by_another_test_is_refused_up_front() {
        let h = harness(&[]);
        let mut ds = dataset();
        let mut first = above_test("first", 1);
        first.variables = vec!["temp".into()];
        QcChecker::new(&mut ds, None, &first, &h.registry)
            .unwrap()
            .run()
            .unwrap();

        let mut second = above_test("second", 1);
        second.variables = vec!["temp".into()];
        second.error_handlers = three_handlers();
        let err = QcChecker::new(&mut ds, None, &second, &h.registry).err().unwrap();

        assert!(matches!(
            err,
            DomainError::Configuration(ConfigurationError::BitCollision { bit: 1, .. })
        ));
        assert_eq!(flags_of(&ds, "temp"), vec![0, 1, 0]);
        assert!(h.handler_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unregistered_operator_is_fatal() {
        let h = harness(&[]);
        let mut ds = dataset();
        let test = QcTestDefinition::new("t", 1, HandlerReference::new("test.operators.Nope"));
        assert!(matches!(
            QcChecker::new(&mut ds, None, &test, &h.registry).err().unwrap(),
            DomainError::Resolution(_)
        ));
    }

    #[test]
    fn test_failing_handler_on_one_variable_does_not_stop_the_next() {
        let h = harness(&[]);
        let mut ds = dataset();
        ds.insert(Variable::float("pressure", &[TIME], vec![200.0, 1.0, 300.0]));
        let mut test = above_test("t", 1);
        test.variables = vec!["temp".into(), "pressure".into()];
        test.error_handlers = ErrorHandlers::Many(vec![
            ("reject".into(), HandlerReference::new("test.handlers.RejectTemp")),
            ("log".into(), HandlerReference::new("test.handlers.Log")),
        ]);

        let err = QcChecker::new(&mut ds, None, &test, &h.registry)
            .unwrap()
            .run()
            .unwrap_err();

        assert_eq!(err.failed_variables(), vec!["temp"]);
        let DomainError::QcTestExecution { failures, .. } = &err else {
            panic!("expected an execution error, got {:?}", err);
        };
        assert_eq!(failures[0].stage, FailureStage::ErrorHandler("reject".into()));

        assert_eq!(
            *h.handler_calls.lock().unwrap(),
            vec![
                "reject:temp",
                "Log:temp:[false, true, false]",
                "reject:pressure",
                "Log:pressure:[true, false, true]",
            ]
        );
        assert_eq!(flags_of(&ds, "temp"), vec![0, 1, 0]);
        assert_eq!(flags_of(&ds, "pressure"), vec![1, 0, 1]);
    }
}
