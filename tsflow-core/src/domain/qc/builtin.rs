// tsflow-core/src/domain/qc/builtin.rs
//
// Reference plugins shipped with the registry. Pipelines are free to register
// their own under any other namespace.

use tracing::warn;

use crate::domain::dataset::{Dataset, FailureMask, Variable};
use crate::domain::qc::handler::{HandlerContext, HandlerError, QcErrorHandler, QcOperator};
use crate::domain::qc::registry::HandlerRegistry;

pub const OPERATORS: &str = "tsflow.qc.operators";
pub const ERROR_HANDLERS: &str = "tsflow.qc.error_handlers";

pub(crate) fn register_builtins(registry: &mut HandlerRegistry) {
    // The references below are well-formed constants; registration cannot fail.
    let operators: [(&str, fn(&HandlerContext<'_>) -> Result<Box<dyn QcOperator>, HandlerError>); 4] = [
        ("CheckMissing", |_| Ok(Box::new(CheckMissing))),
        ("CheckMin", |ctx| Ok(Box::new(CheckBound::from_context(ctx, Bound::Min)?))),
        ("CheckMax", |ctx| Ok(Box::new(CheckBound::from_context(ctx, Bound::Max)?))),
        ("CheckMonotonic", |_| Ok(Box::new(CheckMonotonic))),
    ];
    for (symbol, factory) in operators {
        let _ = registry.register_operator(&format!("{}.{}", OPERATORS, symbol), factory);
    }

    let handlers: [(&str, fn(&HandlerContext<'_>) -> Result<Box<dyn QcErrorHandler>, HandlerError>); 3] = [
        ("RecordWarning", |ctx| Ok(Box::new(RecordWarning::from_context(ctx)))),
        ("FailPipeline", |ctx| Ok(Box::new(FailPipeline::from_context(ctx)?))),
        ("RemoveFailedValues", |_| Ok(Box::new(RemoveFailedValues))),
    ];
    for (symbol, factory) in handlers {
        let _ = registry.register_error_handler(&format!("{}.{}", ERROR_HANDLERS, symbol), factory);
    }
}

fn float_values<'d>(dataset: &'d Dataset, variable: &str) -> Result<Option<&'d [f64]>, HandlerError> {
    dataset
        .variable(variable)
        .map(Variable::values)
        .ok_or_else(|| HandlerError::VariableNotFound(variable.to_string()))
}

// --- OPERATORS ---

/// Fails elements that are NaN or equal to the variable's `_FillValue`.
pub struct CheckMissing;

impl QcOperator for CheckMissing {
    fn run(
        &mut self,
        dataset: &Dataset,
        _previous: Option<&Dataset>,
        variable: &str,
    ) -> Result<Option<FailureMask>, HandlerError> {
        let Some(values) = float_values(dataset, variable)? else {
            return Ok(None);
        };
        let fill = dataset.variable(variable).and_then(Variable::fill_value);
        Ok(Some(
            values
                .iter()
                .map(|v| v.is_nan() || fill.is_some_and(|f| *v == f))
                .collect(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Bound {
    Min,
    Max,
}

impl Bound {
    fn attribute(self) -> &'static str {
        match self {
            Bound::Min => "valid_min",
            Bound::Max => "valid_max",
        }
    }
}

/// Compares values to `parameters.value`, or to the variable's
/// `valid_min`/`valid_max` when no value is configured. Variables without
/// either are not applicable. Missing values never fail a bound.
pub struct CheckBound {
    bound: Bound,
    value: Option<f64>,
}

impl CheckBound {
    fn from_context(ctx: &HandlerContext<'_>, bound: Bound) -> Result<Self, HandlerError> {
        Ok(Self {
            bound,
            value: ctx.f64_param("value")?,
        })
    }
}

impl QcOperator for CheckBound {
    fn run(
        &mut self,
        dataset: &Dataset,
        _previous: Option<&Dataset>,
        variable: &str,
    ) -> Result<Option<FailureMask>, HandlerError> {
        let Some(values) = float_values(dataset, variable)? else {
            return Ok(None);
        };
        let Some(limit) = self
            .value
            .or_else(|| dataset.variable(variable)?.attr_f64(self.bound.attribute()))
        else {
            return Ok(None);
        };
        let fill = dataset.variable(variable).and_then(Variable::fill_value);

        Ok(Some(
            values
                .iter()
                .map(|v| {
                    if v.is_nan() || fill == Some(*v) {
                        return false;
                    }
                    match self.bound {
                        Bound::Min => *v < limit,
                        Bound::Max => *v > limit,
                    }
                })
                .collect(),
        ))
    }
}

/// Fails elements that do not strictly increase over the previous valid
/// element. The series continues from the last value of the same variable in
/// the previous dataset, when one is given.
pub struct CheckMonotonic;

impl QcOperator for CheckMonotonic {
    fn run(
        &mut self,
        dataset: &Dataset,
        previous: Option<&Dataset>,
        variable: &str,
    ) -> Result<Option<FailureMask>, HandlerError> {
        let Some(values) = float_values(dataset, variable)? else {
            return Ok(None);
        };

        let mut last = previous
            .and_then(|p| p.variable(variable))
            .and_then(Variable::values)
            .and_then(|v| v.iter().rev().find(|x| !x.is_nan()).copied());

        Ok(Some(
            values
                .iter()
                .map(|v| {
                    if v.is_nan() {
                        return false;
                    }
                    let failed = last.is_some_and(|l| *v <= l);
                    if !failed {
                        last = Some(*v);
                    }
                    failed
                })
                .collect(),
        ))
    }
}

// --- ERROR HANDLERS ---

/// Emits a structured warning per failing variable.
pub struct RecordWarning {
    test: String,
    description: String,
}

impl RecordWarning {
    fn from_context(ctx: &HandlerContext<'_>) -> Self {
        Self {
            test: ctx.test.name.clone(),
            description: ctx.test.description.clone(),
        }
    }
}

impl QcErrorHandler for RecordWarning {
    fn run(
        &mut self,
        _dataset: &mut Dataset,
        variable: &str,
        mask: &FailureMask,
    ) -> Result<(), HandlerError> {
        warn!(
            test = %self.test,
            variable,
            failed = mask.failed_count(),
            total = mask.len(),
            "{}",
            self.description
        );
        Ok(())
    }
}

/// Turns any failure into a handler error, failing the test and the pass.
/// An optional `tolerance` parameter (fraction 0..=1) lets that share of
/// failing elements through.
pub struct FailPipeline {
    test: String,
    tolerance: f64,
}

impl FailPipeline {
    fn from_context(ctx: &HandlerContext<'_>) -> Result<Self, HandlerError> {
        let tolerance = ctx.f64_param("tolerance")?.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&tolerance) {
            return Err(HandlerError::InvalidParameter {
                name: "tolerance".into(),
                reason: format!("{} is not a fraction between 0 and 1", tolerance),
            });
        }
        Ok(Self {
            test: ctx.test.name.clone(),
            tolerance,
        })
    }
}

impl QcErrorHandler for FailPipeline {
    fn run(
        &mut self,
        _dataset: &mut Dataset,
        variable: &str,
        mask: &FailureMask,
    ) -> Result<(), HandlerError> {
        if mask.is_empty() {
            return Ok(());
        }
        let share = mask.failed_count() as f64 / mask.len() as f64;
        if share > self.tolerance {
            return Err(HandlerError::Failed(format!(
                "{} of {} values of '{}' failed '{}'",
                mask.failed_count(),
                mask.len(),
                variable,
                self.test
            )));
        }
        Ok(())
    }
}

/// Replaces failing elements with the variable's `_FillValue` (NaN if unset).
pub struct RemoveFailedValues;

impl QcErrorHandler for RemoveFailedValues {
    fn run(
        &mut self,
        dataset: &mut Dataset,
        variable: &str,
        mask: &FailureMask,
    ) -> Result<(), HandlerError> {
        let target = dataset
            .variable_mut(variable)
            .ok_or_else(|| HandlerError::VariableNotFound(variable.to_string()))?;
        let fill = target.fill_value().unwrap_or(f64::NAN);
        let Some(values) = target.values_mut() else {
            return Err(HandlerError::Failed(format!(
                "'{}' does not hold measurements",
                variable
            )));
        };
        for (value, failed) in values.iter_mut().zip(mask.iter()) {
            if failed {
                *value = fill;
            }
        }
        Ok(())
    }
}
