// tsflow-core/src/domain/qc/mod.rs

pub mod builtin;
pub mod checker;
pub mod definition;
pub mod engine;
pub mod handler;
pub mod registry;

pub use checker::{QcChecker, TestReport, resolve_variables};
pub use definition::{ALL_VARIABLES, ErrorHandlers, HandlerReference, QcTestDefinition, QcTestSuite};
pub use engine::{QcEngine, QcSummary};
pub use handler::{HandlerContext, HandlerError, NamedErrorHandler, QcErrorHandler, QcOperator};
pub use registry::HandlerRegistry;
