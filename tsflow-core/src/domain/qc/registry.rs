// tsflow-core/src/domain/qc/registry.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::domain::dataset::Dataset;
use crate::domain::error::{DomainError, ResolutionError};
use crate::domain::qc::definition::{ErrorHandlers, HandlerReference, QcTestDefinition};
use crate::domain::qc::handler::{
    HandlerContext, HandlerError, NamedErrorHandler, QcErrorHandler, QcOperator,
};

pub type OperatorFactory = Arc<
    dyn Fn(&HandlerContext<'_>) -> Result<Box<dyn QcOperator>, HandlerError> + Send + Sync,
>;
pub type ErrorHandlerFactory = Arc<
    dyn Fn(&HandlerContext<'_>) -> Result<Box<dyn QcErrorHandler>, HandlerError> + Send + Sync,
>;

#[derive(Default, Clone)]
struct Namespace {
    operators: HashMap<String, OperatorFactory>,
    error_handlers: HashMap<String, ErrorHandlerFactory>,
}

/// Named factories for operators and error handlers.
///
/// A reference `tsflow.qc.operators.CheckMax` is split on its last `.` into a
/// namespace (`tsflow.qc.operators`) and a symbol (`CheckMax`). Unknown
/// namespaces and symbols are errors, never skipped.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    namespaces: HashMap<String, Namespace>,
}

/// Splits `<namespace>.<Symbol>` on the final separator.
pub fn parse_reference(reference: &str) -> Result<(&str, &str), ResolutionError> {
    match reference.rsplit_once('.') {
        Some((namespace, symbol)) if !namespace.is_empty() && !symbol.is_empty() => {
            Ok((namespace, symbol))
        }
        _ => Err(ResolutionError::MalformedReference(reference.to_string())),
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the `tsflow.qc.*` plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::domain::qc::builtin::register_builtins(&mut registry);
        registry
    }

    pub fn register_operator<F>(&mut self, reference: &str, factory: F) -> Result<(), ResolutionError>
    where
        F: Fn(&HandlerContext<'_>) -> Result<Box<dyn QcOperator>, HandlerError> + Send + Sync + 'static,
    {
        let (namespace, symbol) = parse_reference(reference)?;
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .operators
            .insert(symbol.to_string(), Arc::new(factory));
        Ok(())
    }

    pub fn register_error_handler<F>(
        &mut self,
        reference: &str,
        factory: F,
    ) -> Result<(), ResolutionError>
    where
        F: Fn(&HandlerContext<'_>) -> Result<Box<dyn QcErrorHandler>, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        let (namespace, symbol) = parse_reference(reference)?;
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .error_handlers
            .insert(symbol.to_string(), Arc::new(factory));
        Ok(())
    }

    fn namespace<'s, 'r>(
        &'s self,
        reference: &'r str,
    ) -> Result<(&'s Namespace, &'r str), ResolutionError> {
        let (namespace, symbol) = parse_reference(reference)?;
        let ns = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| ResolutionError::NamespaceNotFound {
                reference: reference.to_string(),
                namespace: namespace.to_string(),
            })?;
        Ok((ns, symbol))
    }

    fn symbol_not_found(reference: &str) -> ResolutionError {
        let (namespace, symbol) = reference.rsplit_once('.').unwrap_or_default();
        ResolutionError::SymbolNotFound {
            reference: reference.to_string(),
            namespace: namespace.to_string(),
            symbol: symbol.to_string(),
        }
    }

    pub fn lookup_operator(&self, reference: &str) -> Result<&OperatorFactory, ResolutionError> {
        let (ns, symbol) = self.namespace(reference)?;
        ns.operators
            .get(symbol)
            .ok_or_else(|| Self::symbol_not_found(reference))
    }

    pub fn lookup_error_handler(
        &self,
        reference: &str,
    ) -> Result<&ErrorHandlerFactory, ResolutionError> {
        let (ns, symbol) = self.namespace(reference)?;
        ns.error_handlers
            .get(symbol)
            .ok_or_else(|| Self::symbol_not_found(reference))
    }

    /// Instantiates the operator of a test.
    #[instrument(skip_all, fields(test = %test.name, operator = %reference.classname))]
    pub fn resolve_operator(
        &self,
        reference: &HandlerReference,
        dataset: &Dataset,
        previous: Option<&Dataset>,
        test: &QcTestDefinition,
    ) -> Result<Box<dyn QcOperator>, DomainError> {
        let factory = self.lookup_operator(&reference.classname)?;
        let ctx = HandlerContext {
            dataset,
            previous,
            test,
            parameters: &reference.parameters,
        };
        debug!("Constructing operator");
        factory(&ctx).map_err(|source| DomainError::HandlerConstruction {
            test: test.name.clone(),
            reference: reference.classname.clone(),
            source,
        })
    }

    /// Instantiates every error handler of a test, in declaration order.
    /// All references are looked up before any of them is constructed.
    #[instrument(skip_all, fields(test = %test.name))]
    pub fn resolve_error_handlers(
        &self,
        handlers: &ErrorHandlers,
        dataset: &Dataset,
        previous: Option<&Dataset>,
        test: &QcTestDefinition,
    ) -> Result<Vec<NamedErrorHandler>, DomainError> {
        let entries = handlers.entries();
        let factories = entries
            .iter()
            .map(|(_, reference)| self.lookup_error_handler(&reference.classname))
            .collect::<Result<Vec<_>, _>>()?;

        let mut resolved = Vec::with_capacity(entries.len());
        for ((name, reference), factory) in entries.into_iter().zip(factories) {
            let ctx = HandlerContext {
                dataset,
                previous,
                test,
                parameters: &reference.parameters,
            };
            debug!(handler = name, classname = %reference.classname, "Constructing error handler");
            let handler = factory(&ctx).map_err(|source| DomainError::HandlerConstruction {
                test: test.name.clone(),
                reference: reference.classname.clone(),
                source,
            })?;
            resolved.push(NamedErrorHandler {
                name: name.to_string(),
                handler,
            });
        }
        Ok(resolved)
    }

    /// Registered references grouped by kind, sorted, for listings.
    pub fn catalog(&self) -> BTreeMap<&'static str, Vec<String>> {
        let mut operators = Vec::new();
        let mut error_handlers = Vec::new();
        for (name, ns) in &self.namespaces {
            operators.extend(ns.operators.keys().map(|s| format!("{}.{}", name, s)));
            error_handlers.extend(ns.error_handlers.keys().map(|s| format!("{}.{}", name, s)));
        }
        operators.sort();
        error_handlers.sort();

        let mut catalog = BTreeMap::new();
        catalog.insert("operators", operators);
        catalog.insert("error_handlers", error_handlers);
        catalog
    }
}
