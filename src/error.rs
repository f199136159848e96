//! Error types and constructors for the conformance engine.
//!
//! This module provides the per-stage error taxonomy described by the
//! engine's propagation policy: [`CatalogError`] and [`PlanError`] abort a
//! run, while [`CheckCompileError`] and [`CheckRuntimeError`] localize to the
//! offending rule's verdict. [`IntegrityError`] aborts because it signals a
//! compiler bug rather than bad input.
//!
//! Each taxonomy converts into [`AppError`] so the CLI's top-level `run()`
//! can propagate a single [`AppResult`].

pub use masterror::{AppError, AppResult};
use thiserror::Error;

/// Structural problems in the rule catalog itself.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0}")]
    Invalid(String)
}

/// Problems building or scheduling the validation plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("dependency cycle detected; blocked rules: {blocked:?}")]
    Cycle { blocked: Vec<String> },
    #[error("precondition already set on rule '{rule_id}'")]
    PreconditionAlreadySet { rule_id: String }
}

/// A single rule could not be compiled into a check.
#[derive(Debug, Error)]
pub enum CheckCompileError {
    #[error("unknown check function '{0}'")]
    UnknownCheckFunction(String),
    #[error("condition on rule '{rule_id}' cannot be evaluated as a row predicate")]
    ConditionUnsupported { rule_id: String },
    #[error("rule '{rule_id}' is missing required parameter '{parameter}'")]
    MissingParameter { rule_id: String, parameter: String }
}

/// A compiled check failed to execute against the SQL engine.
#[derive(Debug, Error)]
pub enum CheckRuntimeError {
    #[error("SQL execution failed for rule '{rule_id}': {message}")]
    SqlError { rule_id: String, message: String },
    #[error("column '{column}' referenced by rule '{rule_id}' is not present in the table")]
    MissingColumn { rule_id: String, column: String }
}

/// A requirement-mode check returned a result that violates the engine's own
/// contract (e.g. `violations` is not a non-negative integer). This always
/// indicates a compiler bug, never bad input data.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("rule '{rule_id}' produced a non-integer violations count: {detail}")]
    MalformedViolationCount { rule_id: String, detail: String }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        AppError::bad_request(err.to_string())
    }
}

impl From<PlanError> for AppError {
    fn from(err: PlanError) -> Self {
        AppError::bad_request(err.to_string())
    }
}

impl From<IntegrityError> for AppError {
    fn from(err: IntegrityError) -> Self {
        AppError::internal(err.to_string())
    }
}

/// Construct a [`CatalogError`], already wrapped as an [`AppError`] for call
/// sites that just want to bubble it up through an [`AppResult`].
pub fn catalog_error(message: impl Into<String>) -> AppError {
    AppError::from(CatalogError::Invalid(message.into()))
}

/// Construct a cycle [`PlanError`] as an [`AppError`].
pub fn plan_cycle_error(blocked: Vec<String>) -> AppError {
    AppError::from(PlanError::Cycle { blocked })
}

/// Construct a precondition-already-set [`PlanError`] as an [`AppError`].
pub fn precondition_already_set_error(rule_id: impl Into<String>) -> AppError {
    AppError::from(PlanError::PreconditionAlreadySet {
        rule_id: rule_id.into()
    })
}

/// Construct a config-loading error.
pub fn config_error(message: impl Into<String>) -> AppError {
    AppError::bad_request(message.into())
}

/// Construct an engine-setup error (e.g. failure to open the SQL session).
pub fn engine_error(message: impl Into<String>) -> AppError {
    AppError::service(message.into())
}

/// Construct a file-read error with path context.
pub fn file_read_error(path: &str, source: std::io::Error) -> AppError {
    AppError::internal(format!("failed to read file '{}': {}", path, source))
}
