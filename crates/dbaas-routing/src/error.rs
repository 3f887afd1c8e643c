//! Routing error types.

use thiserror::Error;

/// Errors raised by rule writes and database binding.
///
/// Expected resolution results (no adapter, invalid classifier, versioned
/// database) are values of [`crate::RouteOutcome`], not errors.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rule conflict: {0}")]
    Conflict(String),

    #[error("permanent rule conflict: {0}")]
    PermanentRuleConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state store error: {0}")]
    State(#[from] dbaas_state::StateError),
}

pub type RoutingResult<T> = Result<T, RoutingError>;
