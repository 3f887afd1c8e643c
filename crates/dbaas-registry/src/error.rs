//! Registry error types.

use thiserror::Error;

/// Errors raised by registration, registry maintenance and role migration.
///
/// An unreachable adapter is a [`crate::RegistrationOutcome`], not an error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("bad adapter state: {0}")]
    BadAdapterState(String),

    #[error("registration conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The instruction was discarded; role metadata stays as it was.
    #[error("role migration failed: {0}")]
    MigrationFailed(String),

    #[error("state store error: {0}")]
    State(#[from] dbaas_state::StateError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
