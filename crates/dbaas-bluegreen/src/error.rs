//! Blue-green error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlueGreenError {
    #[error("blue-green domain not found: {0}")]
    DomainNotFound(String),

    #[error("active namespace not found for blue-green domain: {0}")]
    ActiveNamespaceNotFound(String),

    #[error("cannot interact with a versioned database {id} (version {version})")]
    VersionedDatabase { id: String, version: String },

    #[error("invalid blue-green domain: {0}")]
    InvalidDomain(String),

    #[error("state store error: {0}")]
    State(#[from] dbaas_state::StateError),
}

pub type BlueGreenResult<T> = Result<T, BlueGreenError>;
