//! REST API handlers.
//!
//! Every handler answers with the same JSON envelope. Errors from the
//! domain crates map to status codes in one place per crate, below.

pub mod bluegreen;
pub mod databases;
pub mod physical;
pub mod rules;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use dbaas_bluegreen::BlueGreenError;
use dbaas_registry::RegistryError;
use dbaas_routing::RoutingError;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    if status.is_server_error() {
        error!(status = %status, error = %msg, "request failed");
    }
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

pub(crate) fn routing_error(e: RoutingError) -> Response {
    let status = match &e {
        RoutingError::Validation(_) | RoutingError::PermanentRuleConflict(_) => StatusCode::BAD_REQUEST,
        RoutingError::Conflict(_) => StatusCode::CONFLICT,
        RoutingError::NotFound(_) => StatusCode::NOT_FOUND,
        RoutingError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

pub(crate) fn registry_error(e: RegistryError) -> Response {
    let status = match &e {
        RegistryError::Validation(_) | RegistryError::BadAdapterState(_) => StatusCode::BAD_REQUEST,
        RegistryError::Conflict(_) => StatusCode::CONFLICT,
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::MigrationFailed(_) | RegistryError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

pub(crate) fn bluegreen_error(e: BlueGreenError) -> Response {
    let status = match &e {
        BlueGreenError::DomainNotFound(_) | BlueGreenError::ActiveNamespaceNotFound(_) => StatusCode::NOT_FOUND,
        BlueGreenError::VersionedDatabase { .. } => StatusCode::CONFLICT,
        BlueGreenError::InvalidDomain(_) => StatusCode::BAD_REQUEST,
        BlueGreenError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

/// GET /api/v1/healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}
