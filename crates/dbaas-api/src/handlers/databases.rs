//! Logical database handlers (Resolve/Create, lookup, archive).

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use dbaas_routing::{AppliedRule, CreateRequest, RouteOutcome};
use dbaas_state::LogicalDatabase;

use super::{ApiResponse, error_response, routing_error};
use crate::ApiState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DatabaseResponse {
    database: LogicalDatabase,
    created: bool,
    redirected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied_rule: Option<AppliedRule>,
}

/// POST /api/v1/databases
pub async fn get_or_create(State(state): State<ApiState>, Json(req): Json<CreateRequest>) -> Response {
    match state.router.get_or_create(&req) {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => routing_error(e),
    }
}

/// POST /api/v1/databases/lookup
pub async fn lookup(State(state): State<ApiState>, Json(req): Json<CreateRequest>) -> Response {
    match state.router.lookup(&req) {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => routing_error(e),
    }
}

/// GET /api/v1/databases/{id}
pub async fn get_database(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.router.logical_database(&id) {
        Ok(db) => ApiResponse::ok(db).into_response(),
        Err(e) => routing_error(e),
    }
}

/// POST /api/v1/databases/{id}/drop
pub async fn drop_database(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.router.mark_for_drop(&id) {
        Ok(db) => ApiResponse::ok(db).into_response(),
        Err(e) => routing_error(e),
    }
}

fn outcome_response(outcome: RouteOutcome) -> Response {
    match outcome {
        RouteOutcome::Resolved {
            database,
            created,
            redirected,
            applied,
        } => {
            let status = if created { StatusCode::CREATED } else { StatusCode::OK };
            let body = DatabaseResponse {
                database,
                created,
                redirected,
                applied_rule: applied,
            };
            (status, ApiResponse::ok(body)).into_response()
        }
        RouteOutcome::NoAdapter { db_type } => error_response(
            &format!("no adapter available for type {db_type}"),
            StatusCode::NOT_FOUND,
        ),
        RouteOutcome::InvalidClassifier { reason } => {
            error_response(&format!("invalid classifier: {reason}"), StatusCode::BAD_REQUEST)
        }
        RouteOutcome::VersionedDatabase { id, version } => error_response(
            &format!("cannot interact with versioned database {id} (version {version})"),
            StatusCode::CONFLICT,
        ),
        RouteOutcome::BoundElsewhere {
            database_id,
            physical_database_id,
        } => error_response(
            &format!("database {database_id} is already bound to physical database {physical_database_id}"),
            StatusCode::CONFLICT,
        ),
        RouteOutcome::NotFound => error_response("logical database not found", StatusCode::NOT_FOUND),
    }
}
