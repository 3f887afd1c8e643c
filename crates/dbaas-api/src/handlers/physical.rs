//! Physical database handlers: adapter registration, role migration
//! acknowledgements and registry maintenance.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use dbaas_registry::{AckRequest, MigrationStep, RegistrationOutcome, RegistrationRequest};
use dbaas_state::{AdditionalRoles, Instruction, InstructionState};

use super::{ApiResponse, error_response, registry_error};
use crate::ApiState;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub db_type: Option<String>,
}

/// Instruction summary handed to the adapter with each portion.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstructionView {
    id: String,
    physical_database_id: String,
    state: InstructionState,
    pending: usize,
}

impl From<&Instruction> for InstructionView {
    fn from(i: &Instruction) -> Self {
        Self {
            id: i.id.clone(),
            physical_database_id: i.physical_database_id.clone(),
            state: i.state,
            pending: i.entries.len(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MigrationPendingView {
    instruction: InstructionView,
    additional_roles: Vec<AdditionalRoles>,
}

/// GET /api/v1/physical_databases
pub async fn list(State(state): State<ApiState>, Query(q): Query<ListQuery>) -> Response {
    match state.registry.list(q.db_type.as_deref()) {
        Ok(dbs) => ApiResponse::ok(dbs).into_response(),
        Err(e) => registry_error(e),
    }
}

/// PUT /api/v1/{type}/physical_databases/{id}
pub async fn register(
    State(state): State<ApiState>,
    Path((db_type, id)): Path<(String, String)>,
    Json(req): Json<RegistrationRequest>,
) -> Response {
    match state.negotiator.on_register(&id, &db_type, req).await {
        Ok(RegistrationOutcome::Created(db)) => (StatusCode::CREATED, ApiResponse::ok(db)).into_response(),
        Ok(RegistrationOutcome::Updated(db) | RegistrationOutcome::Unchanged(db)) => {
            ApiResponse::ok(db).into_response()
        }
        Ok(RegistrationOutcome::MigrationPending {
            instruction, portion, ..
        }) => {
            let body = MigrationPendingView {
                instruction: InstructionView::from(&instruction),
                additional_roles: portion,
            };
            (StatusCode::ACCEPTED, ApiResponse::ok(body)).into_response()
        }
        Ok(RegistrationOutcome::AdapterUnavailable { reason }) => error_response(
            &format!("adapter unreachable: {reason}"),
            StatusCode::BAD_GATEWAY,
        ),
        Err(e) => registry_error(e),
    }
}

/// GET /api/v1/{type}/physical_databases/{id}
pub async fn get(State(state): State<ApiState>, Path((db_type, id)): Path<(String, String)>) -> Response {
    match state.registry.get(&id) {
        Ok(db) if db.db_type == db_type => ApiResponse::ok(db).into_response(),
        Ok(_) => error_response(
            &format!("physical database {id} of type {db_type} not found"),
            StatusCode::NOT_FOUND,
        ),
        Err(e) => registry_error(e),
    }
}

/// DELETE /api/v1/{type}/physical_databases/{id}
pub async fn delete(State(state): State<ApiState>, Path((db_type, id)): Path<(String, String)>) -> Response {
    match state.registry.get(&id) {
        Ok(db) if db.db_type == db_type => {}
        Ok(_) => {
            return error_response(
                &format!("physical database {id} of type {db_type} not found"),
                StatusCode::NOT_FOUND,
            );
        }
        Err(e) => return registry_error(e),
    }
    match state.registry.delete(&id) {
        Ok(rules_removed) => ApiResponse::ok(serde_json::json!({
            "deleted": id,
            "rulesRemoved": rules_removed,
        }))
        .into_response(),
        Err(e) => registry_error(e),
    }
}

/// PUT /api/v1/{type}/physical_databases/{id}/global
pub async fn set_global(State(state): State<ApiState>, Path((db_type, id)): Path<(String, String)>) -> Response {
    match state.registry.get(&id) {
        Ok(db) if db.db_type != db_type => {
            return error_response(
                &format!("physical database {id} of type {db_type} not found"),
                StatusCode::NOT_FOUND,
            );
        }
        Ok(_) => {}
        Err(e) => return registry_error(e),
    }
    match state.registry.set_global(&id) {
        Ok(db) => ApiResponse::ok(db).into_response(),
        Err(e) => registry_error(e),
    }
}

/// POST /api/v1/{type}/physical_databases/{id}/instruction/{iid}/additional-roles
pub async fn additional_roles(
    State(state): State<ApiState>,
    Path((_db_type, id, instruction_id)): Path<(String, String, String)>,
    Json(ack): Json<AckRequest>,
) -> Response {
    match state.engine.apply_acknowledgement(&id, &instruction_id, ack) {
        Ok(MigrationStep::Portion { portion, .. }) => {
            (StatusCode::ACCEPTED, ApiResponse::ok(portion)).into_response()
        }
        Ok(MigrationStep::Completed { physical_database }) => ApiResponse::ok(physical_database).into_response(),
        Err(e) => registry_error(e),
    }
}
