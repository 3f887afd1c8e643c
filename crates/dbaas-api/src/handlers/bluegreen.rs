//! Blue-green domain handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use dbaas_state::BlueGreenMember;

use super::{ApiResponse, bluegreen_error};
use crate::ApiState;

#[derive(Deserialize)]
pub struct DomainRequest {
    pub members: Vec<BlueGreenMember>,
}

/// GET /api/v1/bluegreen/domains
pub async fn list_domains(State(state): State<ApiState>) -> Response {
    match state.bluegreen.list_domains() {
        Ok(domains) => ApiResponse::ok(domains).into_response(),
        Err(e) => bluegreen_error(e),
    }
}

/// PUT /api/v1/bluegreen/domains/{controller}
pub async fn put_domain(
    State(state): State<ApiState>,
    Path(controller): Path<String>,
    Json(req): Json<DomainRequest>,
) -> Response {
    match state.bluegreen.put_domain(&controller, req.members) {
        Ok(domain) => ApiResponse::ok(domain).into_response(),
        Err(e) => bluegreen_error(e),
    }
}

/// GET /api/v1/bluegreen/domains/{controller}
pub async fn get_domain(State(state): State<ApiState>, Path(controller): Path<String>) -> Response {
    match state.bluegreen.get_domain(&controller) {
        Ok(domain) => ApiResponse::ok(domain).into_response(),
        Err(e) => bluegreen_error(e),
    }
}

/// DELETE /api/v1/bluegreen/domains/{controller}
pub async fn delete_domain(State(state): State<ApiState>, Path(controller): Path<String>) -> Response {
    match state.bluegreen.delete_domain(&controller) {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => bluegreen_error(e),
    }
}
