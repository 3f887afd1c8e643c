//! Balancing rule and microservice label handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use dbaas_core::Labels;
use dbaas_routing::{DebugRequest, NamespaceRuleRequest, PermanentRule, RuleWrite, evaluate};
use dbaas_state::OnMicroserviceRule;

use super::{ApiResponse, error_response, routing_error};
use crate::ApiState;

#[derive(Deserialize)]
pub struct PermanentQuery {
    pub namespace: Option<String>,
    #[serde(rename = "type")]
    pub db_type: Option<String>,
}

// ── On-namespace rules ─────────────────────────────────────────

/// PUT /api/v1/namespaces/{ns}/balancing/rules/{name}
pub async fn put_namespace_rule(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(req): Json<NamespaceRuleRequest>,
) -> Response {
    match state.rules.put_namespace_rule(&namespace, &name, req) {
        Ok((rule, RuleWrite::Created)) => (StatusCode::CREATED, ApiResponse::ok(rule)).into_response(),
        Ok((rule, RuleWrite::Updated)) => ApiResponse::ok(rule).into_response(),
        Err(e) => routing_error(e),
    }
}

/// GET /api/v1/namespaces/{ns}/balancing/rules
pub async fn list_namespace_rules(State(state): State<ApiState>, Path(namespace): Path<String>) -> Response {
    match state.rules.namespace_rules(&namespace) {
        Ok(rules) => ApiResponse::ok(rules).into_response(),
        Err(e) => routing_error(e),
    }
}

/// DELETE /api/v1/namespaces/{ns}/balancing/rules/{name}
pub async fn delete_namespace_rule(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    match state.rules.delete_namespace_rule(&namespace, &name) {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => routing_error(e),
    }
}

// ── On-microservice rules ──────────────────────────────────────

/// PUT /api/v1/namespaces/{ns}/rules/onMicroservices
pub async fn put_microservice_rules(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
    Json(rules): Json<Vec<OnMicroserviceRule>>,
) -> Response {
    match state.rules.put_microservice_rules(&namespace, rules) {
        Ok(sets) => {
            let stored: Vec<OnMicroserviceRule> = sets.into_iter().flat_map(|s| s.rules).collect();
            (StatusCode::CREATED, ApiResponse::ok(stored)).into_response()
        }
        Err(e) => routing_error(e),
    }
}

/// GET /api/v1/namespaces/{ns}/rules/onMicroservices
pub async fn get_microservice_rules(State(state): State<ApiState>, Path(namespace): Path<String>) -> Response {
    match state.rules.microservice_rules(&namespace) {
        Ok(rules) => ApiResponse::ok(rules).into_response(),
        Err(e) => routing_error(e),
    }
}

/// PUT /api/v1/namespaces/{ns}/rules/onMicroservices/validation
pub async fn validate_microservice_rules(
    State(state): State<ApiState>,
    Path(_namespace): Path<String>,
    Json(rules): Json<Vec<OnMicroserviceRule>>,
) -> Response {
    let snapshot = match state.store.snapshot() {
        Ok(s) => s,
        Err(e) => return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    };
    match dbaas_routing::validate_microservice_rules(&snapshot, &rules) {
        Ok(problems) if problems.is_empty() => ApiResponse::ok("valid").into_response(),
        Ok(problems) => error_response(&problems.join("; "), StatusCode::BAD_REQUEST),
        Err(e) => routing_error(e),
    }
}

/// POST /api/v1/namespaces/{ns}/rules/debug
pub async fn debug_rules(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
    Json(req): Json<DebugRequest>,
) -> Response {
    let snapshot = match state.store.snapshot() {
        Ok(s) => s,
        Err(e) => return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    };
    match evaluate(&snapshot, &namespace, &req) {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => routing_error(e),
    }
}

// ── Permanent rules ────────────────────────────────────────────

/// PUT /api/v1/balancing/rules/permanent
pub async fn put_permanent_rules(State(state): State<ApiState>, Json(rules): Json<Vec<PermanentRule>>) -> Response {
    match state.rules.put_permanent_rules(rules) {
        Ok(entries) => ApiResponse::ok(entries).into_response(),
        Err(e) => routing_error(e),
    }
}

/// GET /api/v1/balancing/rules/permanent
pub async fn get_permanent_rules(State(state): State<ApiState>, Query(q): Query<PermanentQuery>) -> Response {
    match state.rules.permanent_rules(q.namespace.as_deref()) {
        Ok(entries) => {
            let entries: Vec<_> = entries
                .into_iter()
                .filter(|e| q.db_type.as_ref().is_none_or(|t| t == &e.db_type))
                .collect();
            ApiResponse::ok(entries).into_response()
        }
        Err(e) => routing_error(e),
    }
}

/// DELETE /api/v1/balancing/rules/permanent
pub async fn delete_permanent_rules(State(state): State<ApiState>, Query(q): Query<PermanentQuery>) -> Response {
    let Some(namespace) = q.namespace.as_deref() else {
        return error_response("query parameter `namespace` is required", StatusCode::BAD_REQUEST);
    };
    match state.rules.delete_permanent_rules(namespace, q.db_type.as_deref()) {
        Ok(removed) => ApiResponse::ok(serde_json::json!({ "removed": removed })).into_response(),
        Err(e) => routing_error(e),
    }
}

// ── Microservice labels ────────────────────────────────────────

/// PUT /api/v1/namespaces/{ns}/microservices/{ms}/labels
pub async fn put_labels(
    State(state): State<ApiState>,
    Path((namespace, microservice)): Path<(String, String)>,
    Json(labels): Json<Labels>,
) -> Response {
    match state.rules.put_microservice_labels(&namespace, &microservice, labels) {
        Ok(record) => ApiResponse::ok(record.labels).into_response(),
        Err(e) => routing_error(e),
    }
}

/// GET /api/v1/namespaces/{ns}/microservices/{ms}/labels
pub async fn get_labels(
    State(state): State<ApiState>,
    Path((namespace, microservice)): Path<(String, String)>,
) -> Response {
    match state.rules.microservice_labels(&namespace, &microservice) {
        Ok(labels) => ApiResponse::ok(labels).into_response(),
        Err(e) => routing_error(e),
    }
}
