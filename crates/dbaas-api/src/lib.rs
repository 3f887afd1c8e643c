//! dbaas-api — REST API for the DBaaS control plane.
//!
//! Handlers call straight into the routing, registry and blue-green
//! crates and map every outcome to one status code.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/databases` | Resolve or create a logical database |
//! | POST | `/api/v1/databases/lookup` | Resolve without creating |
//! | GET | `/api/v1/databases/{id}` | Get a logical database |
//! | POST | `/api/v1/databases/{id}/drop` | Archive a logical database |
//! | GET | `/api/v1/physical_databases` | List physical databases (`?type=`) |
//! | PUT | `/api/v1/{type}/physical_databases/{id}` | Adapter registration handshake |
//! | GET/DELETE | `/api/v1/{type}/physical_databases/{id}` | Get / deregister |
//! | PUT | `/api/v1/{type}/physical_databases/{id}/global` | Make global for its type |
//! | POST | `/api/v1/{type}/physical_databases/{id}/instruction/{iid}/additional-roles` | Acknowledge a portion |
//! | GET | `/api/v1/namespaces/{ns}/balancing/rules` | List on-namespace rules |
//! | PUT/DELETE | `/api/v1/namespaces/{ns}/balancing/rules/{name}` | Put / delete an on-namespace rule |
//! | PUT/GET | `/api/v1/namespaces/{ns}/rules/onMicroservices` | Replace / list on-microservice rules |
//! | PUT | `/api/v1/namespaces/{ns}/rules/onMicroservices/validation` | Validate without storing |
//! | POST | `/api/v1/namespaces/{ns}/rules/debug` | Explain routing for candidate microservices |
//! | PUT/GET | `/api/v1/namespaces/{ns}/microservices/{ms}/labels` | Microservice labels |
//! | PUT/GET/DELETE | `/api/v1/balancing/rules/permanent` | Permanent rules (`?namespace=&type=`) |
//! | GET | `/api/v1/bluegreen/domains` | List blue-green domains |
//! | PUT/GET/DELETE | `/api/v1/bluegreen/domains/{controller}` | Blue-green domain |
//! | GET | `/api/v1/healthz` | Liveness |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};

use dbaas_bluegreen::BlueGreenDomains;
use dbaas_registry::{AdapterClient, CapabilityNegotiator, InstructionEngine, PhysicalDatabaseRegistry};
use dbaas_routing::{DatabaseRouter, RuleStore};
use dbaas_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub router: DatabaseRouter,
    pub rules: RuleStore,
    pub registry: PhysicalDatabaseRegistry,
    pub negotiator: CapabilityNegotiator,
    pub engine: InstructionEngine,
    pub bluegreen: BlueGreenDomains,
}

impl ApiState {
    /// Wire every component onto one store.
    pub fn new(store: StateStore, adapter: Arc<dyn AdapterClient>, portion_size: usize) -> Self {
        let engine = InstructionEngine::new(store.clone(), portion_size);
        Self {
            router: DatabaseRouter::new(store.clone()),
            rules: RuleStore::new(store.clone()),
            registry: PhysicalDatabaseRegistry::new(store.clone()),
            negotiator: CapabilityNegotiator::new(store.clone(), engine.clone(), adapter),
            engine,
            bluegreen: BlueGreenDomains::new(store.clone()),
            store,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    use handlers::{bluegreen, databases, physical, rules};

    let api_routes = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/databases", post(databases::get_or_create))
        .route("/databases/lookup", post(databases::lookup))
        .route("/databases/{id}", get(databases::get_database))
        .route("/databases/{id}/drop", post(databases::drop_database))
        .route("/physical_databases", get(physical::list))
        .route(
            "/{type}/physical_databases/{id}",
            put(physical::register).get(physical::get).delete(physical::delete),
        )
        .route("/{type}/physical_databases/{id}/global", put(physical::set_global))
        .route(
            "/{type}/physical_databases/{id}/instruction/{iid}/additional-roles",
            post(physical::additional_roles),
        )
        .route("/namespaces/{ns}/balancing/rules", get(rules::list_namespace_rules))
        .route(
            "/namespaces/{ns}/balancing/rules/{name}",
            put(rules::put_namespace_rule).delete(rules::delete_namespace_rule),
        )
        .route(
            "/namespaces/{ns}/rules/onMicroservices",
            put(rules::put_microservice_rules).get(rules::get_microservice_rules),
        )
        .route(
            "/namespaces/{ns}/rules/onMicroservices/validation",
            put(rules::validate_microservice_rules),
        )
        .route("/namespaces/{ns}/rules/debug", post(rules::debug_rules))
        .route(
            "/namespaces/{ns}/microservices/{ms}/labels",
            put(rules::put_labels).get(rules::get_labels),
        )
        .route(
            "/balancing/rules/permanent",
            put(rules::put_permanent_rules)
                .get(rules::get_permanent_rules)
                .delete(rules::delete_permanent_rules),
        )
        .route("/bluegreen/domains", get(bluegreen::list_domains))
        .route(
            "/bluegreen/domains/{controller}",
            put(bluegreen::put_domain)
                .get(bluegreen::get_domain)
                .delete(bluegreen::delete_domain),
        )
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
