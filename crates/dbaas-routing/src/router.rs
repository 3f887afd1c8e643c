//! Database Router — the Resolve/Create operation.
//!
//! `get_or_create` runs classifier validation, blue-green redirect,
//! existing-binding lookup, rule resolution and the insert inside one
//! write transaction. A lookup never creates and reads a snapshot.

use serde::Deserialize;
use tracing::{debug, info};

use dbaas_bluegreen::{BlueGreenError, redirect_if_controller};
use dbaas_core::{Classifier, epoch_secs, generate_id};
use dbaas_state::*;

use crate::error::{RoutingError, RoutingResult};
use crate::resolver::{AppliedRule, Resolution, resolve_classifier};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub classifier: Classifier,
    #[serde(rename = "type")]
    pub db_type: String,
    /// Defaults to the classifier's namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Bypass rule resolution and bind to this physical database.
    #[serde(default)]
    pub physical_database_id: Option<String>,
}

/// Every expected result of resolve/create and lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Resolved {
        database: LogicalDatabase,
        created: bool,
        redirected: bool,
        /// Rule that picked the target; `None` for existing or pinned bindings.
        applied: Option<AppliedRule>,
    },
    NoAdapter {
        db_type: String,
    },
    InvalidClassifier {
        reason: String,
    },
    VersionedDatabase {
        id: String,
        version: String,
    },
    /// The classifier is already bound to another physical database.
    BoundElsewhere {
        database_id: String,
        physical_database_id: String,
    },
    /// Lookup only: nothing is bound to the classifier.
    NotFound,
}

/// Classifier and namespace after validation and blue-green redirect.
struct Addressed {
    classifier: Classifier,
    namespace: String,
    redirected: bool,
}

#[derive(Clone)]
pub struct DatabaseRouter {
    store: StateStore,
}

impl DatabaseRouter {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Return the logical database bound to the request's classifier,
    /// creating it on the resolved physical database if none exists.
    pub fn get_or_create(&self, req: &CreateRequest) -> RoutingResult<RouteOutcome> {
        let outcome = self.store.write(|tx| {
            let addressed = match address(tx, req)? {
                Ok(a) => a,
                Err(outcome) => return Ok(outcome),
            };
            if let Some(existing) = find_existing(tx, &req.db_type, &addressed.classifier, true)? {
                return Ok(bound(existing, req, addressed.redirected));
            }

            let (target, applied) = match &req.physical_database_id {
                Some(id) => match tx.physical_database(id)? {
                    Some(db) if db.db_type == req.db_type => (db, None),
                    _ => {
                        return Err(RoutingError::Validation(format!(
                            "physical database {id} of type {} is not registered",
                            req.db_type
                        )));
                    }
                },
                None => {
                    let resolution =
                        resolve_classifier(tx, &addressed.classifier, &req.db_type, &addressed.namespace)?;
                    match resolution {
                        Resolution::Resolved(decision) => {
                            let Some(db) = tx.physical_database(&decision.physical_database_id)? else {
                                return Ok(RouteOutcome::NoAdapter {
                                    db_type: req.db_type.clone(),
                                });
                            };
                            (db, Some(decision.applied))
                        }
                        Resolution::NoAdapter => {
                            return Ok(RouteOutcome::NoAdapter {
                                db_type: req.db_type.clone(),
                            });
                        }
                    }
                }
            };

            let database = LogicalDatabase {
                id: generate_id("ldb", &format!("{}/{}", req.db_type, addressed.classifier.canonical_key())),
                classifier: addressed.classifier.clone(),
                old_classifier: None,
                db_type: req.db_type.clone(),
                namespace: addressed.namespace.clone(),
                physical_database_id: target.id.clone(),
                roles: target.metadata.supported_roles.clone(),
                resources: Vec::new(),
                connection_properties: Vec::new(),
                bg_version: None,
                marked_for_drop: false,
                created_at: epoch_secs(),
            };
            tx.put_logical_database(&database)?;
            join_live_migration(tx, &database)?;
            Ok(RouteOutcome::Resolved {
                database,
                created: true,
                redirected: addressed.redirected,
                applied,
            })
        })?;

        log_outcome(&req.db_type, &outcome);
        Ok(outcome)
    }

    /// Find the logical database bound to the request's classifier without
    /// creating one.
    pub fn lookup(&self, req: &CreateRequest) -> RoutingResult<RouteOutcome> {
        let snapshot = self.store.snapshot()?;
        let addressed = match address(&snapshot, req)? {
            Ok(a) => a,
            Err(outcome) => return Ok(outcome),
        };
        let outcome = match find_existing(&snapshot, &req.db_type, &addressed.classifier, false)? {
            Some(existing) => bound(existing, req, addressed.redirected),
            None => RouteOutcome::NotFound,
        };
        Ok(outcome)
    }

    /// Archive a logical database so it no longer pins its physical database.
    pub fn mark_for_drop(&self, id: &str) -> RoutingResult<LogicalDatabase> {
        let database = self.store.write(|tx| {
            let mut db = tx
                .logical_database(id)?
                .ok_or_else(|| RoutingError::NotFound(format!("logical database {id}")))?;
            db.marked_for_drop = true;
            tx.put_logical_database(&db)?;
            Ok::<_, RoutingError>(db)
        })?;
        info!(id = %id, physical_database_id = %database.physical_database_id, "logical database marked for drop");
        Ok(database)
    }

    pub fn logical_database(&self, id: &str) -> RoutingResult<LogicalDatabase> {
        self.store
            .logical_database(id)?
            .ok_or_else(|| RoutingError::NotFound(format!("logical database {id}")))
    }
}

/// Validate the classifier and apply the blue-green redirect.
///
/// The inner `Err` carries an outcome that ends the request.
fn address<V: StateRead>(view: &V, req: &CreateRequest) -> RoutingResult<Result<Addressed, RouteOutcome>> {
    let classifier = if req.classifier.is_legacy() {
        match req.classifier.to_current() {
            Some(current) => current,
            None => {
                let reason = req
                    .classifier
                    .validate_legacy()
                    .err()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "legacy classifier cannot be converted".to_string());
                return Ok(Err(RouteOutcome::InvalidClassifier { reason }));
            }
        }
    } else {
        req.classifier.clone()
    };
    if let Err(violation) = classifier.validate() {
        return Ok(Err(RouteOutcome::InvalidClassifier {
            reason: violation.to_string(),
        }));
    }

    let classifier_namespace = classifier.namespace.clone().unwrap_or_default();
    let namespace = match &req.namespace {
        Some(ns) if ns != &classifier_namespace => {
            return Ok(Err(RouteOutcome::InvalidClassifier {
                reason: format!("namespace {ns} does not match classifier namespace {classifier_namespace}"),
            }));
        }
        _ => classifier_namespace,
    };

    match redirect_if_controller(view, &classifier, &req.db_type, &namespace) {
        Ok(r) => Ok(Ok(Addressed {
            classifier: r.classifier,
            namespace: r.namespace,
            redirected: r.redirected,
        })),
        Err(BlueGreenError::VersionedDatabase { id, version }) => {
            Ok(Err(RouteOutcome::VersionedDatabase { id, version }))
        }
        Err(BlueGreenError::State(e)) => Err(e.into()),
        Err(e) => Err(RoutingError::NotFound(e.to_string())),
    }
}

/// Existing binding under the current classifier, then its legacy shape.
///
/// With `upgrade`, a legacy-only binding gets the current classifier and
/// keeps the legacy one as `old_classifier`; `view` must be the open
/// write transaction in that case.
fn find_existing<V: StateRead + MaybeWrite>(
    view: &V,
    db_type: &str,
    classifier: &Classifier,
    upgrade: bool,
) -> RoutingResult<Option<LogicalDatabase>> {
    if let Some(db) = view.find_logical_database(db_type, classifier)? {
        return Ok(Some(db));
    }
    let Some(legacy) = classifier.legacy_equivalent() else {
        return Ok(None);
    };
    let Some(mut db) = view.find_logical_database(db_type, &legacy)? else {
        return Ok(None);
    };
    if upgrade {
        db.old_classifier = Some(db.classifier.clone());
        db.classifier = classifier.clone();
        view.put_upgraded(&db)?;
        debug!(id = %db.id, "legacy classifier upgraded");
    }
    Ok(Some(db))
}

/// Write access for the legacy upgrade in [`find_existing`].
trait MaybeWrite {
    fn put_upgraded(&self, db: &LogicalDatabase) -> StateResult<()>;
}

impl MaybeWrite for Txn {
    fn put_upgraded(&self, db: &LogicalDatabase) -> StateResult<()> {
        self.put_logical_database(db)
    }
}

impl MaybeWrite for Snapshot {
    fn put_upgraded(&self, _db: &LogicalDatabase) -> StateResult<()> {
        Ok(())
    }
}

/// A database created while its physical database migrates roles joins
/// the live instruction, so completion leaves no database behind.
fn join_live_migration(tx: &Txn, database: &LogicalDatabase) -> StateResult<()> {
    let Some(mut instruction) = tx.instruction_for_physical_database(&database.physical_database_id)? else {
        return Ok(());
    };
    let missing = database.missing_roles(&instruction.target.metadata.role_set());
    if missing.is_empty() {
        return Ok(());
    }
    instruction.add_entry(AdditionalRoles {
        database_id: database.id.clone(),
        roles: missing,
        connection_properties: database.connection_properties.clone(),
        resources: database.resources.clone(),
    });
    instruction.updated_at = epoch_secs();
    tx.put_instruction(&instruction)?;
    info!(
        id = %database.id,
        instruction = %instruction.id,
        "new logical database joined role migration"
    );
    Ok(())
}

fn bound(existing: LogicalDatabase, req: &CreateRequest, redirected: bool) -> RouteOutcome {
    match &req.physical_database_id {
        Some(pinned) if pinned != &existing.physical_database_id => RouteOutcome::BoundElsewhere {
            database_id: existing.id,
            physical_database_id: existing.physical_database_id,
        },
        _ => RouteOutcome::Resolved {
            database: existing,
            created: false,
            redirected,
            applied: None,
        },
    }
}

fn log_outcome(db_type: &str, outcome: &RouteOutcome) {
    match outcome {
        RouteOutcome::Resolved {
            database,
            created: true,
            applied,
            ..
        } => info!(
            id = %database.id,
            db_type = %db_type,
            namespace = %database.namespace,
            physical_database_id = %database.physical_database_id,
            rule = ?applied,
            "logical database created"
        ),
        RouteOutcome::Resolved { database, .. } => {
            debug!(id = %database.id, db_type = %db_type, "existing logical database returned")
        }
        other => debug!(db_type = %db_type, outcome = ?other, "resolve/create finished without a binding"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn request(classifier: Classifier) -> CreateRequest {
        CreateRequest {
            classifier,
            db_type: "postgresql".to_string(),
            namespace: None,
            physical_database_id: None,
        }
    }

    fn router_with_global() -> (StateStore, DatabaseRouter) {
        let store = StateStore::open_in_memory().unwrap();
        put_physical(&store, "pg-1", "postgresql", &[], true);
        put_physical(&store, "pg-2", "postgresql", &[], false);
        (store.clone(), DatabaseRouter::new(store))
    }

    fn created(outcome: RouteOutcome) -> (LogicalDatabase, bool) {
        match outcome {
            RouteOutcome::Resolved { database, created, .. } => (database, created),
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[test]
    fn creates_once_then_returns_existing() {
        let (store, router) = router_with_global();
        let req = request(Classifier::service("ns", "orders"));

        let (first, was_created) = created(router.get_or_create(&req).unwrap());
        assert!(was_created);
        assert_eq!(first.physical_database_id, "pg-1");
        assert_eq!(first.roles, vec!["admin".to_string()]);

        let (second, was_created) = created(router.get_or_create(&req).unwrap());
        assert!(!was_created);
        assert_eq!(second.id, first.id);
        assert_eq!(store.logical_databases().unwrap().len(), 1);
    }

    #[test]
    fn no_adapter_when_nothing_matches() {
        let (_, router) = router_with_global();
        let mut req = request(Classifier::service("ns", "orders"));
        req.db_type = "cassandra".to_string();
        assert_eq!(
            router.get_or_create(&req).unwrap(),
            RouteOutcome::NoAdapter {
                db_type: "cassandra".to_string()
            }
        );
    }

    #[test]
    fn invalid_classifier_is_an_outcome() {
        let (store, router) = router_with_global();
        let mut c = Classifier::tenant("ns", "orders", "t1");
        c.tenant_id = None;
        assert!(matches!(
            router.get_or_create(&request(c)).unwrap(),
            RouteOutcome::InvalidClassifier { .. }
        ));

        let mut mismatched = request(Classifier::service("ns", "orders"));
        mismatched.namespace = Some("elsewhere".to_string());
        assert!(matches!(
            router.get_or_create(&mismatched).unwrap(),
            RouteOutcome::InvalidClassifier { .. }
        ));
        assert!(store.logical_databases().unwrap().is_empty());
    }

    #[test]
    fn explicit_target_and_bound_elsewhere() {
        let (_, router) = router_with_global();
        let mut req = request(Classifier::service("ns", "orders"));
        req.physical_database_id = Some("pg-2".to_string());
        let (db, _) = created(router.get_or_create(&req).unwrap());
        assert_eq!(db.physical_database_id, "pg-2");

        req.physical_database_id = Some("pg-1".to_string());
        assert!(matches!(
            router.get_or_create(&req).unwrap(),
            RouteOutcome::BoundElsewhere { .. }
        ));

        req.physical_database_id = Some("pg-missing".to_string());
        req.classifier = Classifier::service("ns", "billing");
        assert!(matches!(router.get_or_create(&req), Err(RoutingError::Validation(_))));
    }

    #[test]
    fn legacy_binding_is_found_and_upgraded() {
        let (store, router) = router_with_global();
        let current = Classifier::service("ns", "orders");
        let legacy = current.legacy_equivalent().unwrap();
        let stored = LogicalDatabase {
            id: "ldb-legacy".to_string(),
            classifier: legacy.clone(),
            old_classifier: None,
            db_type: "postgresql".to_string(),
            namespace: "ns".to_string(),
            physical_database_id: "pg-2".to_string(),
            roles: vec!["admin".to_string()],
            resources: Vec::new(),
            connection_properties: Vec::new(),
            bg_version: None,
            marked_for_drop: false,
            created_at: 1000,
        };
        store.write(|tx| tx.put_logical_database(&stored)).unwrap();

        // Lookup sees it without rewriting it.
        let (found, _) = created(router.lookup(&request(current.clone())).unwrap());
        assert_eq!(found.id, "ldb-legacy");
        assert_eq!(store.logical_database("ldb-legacy").unwrap().unwrap().classifier, legacy);

        let (db, was_created) = created(router.get_or_create(&request(current.clone())).unwrap());
        assert!(!was_created);
        assert_eq!(db.id, "ldb-legacy");
        let upgraded = store.logical_database("ldb-legacy").unwrap().unwrap();
        assert_eq!(upgraded.classifier, current);
        assert_eq!(upgraded.old_classifier, Some(legacy.clone()));
        // Still reachable under both shapes.
        assert!(store.find_logical_database("postgresql", &legacy).unwrap().is_some());
        assert!(store.find_logical_database("postgresql", &current).unwrap().is_some());
    }

    #[test]
    fn legacy_request_is_converted() {
        let (_, router) = router_with_global();
        let legacy = Classifier::service("ns", "orders").legacy_equivalent().unwrap();
        let (db, _) = created(router.get_or_create(&request(legacy)).unwrap());
        assert_eq!(db.classifier, Classifier::service("ns", "orders"));
    }

    #[test]
    fn lookup_does_not_create() {
        let (store, router) = router_with_global();
        let req = request(Classifier::service("ns", "orders"));
        assert_eq!(router.lookup(&req).unwrap(), RouteOutcome::NotFound);
        assert!(store.logical_databases().unwrap().is_empty());
    }

    #[test]
    fn controller_namespace_redirects_to_active_member() {
        let (store, router) = router_with_global();
        store
            .write(|tx| {
                tx.put_blue_green_domain(&BlueGreenDomain {
                    controller_namespace: "ctrl-ns".to_string(),
                    members: vec![
                        BlueGreenMember {
                            namespace: "ns-active".to_string(),
                            state: NamespaceState::Active,
                            version: None,
                        },
                        BlueGreenMember {
                            namespace: "ns-idle".to_string(),
                            state: NamespaceState::Idle,
                            version: None,
                        },
                    ],
                    updated_at: 1000,
                })
            })
            .unwrap();

        let (in_active, _) = created(
            router
                .get_or_create(&request(Classifier::service("ns-active", "orders")))
                .unwrap(),
        );
        match router.lookup(&request(Classifier::service("ctrl-ns", "orders"))).unwrap() {
            RouteOutcome::Resolved {
                database, redirected, ..
            } => {
                assert!(redirected);
                assert_eq!(database.id, in_active.id);
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[test]
    fn mark_for_drop_archives() {
        let (store, router) = router_with_global();
        let (db, _) = created(
            router
                .get_or_create(&request(Classifier::service("ns", "orders")))
                .unwrap(),
        );
        let dropped = router.mark_for_drop(&db.id).unwrap();
        assert!(dropped.marked_for_drop);
        assert!(store.logical_databases_on("pg-1").unwrap().is_empty());
        assert!(matches!(router.mark_for_drop("ldb-missing"), Err(RoutingError::NotFound(_))));
    }

    #[test]
    fn database_created_during_role_migration_joins_it() {
        let (store, router) = router_with_global();
        let mut target = physical("pg-1", "postgresql", &[], true);
        target.metadata.supported_roles = vec!["admin".to_string(), "ro".to_string()];
        let instruction = Instruction {
            id: "ins-1".to_string(),
            physical_database_id: "pg-1".to_string(),
            state: InstructionState::Created,
            target,
            entries: vec![AdditionalRoles {
                database_id: "ldb-existing".to_string(),
                roles: vec!["ro".to_string()],
                connection_properties: Vec::new(),
                resources: Vec::new(),
            }],
            current_portion: None,
            created_at: 1000,
            updated_at: 1000,
        };
        store.write(|tx| tx.put_instruction(&instruction)).unwrap();

        let (db, was_created) = created(
            router
                .get_or_create(&request(Classifier::service("ns", "orders")))
                .unwrap(),
        );
        assert!(was_created);
        assert_eq!(db.roles, vec!["admin".to_string()]);

        let live = store.instruction_for_physical_database("pg-1").unwrap().unwrap();
        assert_eq!(live.entries.len(), 2);
        assert_eq!(live.entry(&db.id).unwrap().roles, vec!["ro".to_string()]);

        // No live migration on pg-2, nothing to join.
        let mut pinned = request(Classifier::service("ns", "billing"));
        pinned.physical_database_id = Some("pg-2".to_string());
        created(router.get_or_create(&pinned).unwrap());
        assert!(store.instruction_for_physical_database("pg-2").unwrap().is_none());
    }
}
