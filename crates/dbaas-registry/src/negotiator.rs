//! Adapter Capability Negotiator — the registration handshake.
//!
//! Decision order for `on_register`:
//!
//! 1. unknown physical database → create the entry
//! 2. nothing changed → unchanged, no adapter call
//! 3. roles changed, adapter without multiusers or nothing bound → update
//!    in place; otherwise hand off to the [`InstructionEngine`]
//!
//! Every outcome except "unchanged" first probes the adapter. An
//! unreachable adapter is its own outcome and never touches the registry.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use dbaas_core::{Labels, epoch_secs};
use dbaas_state::*;

use crate::adapter::AdapterClient;
use crate::error::{RegistryError, RegistryResult};
use crate::instruction::{InstructionEngine, MigrationStep};

/// Body of the adapter's registration call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub adapter_address: String,
    #[serde(default)]
    pub adapter_id: Option<String>,
    #[serde(default)]
    pub labels: Labels,
    pub metadata: AdapterMetadata,
    pub status: AdapterStatus,
    #[serde(default)]
    pub read_only_host: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    Created(PhysicalDatabase),
    Unchanged(PhysicalDatabase),
    Updated(PhysicalDatabase),
    MigrationPending {
        instruction: Instruction,
        portion: Vec<AdditionalRoles>,
        resumed: bool,
    },
    AdapterUnavailable {
        reason: String,
    },
}

#[derive(Clone)]
pub struct CapabilityNegotiator {
    store: StateStore,
    engine: InstructionEngine,
    adapter: Arc<dyn AdapterClient>,
}

impl CapabilityNegotiator {
    pub fn new(store: StateStore, engine: InstructionEngine, adapter: Arc<dyn AdapterClient>) -> Self {
        Self { store, engine, adapter }
    }

    pub async fn on_register(
        &self,
        physical_database_id: &str,
        db_type: &str,
        req: RegistrationRequest,
    ) -> RegistryResult<RegistrationOutcome> {
        if req.status != AdapterStatus::Run {
            return Err(RegistryError::BadAdapterState(format!(
                "adapter for {physical_database_id} reports status {:?}, expected run",
                req.status
            )));
        }
        if physical_database_id.trim().is_empty() || req.adapter_address.trim().is_empty() {
            return Err(RegistryError::Validation(
                "physical database id and adapter address are required".to_string(),
            ));
        }

        let existing = self.store.physical_database(physical_database_id)?;
        check_identity(&self.store, physical_database_id, db_type, &req)?;
        if let Some(current) = &existing {
            if unchanged(current, &req) && abandoned_migration(&self.store, current)?.is_none() {
                info!(id = %physical_database_id, "registration unchanged");
                return Ok(RegistrationOutcome::Unchanged(current.clone()));
            }
        }

        if let Err(e) = self.adapter.probe(&req.adapter_address).await {
            warn!(
                id = %physical_database_id,
                address = %req.adapter_address,
                error = %e,
                "adapter unreachable during registration"
            );
            return Ok(RegistrationOutcome::AdapterUnavailable { reason: e.to_string() });
        }

        let outcome = self
            .store
            .write(|tx| self.decide(tx, physical_database_id, db_type, &req))?;
        log_outcome(physical_database_id, &outcome);
        Ok(outcome)
    }

    /// Re-check and persist the decision inside one write transaction, so
    /// two concurrent handshakes for the same id cannot both create an
    /// instruction.
    fn decide(
        &self,
        tx: &Txn,
        id: &str,
        db_type: &str,
        req: &RegistrationRequest,
    ) -> RegistryResult<RegistrationOutcome> {
        check_identity(tx, id, db_type, req)?;
        let now = epoch_secs();

        let Some(current) = tx.physical_database(id)? else {
            let first_of_type = tx.global_physical_database(db_type)?.is_none();
            let db = PhysicalDatabase {
                id: id.to_string(),
                db_type: db_type.to_string(),
                adapter_address: req.adapter_address.clone(),
                adapter_id: req.adapter_id.clone(),
                metadata: req.metadata.clone(),
                status: req.status,
                labels: req.labels.clone(),
                global: first_of_type,
                read_only_host: req.read_only_host.clone(),
                registered_at: now,
                updated_at: now,
            };
            tx.put_physical_database(&db)?;
            return Ok(RegistrationOutcome::Created(db));
        };
        if unchanged(&current, req) {
            // Back on the registered roles: the live migration targets roles
            // the adapter no longer declares.
            if let Some(stale) = abandoned_migration(tx, &current)? {
                tx.delete_instruction(&stale.id)?;
                info!(id = %id, instruction = %stale.id, "abandoned role migration discarded");
            }
            return Ok(RegistrationOutcome::Unchanged(current));
        }

        let target = PhysicalDatabase {
            adapter_address: req.adapter_address.clone(),
            adapter_id: req.adapter_id.clone(),
            metadata: req.metadata.clone(),
            status: req.status,
            labels: req.labels.clone(),
            read_only_host: req.read_only_host.clone(),
            updated_at: now,
            ..current.clone()
        };

        let roles_changed = current.metadata.role_set() != target.metadata.role_set();
        if roles_changed && target.metadata.supports_multiusers() {
            if let Some((instruction, resumed)) = self.engine.create_or_resume(tx, &target)? {
                return match self.engine.advance(tx, instruction)? {
                    MigrationStep::Portion { instruction_id, portion } => {
                        let instruction = tx
                            .instruction(&instruction_id)?
                            .ok_or_else(|| RegistryError::NotFound(format!("instruction {instruction_id}")))?;
                        Ok(RegistrationOutcome::MigrationPending {
                            instruction,
                            portion,
                            resumed,
                        })
                    }
                    MigrationStep::Completed { physical_database } => {
                        Ok(RegistrationOutcome::Updated(physical_database))
                    }
                };
            }
        }

        // In-place update supersedes any migration still targeting old roles.
        if let Some(stale) = tx.instruction_for_physical_database(id)? {
            tx.delete_instruction(&stale.id)?;
        }
        tx.put_physical_database(&target)?;
        Ok(RegistrationOutcome::Updated(target))
    }
}

/// The id must keep its type, and an adapter address belongs to one id.
fn check_identity<V: StateRead>(
    view: &V,
    id: &str,
    db_type: &str,
    req: &RegistrationRequest,
) -> RegistryResult<()> {
    if let Some(existing) = view.physical_database(id)? {
        if existing.db_type != db_type {
            return Err(RegistryError::Conflict(format!(
                "physical database {id} is registered with type {}",
                existing.db_type
            )));
        }
    }
    if let Some(other) = view
        .physical_databases()?
        .into_iter()
        .find(|p| p.id != id && p.adapter_address == req.adapter_address)
    {
        return Err(RegistryError::Conflict(format!(
            "adapter {} is already registered for physical database {}",
            req.adapter_address, other.id
        )));
    }
    Ok(())
}

/// Live instruction for `current` whose target role set differs from the
/// registered one.
fn abandoned_migration<V: StateRead>(view: &V, current: &PhysicalDatabase) -> RegistryResult<Option<Instruction>> {
    Ok(view
        .instruction_for_physical_database(&current.id)?
        .filter(|i| i.target.metadata.role_set() != current.metadata.role_set()))
}

fn unchanged(current: &PhysicalDatabase, req: &RegistrationRequest) -> bool {
    current.adapter_address == req.adapter_address
        && current.adapter_id == req.adapter_id
        && current.status == req.status
        && current.labels == req.labels
        && current.read_only_host == req.read_only_host
        && current.metadata.api_version == req.metadata.api_version
        && current.metadata.features == req.metadata.features
        && current.metadata.role_set() == req.metadata.role_set()
}

fn log_outcome(id: &str, outcome: &RegistrationOutcome) {
    match outcome {
        RegistrationOutcome::Created(db) => {
            info!(id = %id, db_type = %db.db_type, global = db.global, "physical database registered")
        }
        RegistrationOutcome::Unchanged(_) => info!(id = %id, "registration unchanged"),
        RegistrationOutcome::Updated(db) => {
            info!(id = %id, roles = ?db.metadata.supported_roles, "physical database updated")
        }
        RegistrationOutcome::MigrationPending {
            instruction,
            portion,
            resumed,
        } => info!(
            id = %id,
            instruction = %instruction.id,
            pending = instruction.entries.len(),
            portion = portion.len(),
            resumed = *resumed,
            "role migration pending"
        ),
        RegistrationOutcome::AdapterUnavailable { reason } => {
            warn!(id = %id, reason = %reason, "adapter unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::adapter::AdapterError;
    use crate::instruction::{AckRequest, AckSuccess};
    use crate::test_support::*;

    #[derive(Default)]
    struct StubAdapter {
        down: bool,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl AdapterClient for StubAdapter {
        async fn probe(&self, _address: &str) -> Result<(), AdapterError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.down {
                Err(AdapterError::Connect("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn negotiator(adapter: Arc<StubAdapter>) -> (StateStore, CapabilityNegotiator) {
        let store = StateStore::open_in_memory().unwrap();
        let engine = InstructionEngine::new(store.clone(), 20);
        (store.clone(), CapabilityNegotiator::new(store, engine, adapter))
    }

    fn registration(roles: &[&str], multiusers: bool) -> RegistrationRequest {
        RegistrationRequest {
            adapter_address: "http://phydb-1-adapter:8080".to_string(),
            adapter_id: Some("adapter-1".to_string()),
            labels: Labels::new(),
            metadata: metadata(roles, multiusers),
            status: AdapterStatus::Run,
            read_only_host: None,
        }
    }

    #[tokio::test]
    async fn first_registration_creates_global_entry() {
        let (store, n) = negotiator(Arc::new(StubAdapter::default()));
        let outcome = n.on_register("phydb-1", "mongodb", registration(&["admin"], false)).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Created(ref db) if db.global));

        let mut second = registration(&["admin"], false);
        second.adapter_address = "http://phydb-2-adapter:8080".to_string();
        let outcome = n.on_register("phydb-2", "mongodb", second).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Created(ref db) if !db.global));
        assert_eq!(store.global_physical_database("mongodb").unwrap().unwrap().id, "phydb-1");
    }

    #[tokio::test]
    async fn repeated_registration_is_unchanged_without_probe() {
        let adapter = Arc::new(StubAdapter::default());
        let (_, n) = negotiator(adapter.clone());
        n.on_register("phydb-1", "postgresql", registration(&["admin"], true)).await.unwrap();
        let outcome = n.on_register("phydb-1", "postgresql", registration(&["admin"], true)).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Unchanged(_)));
        assert_eq!(adapter.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn role_order_does_not_count_as_change() {
        let (_, n) = negotiator(Arc::new(StubAdapter::default()));
        n.on_register("phydb-1", "postgresql", registration(&["admin", "ro"], true)).await.unwrap();
        let outcome = n.on_register("phydb-1", "postgresql", registration(&["ro", "admin"], true)).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Unchanged(_)));
    }

    #[tokio::test]
    async fn unreachable_adapter_is_reported_and_nothing_is_stored() {
        let adapter = Arc::new(StubAdapter {
            down: true,
            ..StubAdapter::default()
        });
        let (store, n) = negotiator(adapter);
        let outcome = n.on_register("phydb-1", "postgresql", registration(&["admin"], true)).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::AdapterUnavailable { .. }));
        assert!(store.physical_database("phydb-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn bad_status_and_identity_conflicts() {
        let (_, n) = negotiator(Arc::new(StubAdapter::default()));
        let mut stopped = registration(&["admin"], true);
        stopped.status = AdapterStatus::Unknown;
        assert!(matches!(
            n.on_register("phydb-1", "postgresql", stopped).await,
            Err(RegistryError::BadAdapterState(_))
        ));

        n.on_register("phydb-1", "postgresql", registration(&["admin"], true)).await.unwrap();
        assert!(matches!(
            n.on_register("phydb-1", "mongodb", registration(&["admin"], true)).await,
            Err(RegistryError::Conflict(_))
        ));
        // Same adapter address under another id.
        assert!(matches!(
            n.on_register("phydb-2", "postgresql", registration(&["admin"], true)).await,
            Err(RegistryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn role_change_without_multiusers_updates_in_place() {
        let (store, n) = negotiator(Arc::new(StubAdapter::default()));
        n.on_register("phydb-1", "postgresql", registration(&["admin"], false)).await.unwrap();
        put_logical(&store, "ldb-1", "phydb-1", &["admin"]);

        let outcome = n.on_register("phydb-1", "postgresql", registration(&["admin", "ro"], false)).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Updated(_)));
        assert!(store.instruction_for_physical_database("phydb-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn role_change_without_logical_databases_updates_in_place() {
        let (store, n) = negotiator(Arc::new(StubAdapter::default()));
        n.on_register("phydb-1", "postgresql", registration(&["admin"], true)).await.unwrap();
        let outcome = n.on_register("phydb-1", "postgresql", registration(&["admin", "ro"], true)).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Updated(_)));
        let db = store.physical_database("phydb-1").unwrap().unwrap();
        assert_eq!(db.metadata.supported_roles, vec!["admin", "ro"]);
    }

    #[tokio::test]
    async fn role_change_with_bound_databases_starts_one_migration() {
        let (store, n) = negotiator(Arc::new(StubAdapter::default()));
        n.on_register("phydb-1", "postgresql", registration(&["admin"], true)).await.unwrap();
        put_logical(&store, "ldb-1", "phydb-1", &["admin"]);
        put_logical(&store, "ldb-2", "phydb-1", &["admin"]);

        let first = n.on_register("phydb-1", "postgresql", registration(&["admin", "ro"], true)).await.unwrap();
        let RegistrationOutcome::MigrationPending {
            instruction, portion, resumed,
        } = first
        else {
            panic!("expected migration, got {first:?}");
        };
        assert!(!resumed);
        assert_eq!(instruction.entries.len(), 2);
        assert_eq!(portion.len(), 2);
        // Registry keeps the old roles until the migration completes.
        let db = store.physical_database("phydb-1").unwrap().unwrap();
        assert_eq!(db.metadata.supported_roles, vec!["admin"]);

        let second = n.on_register("phydb-1", "postgresql", registration(&["admin", "ro"], true)).await.unwrap();
        match second {
            RegistrationOutcome::MigrationPending {
                instruction: again,
                resumed,
                ..
            } => {
                assert!(resumed);
                assert_eq!(again.id, instruction.id);
            }
            other => panic!("expected migration, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn returning_to_registered_roles_discards_the_migration() {
        let (store, n) = negotiator(Arc::new(StubAdapter::default()));
        n.on_register("phydb-1", "postgresql", registration(&["admin"], true)).await.unwrap();
        put_logical(&store, "ldb-1", "phydb-1", &["admin"]);

        let pending = n.on_register("phydb-1", "postgresql", registration(&["admin", "ro"], true)).await.unwrap();
        let RegistrationOutcome::MigrationPending { instruction, .. } = pending else {
            panic!("expected migration, got {pending:?}");
        };

        let back = n.on_register("phydb-1", "postgresql", registration(&["admin"], true)).await.unwrap();
        assert!(matches!(back, RegistrationOutcome::Unchanged(_)));
        assert!(store.instruction_for_physical_database("phydb-1").unwrap().is_none());

        // A late acknowledgement for the abandoned roles applies nothing.
        let engine = InstructionEngine::new(store.clone(), 20);
        let ack = AckRequest {
            success: vec![AckSuccess {
                database_id: "ldb-1".to_string(),
                resources: Vec::new(),
                connection_properties: vec![role_props("ro")],
            }],
            failure: None,
        };
        assert!(matches!(
            engine.apply_acknowledgement("phydb-1", &instruction.id, ack),
            Err(RegistryError::NotFound(_))
        ));
        let db = store.physical_database("phydb-1").unwrap().unwrap();
        assert_eq!(db.metadata.supported_roles, vec!["admin"]);
        assert_eq!(store.logical_database("ldb-1").unwrap().unwrap().roles, vec!["admin"]);
    }
}
