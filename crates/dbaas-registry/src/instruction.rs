//! Role-Migration Instruction Engine.
//!
//! An [`Instruction`] moves through these states:
//!
//! ```text
//! (none) ──drift detected──▶ Created ──portion issued──▶ InProgress
//!                                                          │  ▲
//!                                          success ack ────┘  │ next portion
//!                                                          │
//!                      no entries left ─▶ completed: target applied, deleted
//!                      failure / apply error ─▶ failed: deleted, target dropped
//! ```
//!
//! Only `Created` and `InProgress` are persisted. Completed and failed
//! instructions are deleted, so at most one live instruction exists per
//! physical database and a deleted one can never be half-applied.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use dbaas_core::{epoch_secs, generate_id};
use dbaas_state::*;

use crate::error::{RegistryError, RegistryResult};

/// Result of advancing an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationStep {
    /// Next bounded slice of work for the adapter.
    Portion {
        instruction_id: InstructionId,
        portion: Vec<AdditionalRoles>,
    },
    /// Every entry cleared; the physical database now carries the new roles.
    Completed { physical_database: PhysicalDatabase },
}

/// Per-database success reported by the adapter.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckSuccess {
    pub database_id: LogicalDatabaseId,
    #[serde(default)]
    pub resources: Vec<DbResource>,
    #[serde(default)]
    pub connection_properties: Vec<ConnectionProperties>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckFailure {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: String,
}

/// Adapter acknowledgement of one portion.
///
/// A `failure` fails the whole migration: the instruction is discarded and
/// any `success` entries sent alongside it are not applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AckRequest {
    #[serde(default)]
    pub success: Vec<AckSuccess>,
    #[serde(default)]
    pub failure: Option<AckFailure>,
}

#[derive(Clone)]
pub struct InstructionEngine {
    store: StateStore,
    portion_size: usize,
}

impl InstructionEngine {
    pub fn new(store: StateStore, portion_size: usize) -> Self {
        Self {
            store,
            portion_size: portion_size.max(1),
        }
    }

    pub fn portion_size(&self) -> usize {
        self.portion_size
    }

    pub fn find_instruction_by_phy_db_id(&self, physical_database_id: &str) -> RegistryResult<Option<Instruction>> {
        Ok(self.store.instruction_for_physical_database(physical_database_id)?)
    }

    /// Hand out the next portion of `instruction_id`, or complete it.
    pub fn find_next_portion(&self, instruction_id: &str) -> RegistryResult<MigrationStep> {
        self.store.write(|tx| {
            let instruction = tx
                .instruction(instruction_id)?
                .ok_or_else(|| RegistryError::NotFound(format!("instruction {instruction_id}")))?;
            self.advance(tx, instruction)
        })
    }

    /// Apply an adapter acknowledgement for a portion of `instruction_id`.
    ///
    /// A reported failure, or any error while applying successes, deletes
    /// the instruction and answers [`RegistryError::MigrationFailed`]; the
    /// successes of that call are rolled back with it.
    pub fn apply_acknowledgement(
        &self,
        physical_database_id: &str,
        instruction_id: &str,
        ack: AckRequest,
    ) -> RegistryResult<MigrationStep> {
        let known = self
            .store
            .instruction(instruction_id)?
            .is_some_and(|i| i.physical_database_id == physical_database_id);
        if !known {
            return Err(RegistryError::NotFound(format!(
                "instruction {instruction_id} for physical database {physical_database_id}"
            )));
        }

        if let Some(failure) = ack.failure {
            self.discard(instruction_id);
            warn!(
                instruction = %instruction_id,
                physical_database_id = %physical_database_id,
                code = ?failure.code,
                message = %failure.message,
                successes_dropped = ack.success.len(),
                "adapter reported role migration failure"
            );
            return Err(RegistryError::MigrationFailed(format!(
                "adapter reported failure: {}",
                failure.message
            )));
        }

        let applied = self.store.write(|tx| {
            let mut instruction = tx
                .instruction(instruction_id)?
                .ok_or_else(|| RegistryError::NotFound(format!("instruction {instruction_id}")))?;
            for success in &ack.success {
                apply_success(tx, &mut instruction, success)?;
            }
            instruction.current_portion = None;
            self.advance(tx, instruction)
        });

        match applied {
            Ok(step) => {
                info!(
                    instruction = %instruction_id,
                    acknowledged = ack.success.len(),
                    completed = matches!(step, MigrationStep::Completed { .. }),
                    "role migration acknowledgement applied"
                );
                Ok(step)
            }
            Err(RegistryError::NotFound(what)) => Err(RegistryError::NotFound(what)),
            Err(e) => {
                self.discard(instruction_id);
                warn!(instruction = %instruction_id, error = %e, "role migration failed while applying acknowledgement");
                Err(RegistryError::MigrationFailed(e.to_string()))
            }
        }
    }

    /// Create the instruction for migrating onto `target`, or resume the
    /// live one when it already targets the same role set.
    ///
    /// A live instruction for a different role set is replaced. Returns
    /// `None` when no logical database lacks a role of `target`.
    pub(crate) fn create_or_resume(
        &self,
        tx: &Txn,
        target: &PhysicalDatabase,
    ) -> RegistryResult<Option<(Instruction, bool)>> {
        let required = target.metadata.role_set();
        if let Some(mut live) = tx.instruction_for_physical_database(&target.id)? {
            if live.target.metadata.role_set() == required {
                live.target = target.clone();
                live.updated_at = epoch_secs();
                tx.put_instruction(&live)?;
                info!(instruction = %live.id, physical_database_id = %target.id, "role migration resumed");
                return Ok(Some((live, true)));
            }
            tx.delete_instruction(&live.id)?;
            info!(instruction = %live.id, physical_database_id = %target.id, "stale role migration replaced");
        }

        let entries: Vec<AdditionalRoles> = tx
            .logical_databases_on(&target.id)?
            .into_iter()
            .filter_map(|db| {
                let missing = db.missing_roles(&required);
                (!missing.is_empty()).then(|| AdditionalRoles {
                    database_id: db.id,
                    roles: missing,
                    connection_properties: db.connection_properties,
                    resources: db.resources,
                })
            })
            .collect();
        if entries.is_empty() {
            return Ok(None);
        }

        let now = epoch_secs();
        let instruction = Instruction {
            id: generate_id("instr", &target.id),
            physical_database_id: target.id.clone(),
            state: InstructionState::Created,
            target: target.clone(),
            entries,
            current_portion: None,
            created_at: now,
            updated_at: now,
        };
        tx.put_instruction(&instruction)?;
        info!(
            instruction = %instruction.id,
            physical_database_id = %target.id,
            entries = instruction.entries.len(),
            "role migration created"
        );
        Ok(Some((instruction, false)))
    }

    /// Issue the next portion of `instruction` inside `tx`, or complete it.
    ///
    /// A portion that was handed out but not acknowledged is handed out
    /// again; if it cannot be found it is recomputed from the remaining
    /// entries.
    pub(crate) fn advance(&self, tx: &Txn, mut instruction: Instruction) -> RegistryResult<MigrationStep> {
        if instruction.is_empty() {
            let mut physical_database = instruction.target.clone();
            if let Some(current) = tx.physical_database(&physical_database.id)? {
                // Flags changed since the instruction was created stay put.
                physical_database.global = current.global;
                physical_database.registered_at = current.registered_at;
            }
            physical_database.updated_at = epoch_secs();
            tx.put_physical_database(&physical_database)?;
            tx.delete_instruction(&instruction.id)?;
            info!(
                instruction = %instruction.id,
                physical_database_id = %physical_database.id,
                roles = ?physical_database.metadata.supported_roles,
                "role migration completed"
            );
            return Ok(MigrationStep::Completed { physical_database });
        }

        let reissued: Option<Vec<AdditionalRoles>> = instruction.current_portion.as_ref().and_then(|ids| {
            ids.iter()
                .map(|id| instruction.entry(id).cloned())
                .collect::<Option<Vec<_>>>()
                .filter(|p| !p.is_empty())
        });
        let portion = match reissued {
            Some(p) => p,
            None => instruction.entries.iter().take(self.portion_size).cloned().collect(),
        };

        instruction.current_portion = Some(portion.iter().map(|e| e.database_id.clone()).collect());
        instruction.state = InstructionState::InProgress;
        instruction.updated_at = epoch_secs();
        tx.put_instruction(&instruction)?;

        Ok(MigrationStep::Portion {
            instruction_id: instruction.id,
            portion,
        })
    }

    fn discard(&self, instruction_id: &str) {
        if let Err(e) = self.store.write(|tx| tx.delete_instruction(instruction_id)) {
            warn!(instruction = %instruction_id, error = %e, "failed to discard instruction");
        }
    }
}

/// Record the new roles of one acknowledged database and clear its entry.
fn apply_success(tx: &Txn, instruction: &mut Instruction, success: &AckSuccess) -> RegistryResult<()> {
    let entry = instruction.remove_entry(&success.database_id).ok_or_else(|| {
        RegistryError::Validation(format!(
            "database {} is not pending in instruction {}",
            success.database_id, instruction.id
        ))
    })?;
    let mut db = tx
        .logical_database(&success.database_id)?
        .ok_or_else(|| RegistryError::Validation(format!("logical database {} is gone", success.database_id)))?;

    for role in entry.roles {
        if !db.roles.contains(&role) {
            db.roles.push(role);
        }
    }
    for props in &success.connection_properties {
        let role = props.get("role");
        if role.is_some() {
            db.connection_properties.retain(|p| p.get("role") != role);
        }
        db.connection_properties.push(props.clone());
    }
    for resource in &success.resources {
        if !db.resources.contains(resource) {
            db.resources.push(resource.clone());
        }
    }
    tx.put_logical_database(&db)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn engine_with_databases(count: usize, portion_size: usize) -> (StateStore, InstructionEngine) {
        let store = StateStore::open_in_memory().unwrap();
        put_physical(&store, physical("pg-1", &["admin"], true));
        for i in 0..count {
            put_logical(&store, &format!("ldb-{i:02}"), "pg-1", &["admin"]);
        }
        let engine = InstructionEngine::new(store.clone(), portion_size);
        (store, engine)
    }

    fn start(store: &StateStore, engine: &InstructionEngine, roles: &[&str]) -> (Instruction, bool) {
        let target = physical("pg-1", roles, true);
        store
            .write(|tx| engine.create_or_resume(tx, &target))
            .unwrap()
            .unwrap()
    }

    fn portion(step: MigrationStep) -> (String, Vec<AdditionalRoles>) {
        match step {
            MigrationStep::Portion { instruction_id, portion } => (instruction_id, portion),
            other => panic!("expected portion, got {other:?}"),
        }
    }

    fn ack(ids: &[String]) -> AckRequest {
        AckRequest {
            success: ids
                .iter()
                .map(|id| AckSuccess {
                    database_id: id.clone(),
                    resources: vec![DbResource {
                        kind: "user".to_string(),
                        name: format!("{id}-ro"),
                    }],
                    connection_properties: vec![role_props("ro")],
                })
                .collect(),
            failure: None,
        }
    }

    #[test]
    fn instruction_lists_only_databases_missing_roles() {
        let (store, engine) = engine_with_databases(2, 20);
        put_logical(&store, "ldb-has-ro", "pg-1", &["admin", "ro"]);

        let (instruction, resumed) = start(&store, &engine, &["admin", "ro"]);
        assert!(!resumed);
        assert_eq!(instruction.state, InstructionState::Created);
        assert_eq!(instruction.entries.len(), 2);
        assert!(instruction.entries.iter().all(|e| e.roles == vec!["ro".to_string()]));
    }

    #[test]
    fn no_instruction_when_nothing_is_missing() {
        let (store, engine) = engine_with_databases(2, 20);
        let target = physical("pg-1", &["admin"], true);
        assert!(store.write(|tx| engine.create_or_resume(tx, &target)).unwrap().is_none());
    }

    #[test]
    fn second_handshake_resumes_same_instruction() {
        let (store, engine) = engine_with_databases(3, 20);
        let (first, _) = start(&store, &engine, &["admin", "ro"]);
        let (second, resumed) = start(&store, &engine, &["ro", "admin"]);
        assert!(resumed);
        assert_eq!(first.id, second.id);
        assert_eq!(engine.find_instruction_by_phy_db_id("pg-1").unwrap().unwrap().id, first.id);
    }

    #[test]
    fn different_role_set_replaces_instruction() {
        let (store, engine) = engine_with_databases(2, 20);
        let (first, _) = start(&store, &engine, &["admin", "ro"]);
        let (second, resumed) = start(&store, &engine, &["admin", "rw"]);
        assert!(!resumed);
        assert_ne!(first.id, second.id);
        assert!(store.instruction(&first.id).unwrap().is_none());
    }

    #[test]
    fn portions_are_bounded_and_reissued_until_acknowledged() {
        let (store, engine) = engine_with_databases(5, 2);
        let (instruction, _) = start(&store, &engine, &["admin", "ro"]);

        let (_, first) = portion(engine.find_next_portion(&instruction.id).unwrap());
        assert_eq!(first.len(), 2);
        let stored = store.instruction(&instruction.id).unwrap().unwrap();
        assert_eq!(stored.state, InstructionState::InProgress);

        // No ack in between: the same portion comes back.
        let (_, again) = portion(engine.find_next_portion(&instruction.id).unwrap());
        assert_eq!(again, first);
    }

    #[test]
    fn lost_portion_is_recomputed() {
        let (store, engine) = engine_with_databases(3, 2);
        let (instruction, _) = start(&store, &engine, &["admin", "ro"]);
        engine.find_next_portion(&instruction.id).unwrap();

        let mut stored = store.instruction(&instruction.id).unwrap().unwrap();
        stored.current_portion = Some(vec!["ldb-unknown".to_string()]);
        store.write(|tx| tx.put_instruction(&stored)).unwrap();

        let (_, recomputed) = portion(engine.find_next_portion(&instruction.id).unwrap());
        assert_eq!(recomputed.len(), 2);
        assert_eq!(recomputed[0].database_id, "ldb-00");
    }

    #[test]
    fn acknowledgements_walk_to_completion() {
        let (store, engine) = engine_with_databases(3, 2);
        let (instruction, _) = start(&store, &engine, &["admin", "ro"]);
        let (_, first) = portion(engine.find_next_portion(&instruction.id).unwrap());

        let ids: Vec<String> = first.iter().map(|e| e.database_id.clone()).collect();
        let (_, second) = portion(engine.apply_acknowledgement("pg-1", &instruction.id, ack(&ids)).unwrap());
        assert_eq!(second.len(), 1);

        let db = store.logical_database(&ids[0]).unwrap().unwrap();
        assert_eq!(db.roles, vec!["admin".to_string(), "ro".to_string()]);
        assert_eq!(db.connection_properties.len(), 2);
        assert_eq!(db.resources.len(), 1);

        let ids: Vec<String> = second.iter().map(|e| e.database_id.clone()).collect();
        let step = engine.apply_acknowledgement("pg-1", &instruction.id, ack(&ids)).unwrap();
        match step {
            MigrationStep::Completed { physical_database } => {
                assert_eq!(physical_database.metadata.supported_roles, vec!["admin", "ro"]);
                assert!(physical_database.global);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(store.instruction(&instruction.id).unwrap().is_none());
        let registered = store.physical_database("pg-1").unwrap().unwrap();
        assert_eq!(registered.metadata.supported_roles, vec!["admin", "ro"]);
    }

    #[test]
    fn reported_failure_discards_instruction() {
        let (store, engine) = engine_with_databases(2, 20);
        let (instruction, _) = start(&store, &engine, &["admin", "ro"]);
        engine.find_next_portion(&instruction.id).unwrap();

        let failed = AckRequest {
            success: Vec::new(),
            failure: Some(AckFailure {
                code: Some(Value::from(500)),
                message: "role creation failed".to_string(),
            }),
        };
        let err = engine.apply_acknowledgement("pg-1", &instruction.id, failed).unwrap_err();
        assert!(matches!(err, RegistryError::MigrationFailed(_)));
        assert!(store.instruction(&instruction.id).unwrap().is_none());
        // Registry keeps its last known good roles.
        let registered = store.physical_database("pg-1").unwrap().unwrap();
        assert_eq!(registered.metadata.supported_roles, vec!["admin"]);
    }

    #[test]
    fn failure_ignores_successes_in_same_ack() {
        let (store, engine) = engine_with_databases(2, 20);
        let (instruction, _) = start(&store, &engine, &["admin", "ro"]);
        engine.find_next_portion(&instruction.id).unwrap();

        let mut mixed = ack(&["ldb-00".to_string()]);
        mixed.failure = Some(AckFailure {
            code: None,
            message: "ldb-01 failed".to_string(),
        });
        let err = engine.apply_acknowledgement("pg-1", &instruction.id, mixed).unwrap_err();
        assert!(matches!(err, RegistryError::MigrationFailed(_)));
        assert!(store.instruction(&instruction.id).unwrap().is_none());

        let db = store.logical_database("ldb-00").unwrap().unwrap();
        assert_eq!(db.roles, vec!["admin".to_string()]);
        assert_eq!(db.connection_properties.len(), 1);
    }

    #[test]
    fn apply_error_rolls_back_and_discards() {
        let (store, engine) = engine_with_databases(2, 20);
        let (instruction, _) = start(&store, &engine, &["admin", "ro"]);
        engine.find_next_portion(&instruction.id).unwrap();

        // First id is valid, second is not part of the instruction.
        let bad = ack(&["ldb-00".to_string(), "ldb-unknown".to_string()]);
        let err = engine.apply_acknowledgement("pg-1", &instruction.id, bad).unwrap_err();
        assert!(matches!(err, RegistryError::MigrationFailed(_)));
        assert!(store.instruction(&instruction.id).unwrap().is_none());

        // The valid success was not applied either.
        let db = store.logical_database("ldb-00").unwrap().unwrap();
        assert_eq!(db.roles, vec!["admin".to_string()]);
    }

    #[test]
    fn unknown_or_mismatched_instruction_is_not_found() {
        let (store, engine) = engine_with_databases(1, 20);
        let (instruction, _) = start(&store, &engine, &["admin", "ro"]);

        assert!(matches!(
            engine.apply_acknowledgement("pg-1", "instr-missing", AckRequest::default()),
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            engine.apply_acknowledgement("pg-other", &instruction.id, AckRequest::default()),
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(engine.find_next_portion("instr-missing"), Err(RegistryError::NotFound(_))));
        // Still live after the bad calls.
        assert!(store.instruction(&instruction.id).unwrap().is_some());
    }
}
