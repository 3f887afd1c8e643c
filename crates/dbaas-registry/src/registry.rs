//! Physical Database Registry maintenance.

use tracing::info;

use dbaas_core::epoch_secs;
use dbaas_state::*;

use crate::error::{RegistryError, RegistryResult};

/// Catalog of registered physical databases.
#[derive(Clone)]
pub struct PhysicalDatabaseRegistry {
    store: StateStore,
}

impl PhysicalDatabaseRegistry {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn list(&self, db_type: Option<&str>) -> RegistryResult<Vec<PhysicalDatabase>> {
        let all = match db_type {
            Some(t) => self.store.physical_databases_of_type(t)?,
            None => self.store.physical_databases()?,
        };
        Ok(all)
    }

    pub fn get(&self, id: &str) -> RegistryResult<PhysicalDatabase> {
        self.store
            .physical_database(id)?
            .ok_or_else(|| RegistryError::NotFound(format!("physical database {id}")))
    }

    /// Make `id` the global physical database of its type, clearing the
    /// flag on the previous one in the same transaction.
    pub fn set_global(&self, id: &str) -> RegistryResult<PhysicalDatabase> {
        let (db, previous) = self.store.write(|tx| {
            let mut db = tx
                .physical_database(id)?
                .ok_or_else(|| RegistryError::NotFound(format!("physical database {id}")))?;
            let previous = tx.global_physical_database(&db.db_type)?;
            if let Some(mut prev) = previous.clone().filter(|p| p.id != db.id) {
                prev.global = false;
                prev.updated_at = epoch_secs();
                tx.put_physical_database(&prev)?;
            }
            db.global = true;
            db.updated_at = epoch_secs();
            tx.put_physical_database(&db)?;
            Ok::<_, RegistryError>((db, previous.map(|p| p.id)))
        })?;
        info!(
            id = %db.id,
            db_type = %db.db_type,
            previous = ?previous,
            "global physical database set"
        );
        Ok(db)
    }

    /// Deregister a physical database.
    ///
    /// Rejected while it is global or still hosts a non-archived logical
    /// database. Transient on-namespace rules targeting it are deleted,
    /// permanent rules are kept. Returns the number of rules removed.
    pub fn delete(&self, id: &str) -> RegistryResult<usize> {
        let removed = self.store.write(|tx| {
            let db = tx
                .physical_database(id)?
                .ok_or_else(|| RegistryError::NotFound(format!("physical database {id}")))?;
            if db.global {
                return Err(RegistryError::Conflict(format!(
                    "physical database {id} is the global database of type {}",
                    db.db_type
                )));
            }
            let hosted = tx.logical_databases_on(id)?;
            if !hosted.is_empty() {
                return Err(RegistryError::Conflict(format!(
                    "physical database {id} still hosts {} logical databases",
                    hosted.len()
                )));
            }

            let mut removed = 0;
            for rule in tx.all_namespace_rules()? {
                if rule.physical_database_id == id && tx.delete_namespace_rule(&rule.namespace, &rule.name)? {
                    removed += 1;
                }
            }
            if let Some(live) = tx.instruction_for_physical_database(id)? {
                tx.delete_instruction(&live.id)?;
            }
            tx.delete_physical_database(id)?;
            Ok(removed)
        })?;
        info!(id = %id, rules_removed = removed, "physical database deregistered");
        Ok(removed)
    }
}
