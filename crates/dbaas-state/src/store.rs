//! StateStore — redb-backed state persistence for the DBaaS control plane.
//!
//! Reads go through [`StateRead`], implemented by a point-in-time
//! [`Snapshot`], by the write transaction [`Txn`] (so a writer sees its own
//! uncommitted changes), and by the store itself (one snapshot per call).
//!
//! Every mutation runs inside [`StateStore::write`]: the closure's `Ok`
//! commits, its `Err` aborts. redb admits one write transaction at a time,
//! so a check-then-write inside the closure cannot race another writer,
//! and readers never observe a half-applied change.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use dbaas_core::Classifier;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in ALL_TABLES {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Consistent read view of the committed state.
    pub fn snapshot(&self) -> StateResult<Snapshot> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        Ok(Snapshot { txn })
    }

    /// Run `f` inside a single write transaction.
    ///
    /// Commits when `f` returns `Ok`; aborts and discards every change made
    /// through the [`Txn`] when it returns `Err`.
    pub fn write<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&Txn) -> Result<R, E>,
        E: From<StateError>,
    {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| E::from(StateError::Transaction(e.to_string())))?;
        let tx = Txn { txn };
        match f(&tx) {
            Ok(out) => {
                tx.txn
                    .commit()
                    .map_err(|e| E::from(StateError::Transaction(e.to_string())))?;
                Ok(out)
            }
            Err(err) => {
                if let Err(e) = tx.txn.abort() {
                    warn!(error = %e, "failed to abort write transaction");
                }
                Err(err)
            }
        }
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn load_from<T, Tbl>(table: &Tbl, key: &str) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    let found = match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Some(decode(guard.value())?),
        None => None,
    };
    Ok(found)
}

fn scan_from<T, Tbl>(table: &Tbl, prefix: &str) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.range(prefix..).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if !key.value().starts_with(prefix) {
            break;
        }
        results.push(decode(value.value())?);
    }
    Ok(results)
}

// ── Reads ──────────────────────────────────────────────────────────

/// Typed read access shared by snapshots, write transactions and the store.
pub trait StateRead {
    /// Load one JSON record by key.
    fn load<T: DeserializeOwned>(&self, table: RecordTable, key: &str) -> StateResult<Option<T>>;

    /// Load every record whose key starts with `prefix`, in key order.
    fn scan<T: DeserializeOwned>(&self, table: RecordTable, prefix: &str) -> StateResult<Vec<T>>;

    fn physical_database(&self, id: &str) -> StateResult<Option<PhysicalDatabase>> {
        self.load(PHYSICAL_DATABASES, id)
    }

    fn physical_databases(&self) -> StateResult<Vec<PhysicalDatabase>> {
        self.scan(PHYSICAL_DATABASES, "")
    }

    /// Physical databases of one type, ordered by id.
    fn physical_databases_of_type(&self, db_type: &str) -> StateResult<Vec<PhysicalDatabase>> {
        let mut found: Vec<PhysicalDatabase> = self
            .physical_databases()?
            .into_iter()
            .filter(|p| p.db_type == db_type)
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    fn global_physical_database(&self, db_type: &str) -> StateResult<Option<PhysicalDatabase>> {
        Ok(self
            .physical_databases_of_type(db_type)?
            .into_iter()
            .find(|p| p.global))
    }

    fn logical_database(&self, id: &str) -> StateResult<Option<LogicalDatabase>> {
        self.load(LOGICAL_DATABASES, id)
    }

    /// Logical database indexed under `classifier` for `db_type`.
    fn find_logical_database(
        &self,
        db_type: &str,
        classifier: &Classifier,
    ) -> StateResult<Option<LogicalDatabase>> {
        let id: Option<String> = self.load(CLASSIFIER_INDEX, &classifier_key(db_type, classifier))?;
        match id {
            Some(id) => self.logical_database(&id),
            None => Ok(None),
        }
    }

    fn logical_databases(&self) -> StateResult<Vec<LogicalDatabase>> {
        self.scan(LOGICAL_DATABASES, "")
    }

    /// Non-archived logical databases bound to a physical database.
    fn logical_databases_on(&self, physical_database_id: &str) -> StateResult<Vec<LogicalDatabase>> {
        let mut found: Vec<LogicalDatabase> = self
            .logical_databases()?
            .into_iter()
            .filter(|l| l.physical_database_id == physical_database_id && !l.marked_for_drop)
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    fn namespace_rule(&self, namespace: &str, name: &str) -> StateResult<Option<NamespaceRule>> {
        self.load(NAMESPACE_RULES, &format!("{namespace}/{name}"))
    }

    fn namespace_rules(&self, namespace: &str) -> StateResult<Vec<NamespaceRule>> {
        let mut rules: Vec<NamespaceRule> = self.scan(NAMESPACE_RULES, &format!("{namespace}/"))?;
        rules.retain(|r| r.namespace == namespace);
        Ok(rules)
    }

    fn all_namespace_rules(&self) -> StateResult<Vec<NamespaceRule>> {
        self.scan(NAMESPACE_RULES, "")
    }

    fn permanent_rule(&self, namespace: &str, db_type: &str) -> StateResult<Option<PermanentRuleEntry>> {
        self.load(PERMANENT_RULES, &format!("{namespace}/{db_type}"))
    }

    /// Permanent rules, optionally limited to one namespace.
    fn permanent_rules(&self, namespace: Option<&str>) -> StateResult<Vec<PermanentRuleEntry>> {
        let prefix = namespace.map(|ns| format!("{ns}/")).unwrap_or_default();
        let mut entries: Vec<PermanentRuleEntry> = self.scan(PERMANENT_RULES, &prefix)?;
        if let Some(ns) = namespace {
            entries.retain(|e| e.namespace == ns);
        }
        Ok(entries)
    }

    fn microservice_rule_set(
        &self,
        namespace: &str,
        db_type: &str,
    ) -> StateResult<Option<MicroserviceRuleSet>> {
        self.load(MICROSERVICE_RULES, &format!("{namespace}/{db_type}"))
    }

    fn microservice_rule_sets(&self, namespace: &str) -> StateResult<Vec<MicroserviceRuleSet>> {
        let mut sets: Vec<MicroserviceRuleSet> = self.scan(MICROSERVICE_RULES, &format!("{namespace}/"))?;
        sets.retain(|s| s.namespace == namespace);
        Ok(sets)
    }

    fn microservice_labels(
        &self,
        namespace: &str,
        microservice: &str,
    ) -> StateResult<Option<MicroserviceLabels>> {
        self.load(MICROSERVICE_LABELS, &format!("{namespace}/{microservice}"))
    }

    fn blue_green_domain(&self, controller: &str) -> StateResult<Option<BlueGreenDomain>> {
        self.load(BLUE_GREEN_DOMAINS, controller)
    }

    fn blue_green_domains(&self) -> StateResult<Vec<BlueGreenDomain>> {
        self.scan(BLUE_GREEN_DOMAINS, "")
    }

    fn instruction(&self, id: &str) -> StateResult<Option<Instruction>> {
        self.load(INSTRUCTIONS, id)
    }

    fn instruction_for_physical_database(
        &self,
        physical_database_id: &str,
    ) -> StateResult<Option<Instruction>> {
        let id: Option<String> = self.load(INSTRUCTIONS_BY_PHYSICAL_DB, physical_database_id)?;
        match id {
            Some(id) => self.instruction(&id),
            None => Ok(None),
        }
    }
}

/// Point-in-time read view.
pub struct Snapshot {
    txn: ReadTransaction,
}

impl StateRead for Snapshot {
    fn load<T: DeserializeOwned>(&self, table: RecordTable, key: &str) -> StateResult<Option<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        load_from(&table, key)
    }

    fn scan<T: DeserializeOwned>(&self, table: RecordTable, prefix: &str) -> StateResult<Vec<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        scan_from(&table, prefix)
    }
}

impl StateRead for StateStore {
    fn load<T: DeserializeOwned>(&self, table: RecordTable, key: &str) -> StateResult<Option<T>> {
        self.snapshot()?.load(table, key)
    }

    fn scan<T: DeserializeOwned>(&self, table: RecordTable, prefix: &str) -> StateResult<Vec<T>> {
        self.snapshot()?.scan(table, prefix)
    }
}

// ── Writes ─────────────────────────────────────────────────────────

/// An open write transaction. Reads see the transaction's own changes.
pub struct Txn {
    txn: WriteTransaction,
}

impl StateRead for Txn {
    fn load<T: DeserializeOwned>(&self, table: RecordTable, key: &str) -> StateResult<Option<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        load_from(&table, key)
    }

    fn scan<T: DeserializeOwned>(&self, table: RecordTable, prefix: &str) -> StateResult<Vec<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        scan_from(&table, prefix)
    }
}

impl Txn {
    fn store<T: Serialize>(&self, table: RecordTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        table
            .insert(key, bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    fn remove(&self, table: RecordTable, key: &str) -> StateResult<bool> {
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        Ok(existed)
    }

    // ── Physical databases ─────────────────────────────────────────

    /// Insert or update a physical database.
    pub fn put_physical_database(&self, db: &PhysicalDatabase) -> StateResult<()> {
        self.store(PHYSICAL_DATABASES, &db.id, db)?;
        debug!(id = %db.id, db_type = %db.db_type, "physical database stored");
        Ok(())
    }

    /// Delete a physical database by id. Returns true if it existed.
    pub fn delete_physical_database(&self, id: &str) -> StateResult<bool> {
        let existed = self.remove(PHYSICAL_DATABASES, id)?;
        debug!(%id, existed, "physical database deleted");
        Ok(existed)
    }

    // ── Logical databases ──────────────────────────────────────────

    /// Insert or update a logical database and index its classifiers.
    ///
    /// Archived databases are stored but not indexed.
    pub fn put_logical_database(&self, db: &LogicalDatabase) -> StateResult<()> {
        self.store(LOGICAL_DATABASES, &db.id, db)?;
        let classifiers = std::iter::once(&db.classifier).chain(db.old_classifier.as_ref());
        for classifier in classifiers {
            let key = classifier_key(&db.db_type, classifier);
            if db.marked_for_drop {
                self.unindex_if_owned(&key, &db.id)?;
            } else {
                self.store(CLASSIFIER_INDEX, &key, &db.id)?;
            }
        }
        debug!(id = %db.id, physical_database_id = %db.physical_database_id, "logical database stored");
        Ok(())
    }

    /// Delete a logical database and its index entries.
    pub fn delete_logical_database(&self, id: &str) -> StateResult<bool> {
        let Some(db) = self.logical_database(id)? else {
            return Ok(false);
        };
        let classifiers = std::iter::once(&db.classifier).chain(db.old_classifier.as_ref());
        for classifier in classifiers {
            self.unindex_if_owned(&classifier_key(&db.db_type, classifier), id)?;
        }
        self.remove(LOGICAL_DATABASES, id)
    }

    fn unindex_if_owned(&self, key: &str, id: &str) -> StateResult<()> {
        let owner: Option<String> = self.load(CLASSIFIER_INDEX, key)?;
        if owner.as_deref() == Some(id) {
            self.remove(CLASSIFIER_INDEX, key)?;
        }
        Ok(())
    }

    // ── Rules ──────────────────────────────────────────────────────

    pub fn put_namespace_rule(&self, rule: &NamespaceRule) -> StateResult<()> {
        self.store(NAMESPACE_RULES, &rule.table_key(), rule)
    }

    pub fn delete_namespace_rule(&self, namespace: &str, name: &str) -> StateResult<bool> {
        self.remove(NAMESPACE_RULES, &format!("{namespace}/{name}"))
    }

    pub fn put_permanent_rule(&self, entry: &PermanentRuleEntry) -> StateResult<()> {
        self.store(PERMANENT_RULES, &entry.table_key(), entry)
    }

    pub fn delete_permanent_rule(&self, namespace: &str, db_type: &str) -> StateResult<bool> {
        self.remove(PERMANENT_RULES, &format!("{namespace}/{db_type}"))
    }

    pub fn put_microservice_rule_set(&self, set: &MicroserviceRuleSet) -> StateResult<()> {
        self.store(MICROSERVICE_RULES, &set.table_key(), set)
    }

    pub fn put_microservice_labels(&self, labels: &MicroserviceLabels) -> StateResult<()> {
        self.store(MICROSERVICE_LABELS, &labels.table_key(), labels)
    }

    // ── Blue-green ─────────────────────────────────────────────────

    pub fn put_blue_green_domain(&self, domain: &BlueGreenDomain) -> StateResult<()> {
        self.store(BLUE_GREEN_DOMAINS, &domain.controller_namespace, domain)
    }

    pub fn delete_blue_green_domain(&self, controller: &str) -> StateResult<bool> {
        self.remove(BLUE_GREEN_DOMAINS, controller)
    }

    // ── Instructions ───────────────────────────────────────────────

    /// Insert or update an instruction and its physical database index.
    pub fn put_instruction(&self, instruction: &Instruction) -> StateResult<()> {
        self.store(INSTRUCTIONS, &instruction.id, instruction)?;
        self.store(
            INSTRUCTIONS_BY_PHYSICAL_DB,
            &instruction.physical_database_id,
            &instruction.id,
        )
    }

    /// Delete an instruction and its index entry.
    pub fn delete_instruction(&self, id: &str) -> StateResult<bool> {
        let Some(instruction) = self.instruction(id)? else {
            return Ok(false);
        };
        let indexed: Option<String> =
            self.load(INSTRUCTIONS_BY_PHYSICAL_DB, &instruction.physical_database_id)?;
        if indexed.as_deref() == Some(id) {
            self.remove(INSTRUCTIONS_BY_PHYSICAL_DB, &instruction.physical_database_id)?;
        }
        self.remove(INSTRUCTIONS, id)
    }
}
