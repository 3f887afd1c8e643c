//! Domain types for the DBaaS state store.
//!
//! These types represent the persisted state of physical databases,
//! logical databases, balancing rules, blue-green domains and role
//! migration instructions. All types are serializable to/from JSON for
//! storage in redb tables.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use dbaas_core::{Classifier, LabelSelector, Labels};

/// Identifier of a registered physical database.
pub type PhysicalDatabaseId = String;

/// Identifier of a logical database.
pub type LogicalDatabaseId = String;

/// Identifier of a role-migration instruction.
pub type InstructionId = String;

/// Connection properties for one role, as reported by an adapter.
pub type ConnectionProperties = BTreeMap<String, Value>;

/// Adapter feature flag announcing per-role user support.
pub const FEATURE_MULTIUSERS: &str = "multiusers";

// ── Physical database ──────────────────────────────────────────────

/// Capabilities an adapter declares when it registers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterMetadata {
    pub api_version: String,
    #[serde(default)]
    pub supported_roles: Vec<String>,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

impl AdapterMetadata {
    pub fn supports_multiusers(&self) -> bool {
        self.features.get(FEATURE_MULTIUSERS).copied().unwrap_or(false)
    }

    /// Supported roles as a set; declaration order is not significant.
    pub fn role_set(&self) -> BTreeSet<&str> {
        self.supported_roles.iter().map(String::as_str).collect()
    }
}

/// Status an adapter reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    Run,
    #[serde(other)]
    Unknown,
}

/// A registered backing cluster fronted by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalDatabase {
    pub id: PhysicalDatabaseId,
    pub db_type: String,
    pub adapter_address: String,
    pub adapter_id: Option<String>,
    pub metadata: AdapterMetadata,
    pub status: AdapterStatus,
    pub labels: Labels,
    /// Default target for its type when no rule matches.
    pub global: bool,
    pub read_only_host: Option<String>,
    pub registered_at: u64,
    pub updated_at: u64,
}

// ── Logical database ───────────────────────────────────────────────

/// A resource an adapter created for a logical database (user, schema…).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbResource {
    pub kind: String,
    pub name: String,
}

/// A logical database bound to a physical database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalDatabase {
    pub id: LogicalDatabaseId,
    pub classifier: Classifier,
    /// Pre-scope classifier kept while clients migrate.
    pub old_classifier: Option<Classifier>,
    pub db_type: String,
    pub namespace: String,
    pub physical_database_id: PhysicalDatabaseId,
    /// Roles that have connection properties on this database.
    pub roles: Vec<String>,
    pub resources: Vec<DbResource>,
    pub connection_properties: Vec<ConnectionProperties>,
    /// Set on databases owned by blue-green switchover tooling.
    pub bg_version: Option<String>,
    /// Archived databases no longer pin their physical database.
    pub marked_for_drop: bool,
    pub created_at: u64,
}

impl LogicalDatabase {
    /// Roles from `required` that this database does not have yet.
    pub fn missing_roles(&self, required: &BTreeSet<&str>) -> Vec<String> {
        required
            .iter()
            .filter(|role| !self.roles.iter().any(|r| r == *role))
            .map(|role| role.to_string())
            .collect()
    }
}

// ── Balancing rules ────────────────────────────────────────────────

/// Transient on-namespace rule, deleted with its physical database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRule {
    pub name: String,
    pub namespace: String,
    pub db_type: String,
    /// Lower order wins.
    pub order: u32,
    pub physical_database_id: PhysicalDatabaseId,
    pub updated_at: u64,
}

/// One namespace's entry of a permanent rule. Survives deregistration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermanentRuleEntry {
    pub namespace: String,
    pub db_type: String,
    pub physical_database_id: PhysicalDatabaseId,
}

/// Label-based rule scoped to microservices of one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnMicroserviceRule {
    #[serde(rename = "type")]
    pub db_type: String,
    #[serde(default)]
    pub order: u32,
    /// Empty means every microservice of the namespace.
    #[serde(default)]
    pub microservices: Vec<String>,
    /// Any-match against the requesting microservice's labels.
    pub labels: Vec<LabelSelector>,
    /// Pinned target; otherwise a physical database carrying the label.
    #[serde(default)]
    pub physical_database_id: Option<PhysicalDatabaseId>,
}

impl OnMicroserviceRule {
    pub fn applies_to(&self, microservice: &str) -> bool {
        self.microservices.is_empty() || self.microservices.iter().any(|m| m == microservice)
    }

    /// First rule label carried by `labels`.
    pub fn matched_label(&self, labels: &Labels) -> Option<&LabelSelector> {
        self.labels.iter().find(|l| l.matches(labels))
    }
}

/// The stored on-microservice rules for one namespace and db type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicroserviceRuleSet {
    pub namespace: String,
    pub db_type: String,
    pub rules: Vec<OnMicroserviceRule>,
    pub updated_at: u64,
}

/// Labels carried by one microservice of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicroserviceLabels {
    pub namespace: String,
    pub microservice: String,
    pub labels: Labels,
    pub updated_at: u64,
}

// ── Blue-green ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceState {
    Active,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueGreenMember {
    pub namespace: String,
    pub state: NamespaceState,
    #[serde(default)]
    pub version: Option<String>,
}

/// A controller namespace and the member namespaces it switches between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueGreenDomain {
    pub controller_namespace: String,
    pub members: Vec<BlueGreenMember>,
    pub updated_at: u64,
}

impl BlueGreenDomain {
    pub fn active_member(&self) -> Option<&BlueGreenMember> {
        self.members.iter().find(|m| m.state == NamespaceState::Active)
    }
}

// ── Instructions ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionState {
    /// Persisted, no portion handed out yet.
    Created,
    /// At least one portion handed out.
    InProgress,
}

/// Roles still to be created for one logical database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalRoles {
    pub database_id: LogicalDatabaseId,
    pub roles: Vec<String>,
    /// Existing connection properties, so the adapter can locate the database.
    pub connection_properties: Vec<ConnectionProperties>,
    pub resources: Vec<DbResource>,
}

/// Resumable role migration for one physical database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub id: InstructionId,
    pub physical_database_id: PhysicalDatabaseId,
    pub state: InstructionState,
    /// Registry entry to apply once every entry is cleared.
    pub target: PhysicalDatabase,
    pub entries: Vec<AdditionalRoles>,
    /// Database ids of the portion last handed out.
    pub current_portion: Option<Vec<LogicalDatabaseId>>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Instruction {
    pub fn entry(&self, database_id: &str) -> Option<&AdditionalRoles> {
        self.entries.iter().find(|e| e.database_id == database_id)
    }

    pub fn add_entry(&mut self, entry: AdditionalRoles) {
        self.remove_entry(&entry.database_id);
        self.entries.push(entry);
    }

    pub fn remove_entry(&mut self, database_id: &str) -> Option<AdditionalRoles> {
        let pos = self.entries.iter().position(|e| e.database_id == database_id)?;
        Some(self.entries.remove(pos))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Table keys ─────────────────────────────────────────────────────

/// Classifier index key for a db type.
pub fn classifier_key(db_type: &str, classifier: &Classifier) -> String {
    format!("{db_type}/{}", classifier.canonical_key())
}

impl NamespaceRule {
    /// Build the composite key for the namespace rules table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl PermanentRuleEntry {
    /// Build the composite key for the permanent rules table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.db_type)
    }
}

impl MicroserviceRuleSet {
    /// Build the composite key for the microservice rules table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.db_type)
    }
}

impl MicroserviceLabels {
    /// Build the composite key for the microservice labels table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.microservice)
    }
}
