//! redb table definitions for the DBaaS state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Composite keys use `/` between parts. A `{namespace}/` prefix scan also
//! reaches namespaces that start with `{namespace}/`, so namespace-scoped
//! reads filter on the stored `namespace` field.

use redb::TableDefinition;

pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Physical databases keyed by `{physical_database_id}`.
pub const PHYSICAL_DATABASES: RecordTable = TableDefinition::new("physical_databases");

/// Logical databases keyed by `{logical_database_id}`.
pub const LOGICAL_DATABASES: RecordTable = TableDefinition::new("logical_databases");

/// Logical database ids keyed by `{db_type}/{canonical classifier}`.
pub const CLASSIFIER_INDEX: RecordTable = TableDefinition::new("classifier_index");

/// Transient on-namespace rules keyed by `{namespace}/{rule_name}`.
pub const NAMESPACE_RULES: RecordTable = TableDefinition::new("namespace_rules");

/// Permanent per-namespace rules keyed by `{namespace}/{db_type}`.
pub const PERMANENT_RULES: RecordTable = TableDefinition::new("permanent_rules");

/// On-microservice rule sets keyed by `{namespace}/{db_type}`.
pub const MICROSERVICE_RULES: RecordTable = TableDefinition::new("microservice_rules");

/// Microservice labels keyed by `{namespace}/{microservice}`.
pub const MICROSERVICE_LABELS: RecordTable = TableDefinition::new("microservice_labels");

/// Blue-green domains keyed by `{controller_namespace}`.
pub const BLUE_GREEN_DOMAINS: RecordTable = TableDefinition::new("blue_green_domains");

/// Role-migration instructions keyed by `{instruction_id}`.
pub const INSTRUCTIONS: RecordTable = TableDefinition::new("instructions");

/// Instruction ids keyed by `{physical_database_id}`.
pub const INSTRUCTIONS_BY_PHYSICAL_DB: RecordTable =
    TableDefinition::new("instructions_by_physical_db");

pub const ALL_TABLES: [RecordTable; 10] = [
    PHYSICAL_DATABASES,
    LOGICAL_DATABASES,
    CLASSIFIER_INDEX,
    NAMESPACE_RULES,
    PERMANENT_RULES,
    MICROSERVICE_RULES,
    MICROSERVICE_LABELS,
    BLUE_GREEN_DOMAINS,
    INSTRUCTIONS,
    INSTRUCTIONS_BY_PHYSICAL_DB,
];
