//! Fixtures shared by the registry unit tests.

use std::collections::BTreeMap;

use dbaas_core::Classifier;
use dbaas_state::*;
use serde_json::Value;

pub fn metadata(roles: &[&str], multiusers: bool) -> AdapterMetadata {
    AdapterMetadata {
        api_version: "v2".to_string(),
        supported_roles: roles.iter().map(|r| r.to_string()).collect(),
        features: BTreeMap::from([(FEATURE_MULTIUSERS.to_string(), multiusers)]),
    }
}

pub fn physical(id: &str, roles: &[&str], global: bool) -> PhysicalDatabase {
    PhysicalDatabase {
        id: id.to_string(),
        db_type: "postgresql".to_string(),
        adapter_address: format!("http://{id}-adapter:8080"),
        adapter_id: None,
        metadata: metadata(roles, true),
        status: AdapterStatus::Run,
        labels: Default::default(),
        global,
        read_only_host: None,
        registered_at: 1000,
        updated_at: 1000,
    }
}

pub fn put_physical(store: &StateStore, db: PhysicalDatabase) {
    store.write(|tx| tx.put_physical_database(&db)).unwrap();
}

pub fn role_props(role: &str) -> ConnectionProperties {
    BTreeMap::from([
        ("role".to_string(), Value::from(role)),
        ("username".to_string(), Value::from(format!("user-{role}"))),
    ])
}

pub fn put_logical(store: &StateStore, id: &str, physical_database_id: &str, roles: &[&str]) {
    let db = LogicalDatabase {
        id: id.to_string(),
        classifier: Classifier::service("ns", id),
        old_classifier: None,
        db_type: "postgresql".to_string(),
        namespace: "ns".to_string(),
        physical_database_id: physical_database_id.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        resources: Vec::new(),
        connection_properties: roles.iter().map(|r| role_props(r)).collect(),
        bg_version: None,
        marked_for_drop: false,
        created_at: 1000,
    };
    store.write(|tx| tx.put_logical_database(&db)).unwrap();
}
