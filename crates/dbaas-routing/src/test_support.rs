//! Fixtures shared by the routing unit tests.

use dbaas_core::{LabelSelector, Labels};
use dbaas_state::*;

pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn physical(id: &str, db_type: &str, pairs: &[(&str, &str)], global: bool) -> PhysicalDatabase {
    PhysicalDatabase {
        id: id.to_string(),
        db_type: db_type.to_string(),
        adapter_address: format!("http://{id}-adapter:8080"),
        adapter_id: None,
        metadata: AdapterMetadata {
            api_version: "v2".to_string(),
            supported_roles: vec!["admin".to_string()],
            features: Default::default(),
        },
        status: AdapterStatus::Run,
        labels: labels(pairs),
        global,
        read_only_host: None,
        registered_at: 1000,
        updated_at: 1000,
    }
}

pub fn put_physical(store: &StateStore, id: &str, db_type: &str, pairs: &[(&str, &str)], global: bool) {
    store
        .write(|tx| tx.put_physical_database(&physical(id, db_type, pairs, global)))
        .unwrap();
}

pub fn put_namespace_rule(store: &StateStore, namespace: &str, name: &str, order: u32, target: &str) {
    let rule = NamespaceRule {
        name: name.to_string(),
        namespace: namespace.to_string(),
        db_type: "postgresql".to_string(),
        order,
        physical_database_id: target.to_string(),
        updated_at: 1000,
    };
    store.write(|tx| tx.put_namespace_rule(&rule)).unwrap();
}

pub fn put_permanent(store: &StateStore, namespace: &str, target: &str) {
    let entry = PermanentRuleEntry {
        namespace: namespace.to_string(),
        db_type: "postgresql".to_string(),
        physical_database_id: target.to_string(),
    };
    store.write(|tx| tx.put_permanent_rule(&entry)).unwrap();
}

pub fn ms_rule(order: u32, microservices: &[&str], label: &str, target: Option<&str>) -> OnMicroserviceRule {
    OnMicroserviceRule {
        db_type: "postgresql".to_string(),
        order,
        microservices: microservices.iter().map(|m| m.to_string()).collect(),
        labels: vec![label.parse::<LabelSelector>().unwrap()],
        physical_database_id: target.map(str::to_string),
    }
}

pub fn put_ms_rules(store: &StateStore, namespace: &str, rules: Vec<OnMicroserviceRule>) {
    let set = MicroserviceRuleSet {
        namespace: namespace.to_string(),
        db_type: "postgresql".to_string(),
        rules,
        updated_at: 1000,
    };
    store.write(|tx| tx.put_microservice_rule_set(&set)).unwrap();
}

pub fn put_labels(store: &StateStore, namespace: &str, microservice: &str, pairs: &[(&str, &str)]) {
    let record = MicroserviceLabels {
        namespace: namespace.to_string(),
        microservice: microservice.to_string(),
        labels: labels(pairs),
        updated_at: 1000,
    };
    store.write(|tx| tx.put_microservice_labels(&record)).unwrap();
}
