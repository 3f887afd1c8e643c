//! Rule Store — conflict-validated writes of balancing rules and
//! microservice labels.
//!
//! Every write validates against the open write transaction, never a
//! snapshot taken earlier, so two concurrent writers cannot both pass
//! conflict checks against a stale view.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dbaas_core::{Labels, epoch_secs};
use dbaas_state::*;

use crate::debug::validate_microservice_rules;
use crate::error::{RoutingError, RoutingResult};

/// Body of an on-namespace rule PUT.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRuleRequest {
    #[serde(rename = "type")]
    pub db_type: String,
    #[serde(default)]
    pub order: u32,
    pub physical_database_id: String,
}

/// One permanent rule: a target shared by a set of namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermanentRule {
    #[serde(rename = "type")]
    pub db_type: String,
    pub physical_database_id: String,
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleWrite {
    Created,
    Updated,
}

#[derive(Clone)]
pub struct RuleStore {
    store: StateStore,
}

impl RuleStore {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    // ── On-namespace rules ─────────────────────────────────────────

    /// Create or replace the on-namespace rule `name` of `namespace`.
    ///
    /// Another rule of the namespace holding the same `(type, order)` is a
    /// conflict; the caller must delete or reorder it first.
    pub fn put_namespace_rule(
        &self,
        namespace: &str,
        name: &str,
        req: NamespaceRuleRequest,
    ) -> RoutingResult<(NamespaceRule, RuleWrite)> {
        key_part("namespace", namespace)?;
        key_part("rule name", name)?;
        key_part("type", &req.db_type)?;
        let rule = NamespaceRule {
            name: name.to_string(),
            namespace: namespace.to_string(),
            db_type: req.db_type,
            order: req.order,
            physical_database_id: req.physical_database_id,
            updated_at: epoch_secs(),
        };

        let write = self.store.write(|tx| {
            require_target(tx, &rule.physical_database_id, &rule.db_type)?;
            let existing = tx.namespace_rules(namespace)?;
            if let Some(other) = existing
                .iter()
                .find(|r| r.name != rule.name && r.db_type == rule.db_type && r.order == rule.order)
            {
                return Err(RoutingError::Conflict(format!(
                    "rule {} already holds order {} for type {}",
                    other.name, rule.order, rule.db_type
                )));
            }
            let write = if existing.iter().any(|r| r.name == rule.name) {
                RuleWrite::Updated
            } else {
                RuleWrite::Created
            };
            tx.put_namespace_rule(&rule)?;
            Ok(write)
        });

        match &write {
            Ok(w) => info!(
                namespace = %namespace,
                rule = %name,
                target = %rule.physical_database_id,
                write = ?w,
                "namespace rule accepted"
            ),
            Err(e) => warn!(namespace = %namespace, rule = %name, error = %e, "namespace rule rejected"),
        }
        Ok((rule, write?))
    }

    pub fn namespace_rules(&self, namespace: &str) -> RoutingResult<Vec<NamespaceRule>> {
        Ok(self.store.namespace_rules(namespace)?)
    }

    pub fn delete_namespace_rule(&self, namespace: &str, name: &str) -> RoutingResult<()> {
        if !self.store.write(|tx| tx.delete_namespace_rule(namespace, name))? {
            return Err(RoutingError::NotFound(format!("rule {namespace}/{name}")));
        }
        info!(namespace = %namespace, rule = %name, "namespace rule deleted");
        Ok(())
    }

    // ── On-microservice rules ──────────────────────────────────────

    /// Replace the on-microservice rule sets of `namespace` for every type
    /// `rules` mentions.
    pub fn put_microservice_rules(
        &self,
        namespace: &str,
        rules: Vec<OnMicroserviceRule>,
    ) -> RoutingResult<Vec<MicroserviceRuleSet>> {
        key_part("namespace", namespace)?;
        for rule in &rules {
            key_part("type", &rule.db_type)?;
        }
        let sets = self.store.write(|tx| {
            let problems = validate_microservice_rules(tx, &rules)?;
            if !problems.is_empty() {
                return Err(RoutingError::Validation(problems.join("; ")));
            }

            let mut by_type: BTreeMap<String, Vec<OnMicroserviceRule>> = BTreeMap::new();
            for rule in &rules {
                by_type.entry(rule.db_type.clone()).or_default().push(rule.clone());
            }
            let now = epoch_secs();
            let mut sets = Vec::with_capacity(by_type.len());
            for (db_type, mut rules) in by_type {
                rules.sort_by_key(|r| r.order);
                let set = MicroserviceRuleSet {
                    namespace: namespace.to_string(),
                    db_type,
                    rules,
                    updated_at: now,
                };
                tx.put_microservice_rule_set(&set)?;
                sets.push(set);
            }
            Ok(sets)
        })?;

        info!(
            namespace = %namespace,
            types = ?sets.iter().map(|s| s.db_type.as_str()).collect::<Vec<_>>(),
            "on-microservice rules replaced"
        );
        Ok(sets)
    }

    /// Stored on-microservice rules of `namespace`, all types.
    pub fn microservice_rules(&self, namespace: &str) -> RoutingResult<Vec<OnMicroserviceRule>> {
        Ok(self
            .store
            .microservice_rule_sets(namespace)?
            .into_iter()
            .flat_map(|set| set.rules)
            .collect())
    }

    // ── Permanent rules ────────────────────────────────────────────

    /// Store permanent rules for every namespace they name.
    ///
    /// A namespace + type claimed by two different targets, within the
    /// batch or against a stored rule, rejects the whole batch.
    pub fn put_permanent_rules(&self, rules: Vec<PermanentRule>) -> RoutingResult<Vec<PermanentRuleEntry>> {
        if rules.is_empty() {
            return Err(RoutingError::Validation("no permanent rules given".to_string()));
        }

        let result = self.store.write(|tx| {
            let mut claimed: BTreeMap<(String, String), String> = BTreeMap::new();
            for rule in &rules {
                if rule.namespaces.is_empty() {
                    return Err(RoutingError::Validation(format!(
                        "permanent rule for {} needs at least one namespace",
                        rule.physical_database_id
                    )));
                }
                key_part("type", &rule.db_type)?;
                for namespace in &rule.namespaces {
                    key_part("namespace", namespace)?;
                }
                require_target(tx, &rule.physical_database_id, &rule.db_type)?;

                for namespace in &rule.namespaces {
                    let key = (namespace.clone(), rule.db_type.clone());
                    if let Some(other) = claimed.get(&key) {
                        if other != &rule.physical_database_id {
                            return Err(permanent_conflict(namespace, &rule.db_type, other, &rule.physical_database_id));
                        }
                    }
                    if let Some(stored) = tx.permanent_rule(namespace, &rule.db_type)? {
                        if stored.physical_database_id != rule.physical_database_id {
                            return Err(permanent_conflict(
                                namespace,
                                &rule.db_type,
                                &stored.physical_database_id,
                                &rule.physical_database_id,
                            ));
                        }
                    }
                    claimed.insert(key, rule.physical_database_id.clone());
                }
            }

            let mut entries = Vec::with_capacity(claimed.len());
            for ((namespace, db_type), physical_database_id) in claimed {
                let entry = PermanentRuleEntry {
                    namespace,
                    db_type,
                    physical_database_id,
                };
                tx.put_permanent_rule(&entry)?;
                entries.push(entry);
            }
            Ok(entries)
        });

        match &result {
            Ok(entries) => info!(entries = entries.len(), "permanent rules accepted"),
            Err(e) => warn!(error = %e, "permanent rules rejected"),
        }
        result
    }

    pub fn permanent_rules(&self, namespace: Option<&str>) -> RoutingResult<Vec<PermanentRuleEntry>> {
        Ok(self.store.permanent_rules(namespace)?)
    }

    /// Delete the permanent rules of `namespace`, optionally only `db_type`.
    /// Returns how many entries were removed.
    pub fn delete_permanent_rules(&self, namespace: &str, db_type: Option<&str>) -> RoutingResult<usize> {
        let removed = self.store.write(|tx| {
            let mut removed = 0;
            for entry in tx.permanent_rules(Some(namespace))? {
                if db_type.is_some_and(|t| t != entry.db_type) {
                    continue;
                }
                if tx.delete_permanent_rule(&entry.namespace, &entry.db_type)? {
                    removed += 1;
                }
            }
            Ok::<_, RoutingError>(removed)
        })?;
        info!(namespace = %namespace, removed, "permanent rules deleted");
        Ok(removed)
    }

    // ── Microservice labels ────────────────────────────────────────

    pub fn put_microservice_labels(
        &self,
        namespace: &str,
        microservice: &str,
        labels: Labels,
    ) -> RoutingResult<MicroserviceLabels> {
        key_part("namespace", namespace)?;
        key_part("microservice name", microservice)?;
        if let Some((k, v)) = labels
            .iter()
            .find(|(k, v)| k.trim().is_empty() || v.trim().is_empty() || k.contains('=') || v.contains('='))
        {
            return Err(RoutingError::Validation(format!("invalid label `{k}={v}`")));
        }
        let record = MicroserviceLabels {
            namespace: namespace.to_string(),
            microservice: microservice.to_string(),
            labels,
            updated_at: epoch_secs(),
        };
        self.store.write(|tx| tx.put_microservice_labels(&record))?;
        info!(namespace = %namespace, microservice = %microservice, labels = record.labels.len(), "microservice labels stored");
        Ok(record)
    }

    /// Labels of a microservice; empty when none were stored.
    pub fn microservice_labels(&self, namespace: &str, microservice: &str) -> RoutingResult<Labels> {
        Ok(self
            .store
            .microservice_labels(namespace, microservice)?
            .map(|l| l.labels)
            .unwrap_or_default())
    }
}

/// Names used inside composite store keys: non-empty, no `/`.
fn key_part(what: &str, value: &str) -> RoutingResult<()> {
    if value.trim().is_empty() {
        return Err(RoutingError::Validation(format!("{what} must not be empty")));
    }
    if value.contains('/') {
        return Err(RoutingError::Validation(format!("{what} `{value}` must not contain `/`")));
    }
    Ok(())
}

/// The physical database must be registered with the rule's type.
fn require_target<V: StateRead>(view: &V, id: &str, db_type: &str) -> RoutingResult<PhysicalDatabase> {
    match view.physical_database(id)? {
        Some(db) if db.db_type == db_type => Ok(db),
        Some(db) => Err(RoutingError::Validation(format!(
            "physical database {id} has type {}, rule targets {db_type}",
            db.db_type
        ))),
        None => Err(RoutingError::Validation(format!("physical database {id} is not registered"))),
    }
}

fn permanent_conflict(namespace: &str, db_type: &str, a: &str, b: &str) -> RoutingError {
    RoutingError::PermanentRuleConflict(format!(
        "namespace {namespace} type {db_type} claimed by both {a} and {b}"
    ))
}
