//! The read seam the resolver runs against.
//!
//! Production resolution reads committed state through the blanket
//! implementation for every [`StateRead`]. Debug evaluation wraps that
//! view in a [`RuleOverlay`] carrying hypothetical on-microservice rules and
//! labels, so both paths share one precedence algorithm.

use std::collections::BTreeMap;

use dbaas_core::Labels;
use dbaas_state::*;

/// Everything rule resolution needs to read.
pub trait RoutingView {
    /// On-microservice rules of `namespace` for `db_type`.
    fn on_microservice_rules(&self, namespace: &str, db_type: &str) -> StateResult<Vec<OnMicroserviceRule>>;

    /// Labels carried by a microservice of `namespace`.
    fn labels_of(&self, namespace: &str, microservice: &str) -> StateResult<Labels>;

    fn permanent_target(&self, namespace: &str, db_type: &str) -> StateResult<Option<PermanentRuleEntry>>;

    /// Transient on-namespace rules of `namespace` for `db_type`.
    fn namespace_rules_for(&self, namespace: &str, db_type: &str) -> StateResult<Vec<NamespaceRule>>;

    /// Physical databases of `db_type`, ordered by id.
    fn physical_databases_of(&self, db_type: &str) -> StateResult<Vec<PhysicalDatabase>>;
}

impl<T: StateRead> RoutingView for T {
    fn on_microservice_rules(&self, namespace: &str, db_type: &str) -> StateResult<Vec<OnMicroserviceRule>> {
        Ok(self
            .microservice_rule_set(namespace, db_type)?
            .map(|set| set.rules)
            .unwrap_or_default())
    }

    fn labels_of(&self, namespace: &str, microservice: &str) -> StateResult<Labels> {
        Ok(self
            .microservice_labels(namespace, microservice)?
            .map(|l| l.labels)
            .unwrap_or_default())
    }

    fn permanent_target(&self, namespace: &str, db_type: &str) -> StateResult<Option<PermanentRuleEntry>> {
        self.permanent_rule(namespace, db_type)
    }

    fn namespace_rules_for(&self, namespace: &str, db_type: &str) -> StateResult<Vec<NamespaceRule>> {
        Ok(self
            .namespace_rules(namespace)?
            .into_iter()
            .filter(|r| r.db_type == db_type)
            .collect())
    }

    fn physical_databases_of(&self, db_type: &str) -> StateResult<Vec<PhysicalDatabase>> {
        self.physical_databases_of_type(db_type)
    }
}

/// A base view with hypothetical on-microservice rules and labels for one
/// namespace layered on top.
///
/// Hypothetical rules replace the stored set only for the db types they
/// mention, mirroring how a rule PUT replaces stored sets.
pub struct RuleOverlay<'a, V> {
    base: &'a V,
    namespace: String,
    rules: Vec<OnMicroserviceRule>,
    labels: BTreeMap<String, Labels>,
}

impl<'a, V: RoutingView> RuleOverlay<'a, V> {
    pub fn new(base: &'a V, namespace: &str) -> Self {
        Self {
            base,
            namespace: namespace.to_string(),
            rules: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<OnMicroserviceRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_labels(mut self, microservice: &str, labels: Labels) -> Self {
        self.labels.insert(microservice.to_string(), labels);
        self
    }
}

impl<V: RoutingView> RoutingView for RuleOverlay<'_, V> {
    fn on_microservice_rules(&self, namespace: &str, db_type: &str) -> StateResult<Vec<OnMicroserviceRule>> {
        if namespace == self.namespace && self.rules.iter().any(|r| r.db_type == db_type) {
            return Ok(self
                .rules
                .iter()
                .filter(|r| r.db_type == db_type)
                .cloned()
                .collect());
        }
        self.base.on_microservice_rules(namespace, db_type)
    }

    fn labels_of(&self, namespace: &str, microservice: &str) -> StateResult<Labels> {
        if namespace == self.namespace {
            if let Some(labels) = self.labels.get(microservice) {
                return Ok(labels.clone());
            }
        }
        self.base.labels_of(namespace, microservice)
    }

    fn permanent_target(&self, namespace: &str, db_type: &str) -> StateResult<Option<PermanentRuleEntry>> {
        self.base.permanent_target(namespace, db_type)
    }

    fn namespace_rules_for(&self, namespace: &str, db_type: &str) -> StateResult<Vec<NamespaceRule>> {
        self.base.namespace_rules_for(namespace, db_type)
    }

    fn physical_databases_of(&self, db_type: &str) -> StateResult<Vec<PhysicalDatabase>> {
        self.base.physical_databases_of(db_type)
    }
}
