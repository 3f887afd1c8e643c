//! Debug-evaluate and validate modes for on-microservice rules.
//!
//! Neither mode writes state. Evaluation runs the production resolver over
//! a [`RuleOverlay`], so a debug answer is exactly what a create would do
//! once the hypothetical rules and labels were stored.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use dbaas_core::Labels;
use dbaas_state::OnMicroserviceRule;

use crate::error::{RoutingError, RoutingResult};
use crate::resolver::{AppliedRule, Resolution, RouteRequest, resolve};
use crate::view::{RoutingView, RuleOverlay};

/// A candidate microservice and the labels it would carry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugMicroservice {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugRequest {
    /// Hypothetical rules; empty evaluates the stored ones.
    #[serde(default)]
    pub rules: Vec<OnMicroserviceRule>,
    pub microservices: Vec<DebugMicroservice>,
    /// Types to evaluate; defaults to the types the rules mention.
    #[serde(default)]
    pub db_types: Vec<String>,
}

/// Why one microservice would land where it lands, for one db type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugDecision {
    pub physical_database_id: Option<String>,
    pub applied: Option<AppliedRule>,
    pub labels: Labels,
}

/// Microservice name → db type → decision.
pub type DebugReport = BTreeMap<String, BTreeMap<String, DebugDecision>>;

/// Evaluate `req` for `namespace` without touching stored rules.
pub fn evaluate<V: RoutingView>(view: &V, namespace: &str, req: &DebugRequest) -> RoutingResult<DebugReport> {
    if req.microservices.is_empty() {
        return Err(RoutingError::Validation("no microservices to evaluate".to_string()));
    }
    if req.microservices.iter().any(|m| m.name.trim().is_empty()) {
        return Err(RoutingError::Validation("microservice name must not be empty".to_string()));
    }

    let db_types: BTreeSet<&str> = if req.db_types.is_empty() {
        req.rules.iter().map(|r| r.db_type.as_str()).collect()
    } else {
        req.db_types.iter().map(String::as_str).collect()
    };
    if db_types.is_empty() {
        return Err(RoutingError::Validation(
            "no db types given and no rules to infer them from".to_string(),
        ));
    }

    let mut overlay = RuleOverlay::new(view, namespace).with_rules(req.rules.clone());
    for ms in &req.microservices {
        overlay = overlay.with_labels(&ms.name, ms.labels.clone());
    }

    let mut report = DebugReport::new();
    for ms in &req.microservices {
        let per_type = report.entry(ms.name.clone()).or_default();
        for db_type in db_types.iter().copied() {
            let resolution = resolve(
                &overlay,
                RouteRequest {
                    namespace,
                    microservice: &ms.name,
                    db_type,
                },
            )?;
            let decision = match resolution {
                Resolution::Resolved(d) => DebugDecision {
                    physical_database_id: Some(d.physical_database_id),
                    applied: Some(d.applied),
                    labels: d.labels,
                },
                Resolution::NoAdapter => DebugDecision {
                    physical_database_id: None,
                    applied: None,
                    labels: Labels::new(),
                },
            };
            per_type.insert(db_type.to_string(), decision);
        }
    }

    debug!(
        namespace = %namespace,
        microservices = req.microservices.len(),
        rules = req.rules.len(),
        "debug evaluation finished"
    );
    Ok(report)
}

/// Statically check an on-microservice rule set against known physical
/// databases. Returns every problem found; empty means valid.
pub fn validate_microservice_rules<V: RoutingView>(
    view: &V,
    rules: &[OnMicroserviceRule],
) -> RoutingResult<Vec<String>> {
    let mut problems = Vec::new();
    if rules.is_empty() {
        problems.push("rule set is empty".to_string());
    }

    let mut orders = BTreeSet::new();
    for (i, rule) in rules.iter().enumerate() {
        if rule.db_type.trim().is_empty() {
            problems.push(format!("rule {i}: type must not be empty"));
            continue;
        }
        if !orders.insert((rule.db_type.as_str(), rule.order)) {
            problems.push(format!(
                "rule {i}: duplicate order {} for type {}",
                rule.order, rule.db_type
            ));
        }
        if rule.labels.is_empty() {
            problems.push(format!("rule {i}: at least one label is required"));
        }
        if rule.microservices.iter().any(|m| m.trim().is_empty()) {
            problems.push(format!("rule {i}: microservice names must not be empty"));
        }

        let candidates = view.physical_databases_of(&rule.db_type)?;
        match &rule.physical_database_id {
            Some(pinned) => {
                if !candidates.iter().any(|p| &p.id == pinned) {
                    problems.push(format!(
                        "rule {i}: physical database {pinned} of type {} is not registered",
                        rule.db_type
                    ));
                }
            }
            None => {
                for label in &rule.labels {
                    if !candidates.iter().any(|p| label.matches(&p.labels)) {
                        problems.push(format!(
                            "rule {i}: label {label} matches no physical database of type {}",
                            rule.db_type
                        ));
                    }
                }
            }
        }
    }
    Ok(problems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use dbaas_state::*;

    fn ms(name: &str, pairs: &[(&str, &str)]) -> DebugMicroservice {
        DebugMicroservice {
            name: name.to_string(),
            labels: labels(pairs),
        }
    }

    #[test]
    fn evaluate_reports_rule_and_target() {
        let store = StateStore::open_in_memory().unwrap();
        put_physical(&store, "pg-global", "postgresql", &[], true);
        put_physical(&store, "pg-core", "postgresql", &[("team", "core")], false);

        let req = DebugRequest {
            rules: vec![ms_rule(0, &[], "team=core", None)],
            microservices: vec![ms("svc-a", &[("team", "core")]), ms("svc-b", &[])],
            db_types: Vec::new(),
        };
        let report = evaluate(&store, "ns", &req).unwrap();

        let a = &report["svc-a"]["postgresql"];
        assert_eq!(a.physical_database_id.as_deref(), Some("pg-core"));
        assert_eq!(
            a.applied,
            Some(AppliedRule::OnMicroservice {
                order: 0,
                label: "team=core".to_string()
            })
        );
        assert_eq!(a.labels.get("team").map(String::as_str), Some("core"));

        let b = &report["svc-b"]["postgresql"];
        assert_eq!(b.physical_database_id.as_deref(), Some("pg-global"));
        assert_eq!(b.applied, Some(AppliedRule::Global));
    }

    #[test]
    fn evaluate_does_not_persist_anything() {
        let store = StateStore::open_in_memory().unwrap();
        put_physical(&store, "pg-core", "postgresql", &[("team", "core")], false);
        let req = DebugRequest {
            rules: vec![ms_rule(0, &[], "team=core", None)],
            microservices: vec![ms("svc-a", &[("team", "core")])],
            db_types: Vec::new(),
        };
        evaluate(&store, "ns", &req).unwrap();

        assert!(store.microservice_rule_set("ns", "postgresql").unwrap().is_none());
        assert!(store.microservice_labels("ns", "svc-a").unwrap().is_none());
    }

    #[test]
    fn evaluate_matches_production_resolution() {
        let store = StateStore::open_in_memory().unwrap();
        put_physical(&store, "pg-core", "postgresql", &[("team", "core")], false);
        put_physical(&store, "pg-global", "postgresql", &[], true);
        put_ms_rules(&store, "ns", vec![ms_rule(0, &["svc-a"], "team=core", None)]);
        put_labels(&store, "ns", "svc-a", &[("team", "core")]);

        let req = DebugRequest {
            rules: Vec::new(),
            microservices: vec![ms("svc-a", &[("team", "core")])],
            db_types: vec!["postgresql".to_string()],
        };
        let report = evaluate(&store, "ns", &req).unwrap();
        let production = resolve(
            &store,
            RouteRequest {
                namespace: "ns",
                microservice: "svc-a",
                db_type: "postgresql",
            },
        )
        .unwrap();
        assert_eq!(
            report["svc-a"]["postgresql"].physical_database_id.as_deref(),
            production.physical_database_id()
        );
    }

    #[test]
    fn evaluate_rejects_empty_request() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(matches!(
            evaluate(&store, "ns", &DebugRequest::default()),
            Err(RoutingError::Validation(_))
        ));
        let no_types = DebugRequest {
            microservices: vec![ms("svc-a", &[])],
            ..DebugRequest::default()
        };
        assert!(matches!(evaluate(&store, "ns", &no_types), Err(RoutingError::Validation(_))));
    }

    #[test]
    fn validate_accepts_resolvable_rules() {
        let store = StateStore::open_in_memory().unwrap();
        put_physical(&store, "pg-core", "postgresql", &[("team", "core")], false);
        let rules = vec![
            ms_rule(0, &[], "team=core", None),
            ms_rule(1, &["svc-a"], "team=edge", Some("pg-core")),
        ];
        assert!(validate_microservice_rules(&store, &rules).unwrap().is_empty());
    }

    #[test]
    fn validate_reports_every_problem() {
        let store = StateStore::open_in_memory().unwrap();
        put_physical(&store, "pg-core", "postgresql", &[("team", "core")], false);
        put_physical(&store, "mongo-1", "mongodb", &[], false);
        let mut no_labels = ms_rule(2, &[], "team=core", None);
        no_labels.labels.clear();
        let rules = vec![
            ms_rule(0, &[], "team=unknown", None),
            ms_rule(0, &[], "team=core", None),
            ms_rule(1, &[], "team=core", Some("mongo-1")),
            no_labels,
        ];

        let problems = validate_microservice_rules(&store, &rules).unwrap();
        assert_eq!(problems.len(), 4, "{problems:?}");
        assert!(problems[0].contains("team=unknown"));
        assert!(problems[1].contains("duplicate order"));
        assert!(problems[2].contains("mongo-1"));
        assert!(problems[3].contains("label"));
    }
}
