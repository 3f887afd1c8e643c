//! Rule resolver — picks the physical database a new logical database
//! should be created on.
//!
//! Tiers, highest precedence first; the first tier producing an existing
//! physical database wins:
//!
//! 1. on-microservice rules, ascending `order`, any-label match
//! 2. permanent per-namespace rule
//! 3. transient on-namespace rules, ascending `order`
//! 4. the global physical database of the type
//!
//! A rule whose target no longer exists is skipped; the resolver never
//! invents a target.

use serde::Serialize;
use tracing::{debug, warn};

use dbaas_core::{Classifier, Labels};
use dbaas_state::{PhysicalDatabase, StateResult};

use crate::view::RoutingView;

/// Which rule produced a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum AppliedRule {
    OnMicroservice { order: u32, label: String },
    Permanent { namespace: String },
    Namespace { name: String, order: u32 },
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub physical_database_id: String,
    pub applied: AppliedRule,
    /// Labels of the chosen physical database.
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Decision),
    /// No rule and no global physical database for the type.
    NoAdapter,
}

impl Resolution {
    pub fn physical_database_id(&self) -> Option<&str> {
        match self {
            Resolution::Resolved(d) => Some(&d.physical_database_id),
            Resolution::NoAdapter => None,
        }
    }
}

/// Who is asking, and for what.
#[derive(Debug, Clone, Copy)]
pub struct RouteRequest<'a> {
    pub namespace: &'a str,
    pub microservice: &'a str,
    pub db_type: &'a str,
}

/// Resolve for a classifier, addressed to `namespace`.
pub fn resolve_classifier<V: RoutingView>(
    view: &V,
    classifier: &Classifier,
    db_type: &str,
    namespace: &str,
) -> StateResult<Resolution> {
    let microservice = classifier.microservice_name.as_deref().unwrap_or_default();
    resolve(
        view,
        RouteRequest {
            namespace,
            microservice,
            db_type,
        },
    )
}

/// Resolve the target physical database for `req`.
pub fn resolve<V: RoutingView>(view: &V, req: RouteRequest<'_>) -> StateResult<Resolution> {
    let candidates = view.physical_databases_of(req.db_type)?;

    if let Some(decision) = on_microservice_tier(view, req, &candidates)? {
        return Ok(Resolution::Resolved(decision));
    }

    if let Some(entry) = view.permanent_target(req.namespace, req.db_type)? {
        match find(&candidates, &entry.physical_database_id) {
            Some(db) => {
                return Ok(decided(
                    db,
                    AppliedRule::Permanent {
                        namespace: entry.namespace,
                    },
                ));
            }
            None => warn!(
                namespace = %req.namespace,
                physical_database_id = %entry.physical_database_id,
                "permanent rule targets an unregistered physical database"
            ),
        }
    }

    let mut rules = view.namespace_rules_for(req.namespace, req.db_type)?;
    rules.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
    for rule in rules {
        if let Some(db) = find(&candidates, &rule.physical_database_id) {
            return Ok(decided(
                db,
                AppliedRule::Namespace {
                    name: rule.name,
                    order: rule.order,
                },
            ));
        }
    }

    if let Some(db) = candidates.iter().find(|p| p.global) {
        return Ok(decided(db, AppliedRule::Global));
    }

    debug!(namespace = %req.namespace, db_type = %req.db_type, "no physical database resolved");
    Ok(Resolution::NoAdapter)
}

fn on_microservice_tier<V: RoutingView>(
    view: &V,
    req: RouteRequest<'_>,
    candidates: &[PhysicalDatabase],
) -> StateResult<Option<Decision>> {
    let mut rules = view.on_microservice_rules(req.namespace, req.db_type)?;
    rules.retain(|r| r.db_type == req.db_type && r.applies_to(req.microservice));
    if rules.is_empty() {
        return Ok(None);
    }
    rules.sort_by_key(|r| r.order);
    let labels = view.labels_of(req.namespace, req.microservice)?;

    for rule in &rules {
        let Some(label) = rule.matched_label(&labels) else {
            continue;
        };
        let target = match &rule.physical_database_id {
            Some(pinned) => find(candidates, pinned),
            None => candidates.iter().find(|p| label.matches(&p.labels)),
        };
        match target {
            Some(db) => {
                return Ok(Some(Decision {
                    physical_database_id: db.id.clone(),
                    applied: AppliedRule::OnMicroservice {
                        order: rule.order,
                        label: label.to_string(),
                    },
                    labels: db.labels.clone(),
                }));
            }
            None => warn!(
                microservice = %req.microservice,
                %label,
                "on-microservice rule matched but no physical database is available"
            ),
        }
    }
    Ok(None)
}

fn find<'a>(candidates: &'a [PhysicalDatabase], id: &str) -> Option<&'a PhysicalDatabase> {
    candidates.iter().find(|p| p.id == id)
}

fn decided(db: &PhysicalDatabase, applied: AppliedRule) -> Resolution {
    Resolution::Resolved(Decision {
        physical_database_id: db.id.clone(),
        applied,
        labels: db.labels.clone(),
    })
}
