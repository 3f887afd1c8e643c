//! Active namespace resolution and classifier redirect.
//!
//! Both functions take any [`StateRead`] so callers decide the read
//! boundary: a snapshot for lookups, the open write transaction when the
//! redirect feeds a create.

use tracing::debug;

use dbaas_core::Classifier;
use dbaas_state::StateRead;

use crate::error::{BlueGreenError, BlueGreenResult};

/// Result of [`redirect_if_controller`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    /// Classifier to look up / create under.
    pub classifier: Classifier,
    /// Namespace the classifier now addresses.
    pub namespace: String,
    pub redirected: bool,
}

/// Currently active member namespace of the domain controlled by `controller`.
pub fn resolve_active_namespace<V: StateRead>(view: &V, controller: &str) -> BlueGreenResult<String> {
    let domain = view
        .blue_green_domain(controller)?
        .ok_or_else(|| BlueGreenError::DomainNotFound(controller.to_string()))?;
    domain
        .active_member()
        .map(|m| m.namespace.clone())
        .ok_or_else(|| BlueGreenError::ActiveNamespaceNotFound(controller.to_string()))
}

/// Redirect a classifier addressed to a controller namespace.
///
/// Namespaces that are not controllers, and controllers that already hold
/// a binding for `classifier` + `db_type`, are returned unchanged. Otherwise
/// the classifier is re-addressed to the domain's active member. A database
/// found there that carries a blue-green version belongs to switchover
/// tooling and is refused.
pub fn redirect_if_controller<V: StateRead>(
    view: &V,
    classifier: &Classifier,
    db_type: &str,
    requested_namespace: &str,
) -> BlueGreenResult<Redirection> {
    let local = classifier.with_namespace(requested_namespace);
    let unchanged = || Redirection {
        classifier: local.clone(),
        namespace: requested_namespace.to_string(),
        redirected: false,
    };

    if view.blue_green_domain(requested_namespace)?.is_none() {
        return Ok(unchanged());
    }
    if view.find_logical_database(db_type, &local)?.is_some() {
        debug!(namespace = %requested_namespace, "controller namespace has a local binding");
        return Ok(unchanged());
    }

    let active = resolve_active_namespace(view, requested_namespace)?;
    let effective = classifier.with_namespace(&active);
    if let Some(existing) = view.find_logical_database(db_type, &effective)? {
        if let Some(version) = existing.bg_version {
            return Err(BlueGreenError::VersionedDatabase {
                id: existing.id,
                version,
            });
        }
    }

    debug!(
        controller = %requested_namespace,
        active = %active,
        "redirected classifier to active namespace"
    );
    Ok(Redirection {
        classifier: effective,
        namespace: active,
        redirected: true,
    })
}
