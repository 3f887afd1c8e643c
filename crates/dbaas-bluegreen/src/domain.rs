//! Blue-green domain maintenance.

use std::collections::BTreeSet;

use tracing::info;

use dbaas_core::epoch_secs;
use dbaas_state::*;

use crate::error::{BlueGreenError, BlueGreenResult};

/// Validated writes of blue-green domain records.
#[derive(Clone)]
pub struct BlueGreenDomains {
    store: StateStore,
}

impl BlueGreenDomains {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Create or replace the domain controlled by `controller`.
    ///
    /// Rejects more than one active member, duplicate members, a member
    /// equal to the controller, and members that are controllers themselves.
    pub fn put_domain(
        &self,
        controller: &str,
        members: Vec<BlueGreenMember>,
    ) -> BlueGreenResult<BlueGreenDomain> {
        validate_members(controller, &members)?;
        let domain = BlueGreenDomain {
            controller_namespace: controller.to_string(),
            members,
            updated_at: epoch_secs(),
        };

        self.store.write(|tx| {
            for member in &domain.members {
                if tx.blue_green_domain(&member.namespace)?.is_some() {
                    return Err(BlueGreenError::InvalidDomain(format!(
                        "member {} is itself a controller namespace",
                        member.namespace
                    )));
                }
            }
            for other in tx.blue_green_domains()? {
                if other.controller_namespace == controller {
                    continue;
                }
                if other.members.iter().any(|m| m.namespace == controller) {
                    return Err(BlueGreenError::InvalidDomain(format!(
                        "{controller} is already a member of domain {}",
                        other.controller_namespace
                    )));
                }
            }
            tx.put_blue_green_domain(&domain)?;
            Ok(())
        })?;

        info!(
            controller = %controller,
            active = ?domain.active_member().map(|m| &m.namespace),
            members = domain.members.len(),
            "blue-green domain stored"
        );
        Ok(domain)
    }

    pub fn get_domain(&self, controller: &str) -> BlueGreenResult<BlueGreenDomain> {
        self.store
            .blue_green_domain(controller)?
            .ok_or_else(|| BlueGreenError::DomainNotFound(controller.to_string()))
    }

    pub fn list_domains(&self) -> BlueGreenResult<Vec<BlueGreenDomain>> {
        Ok(self.store.blue_green_domains()?)
    }

    pub fn delete_domain(&self, controller: &str) -> BlueGreenResult<()> {
        let existed = self.store.write(|tx| tx.delete_blue_green_domain(controller))?;
        if !existed {
            return Err(BlueGreenError::DomainNotFound(controller.to_string()));
        }
        info!(controller = %controller, "blue-green domain deleted");
        Ok(())
    }
}

fn validate_members(controller: &str, members: &[BlueGreenMember]) -> BlueGreenResult<()> {
    if members.is_empty() {
        return Err(BlueGreenError::InvalidDomain("domain has no members".to_string()));
    }
    let active = members
        .iter()
        .filter(|m| m.state == NamespaceState::Active)
        .count();
    if active > 1 {
        return Err(BlueGreenError::InvalidDomain(format!(
            "{active} active members, at most one allowed"
        )));
    }
    let mut seen = BTreeSet::new();
    for member in members {
        if member.namespace.trim().is_empty() {
            return Err(BlueGreenError::InvalidDomain("empty member namespace".to_string()));
        }
        if member.namespace == controller {
            return Err(BlueGreenError::InvalidDomain(
                "controller cannot be its own member".to_string(),
            ));
        }
        if !seen.insert(member.namespace.as_str()) {
            return Err(BlueGreenError::InvalidDomain(format!(
                "duplicate member {}",
                member.namespace
            )));
        }
    }
    Ok(())
}
