//! dbaas-routing — decides which physical database hosts a logical database.
//!
//! - [`rules::RuleStore`] — conflict-validated writes of on-namespace,
//!   permanent and on-microservice rules, plus microservice labels
//! - [`resolver::resolve`] — tiered precedence over a [`view::RoutingView`]
//! - [`debug`] — evaluate hypothetical rules and validate rule sets through
//!   the same resolver
//! - [`router::DatabaseRouter`] — Resolve/Create and lookup of logical
//!   databases, including blue-green redirect and legacy classifiers

pub mod debug;
pub mod error;
pub mod resolver;
pub mod router;
pub mod rules;
pub mod view;

#[cfg(test)]
mod test_support;

pub use debug::{DebugDecision, DebugMicroservice, DebugReport, DebugRequest, evaluate, validate_microservice_rules};
pub use error::{RoutingError, RoutingResult};
pub use resolver::{AppliedRule, Decision, Resolution, RouteRequest, resolve, resolve_classifier};
pub use router::{CreateRequest, DatabaseRouter, RouteOutcome};
pub use rules::{NamespaceRuleRequest, PermanentRule, RuleStore, RuleWrite};
pub use view::{RoutingView, RuleOverlay};
