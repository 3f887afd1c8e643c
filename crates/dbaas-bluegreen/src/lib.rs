//! Blue-green topology for the DBaaS control plane.
//!
//! A blue-green domain groups a controller namespace with the member
//! namespaces it switches between; exactly one member is `active`.
//! Lookups addressed to a controller namespace that has no local binding
//! are served from the active member instead.
//!
//! - **`resolver`** — active namespace resolution and classifier redirect
//! - **`domain`** — validated maintenance of domain records

pub mod domain;
pub mod error;
pub mod resolver;

pub use domain::BlueGreenDomains;
pub use error::{BlueGreenError, BlueGreenResult};
pub use resolver::{Redirection, redirect_if_controller, resolve_active_namespace};
