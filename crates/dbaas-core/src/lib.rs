//! dbaas-core — shared vocabulary for the DBaaS control plane.
//!
//! - **`classifier`** — logical database identity: validation, normalization,
//!   legacy shape conversion
//! - **`labels`** — `key=value` selectors used by balancing rules
//! - **`config`** — `dbaasd.toml` parsing
//! - **`ids`** — id generation and wall-clock helpers

pub mod classifier;
pub mod config;
pub mod ids;
pub mod labels;

pub use classifier::{Classifier, ClassifierViolation, OrderedClassifier};
pub use config::DaemonConfig;
pub use ids::{epoch_secs, generate_id};
pub use labels::{InvalidLabel, LabelSelector, Labels};
