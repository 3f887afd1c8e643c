//! dbaas-state — embedded state store for the DBaaS control plane.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for physical databases, logical databases, balancing rules,
//! blue-green domains and role-migration instructions.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{namespace}/{name}`, `{db_type}/{classifier}`) enable
//! prefix scans for related records.
//!
//! Reads take a consistent snapshot; writes run inside a closure that
//! commits or aborts as a unit (see [`StateStore::write`]). The
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{Snapshot, StateRead, StateStore, Txn};
pub use types::*;
