//! dbaas-registry — physical databases and the adapter-facing protocol.
//!
//! # Architecture
//!
//! ```text
//! adapter ──register──▶ CapabilityNegotiator
//!                         ├── AdapterClient::probe (verification call)
//!                         ├── PhysicalDatabase entry (created / updated)
//!                         └── InstructionEngine (roles changed, databases bound)
//!                               └── portions ◀──ack── adapter
//! ```
//!
//! The adapter drives the protocol: it registers, receives an outcome, and
//! while a migration is pending keeps acknowledging portions until the
//! engine reports completion. Nothing here polls in the background.

pub mod adapter;
pub mod error;
pub mod instruction;
pub mod negotiator;
pub mod registry;

#[cfg(test)]
mod test_support;

pub use adapter::{AdapterClient, AdapterError, HttpAdapterClient};
pub use error::{RegistryError, RegistryResult};
pub use instruction::{AckFailure, AckRequest, AckSuccess, InstructionEngine, MigrationStep};
pub use negotiator::{CapabilityNegotiator, RegistrationOutcome, RegistrationRequest};
pub use registry::PhysicalDatabaseRegistry;
