//! Service Module
//!
//! Business logic layer for the orchestrator.
//! The sync engine and load balancer work over the mirror; the fleet facade
//! ties them together for the API.

pub mod balancer;
pub mod fleet;
pub mod sync;

// Re-export for convenience
pub use balancer::LoadBalancer;
pub use fleet::{Fleet, FleetError};
pub use sync::SyncEngine;
