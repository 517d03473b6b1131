//! Data Transfer Objects
//!
//! This module contains DTOs exchanged between the orchestrator's components and
//! its callers: registration and update requests, reconciliation payloads written
//! into the mirror, and reporting views that never expose credentials.

pub mod cluster;
pub mod instance;
pub mod job;
pub mod sync;
