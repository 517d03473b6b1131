//! Core domain types
//!
//! This module contains the entities of the local mirror. Instances are owned by
//! administrative flows and the load balancer; jobs and builds are written only by
//! the sync engine.

pub mod build;
pub mod instance;
pub mod job;
