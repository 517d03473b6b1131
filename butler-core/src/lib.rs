//! Butler Core
//!
//! Core types and abstractions for the Butler CI fleet manager.
//!
//! This crate contains:
//! - Domain types: Mirror entities (Instance, Job, Build) and their status enums
//! - DTOs: Data transfer objects exchanged between the orchestrator and its callers
//! - Remote payloads: Typed shapes of the remote CI master's JSON API

pub mod domain;
pub mod dto;
pub mod remote;
