//! Sync DTOs

use serde::{Deserialize, Serialize};

/// Snapshot of the sync engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Whether the periodic timer is armed
    pub running: bool,

    /// Whether a pass is currently in flight
    pub is_syncing: bool,

    pub interval_ms: u64,
}

/// Outcome of one full sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub instances_synced: usize,
    pub instances_failed: usize,
    pub jobs_synced: usize,
    pub jobs_failed: usize,
    pub builds_synced: usize,
    pub duration_ms: u64,
}

/// Result of asking for a sync pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncReport),

    /// Another pass was already in flight
    Skipped,
}
