//! Instance domain model
//!
//! Represents a registered remote CI master that the fleet manages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cluster name used for instances that do not declare one
pub const DEFAULT_CLUSTER: &str = "default";

/// A registered remote CI master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique identifier for the instance
    pub id: Uuid,

    /// Display name, unique across the fleet
    pub name: String,

    pub description: Option<String>,

    /// Direct base URL of the master
    pub url: String,

    /// Load-balancer-fronted URL; preferred over `url` for API calls when set
    pub load_balancer_url: Option<String>,

    /// Explicit health endpoint; defaults to `{url}/api/json`
    pub health_check_url: Option<String>,

    pub username: String,
    pub api_token: String,

    pub is_active: bool,

    /// At most one instance per cluster carries this flag
    pub is_primary: bool,

    /// Instances sharing a cluster serve the same workload
    pub cluster_id: Option<String>,

    /// Tie-break and weight for load balancing (>= 0)
    pub priority: i32,

    /// Units of work currently dispatched to this instance
    pub current_load: i32,

    /// Maximum concurrent capacity
    pub max_connections: i32,

    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,

    /// Last time a sync pass completed for this instance
    pub last_sync_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// Base URL used for API calls
    pub fn effective_base_url(&self) -> &str {
        self.load_balancer_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(&self.url)
    }

    /// Cluster this instance belongs to, falling back to the default cluster
    pub fn cluster(&self) -> &str {
        self.cluster_id.as_deref().unwrap_or(DEFAULT_CLUSTER)
    }

    /// URL probed by health checks
    pub fn health_url(&self) -> String {
        match self.health_check_url.as_deref() {
            Some(url) if !url.trim().is_empty() => url.to_string(),
            _ => format!("{}/api/json", self.url.trim_end_matches('/')),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health_status == HealthStatus::Healthy
    }

    /// Current load as a percentage of capacity
    pub fn utilization_percent(&self) -> f64 {
        if self.max_connections <= 0 {
            return 0.0;
        }
        f64::from(self.current_load) / f64::from(self.max_connections) * 100.0
    }
}

/// Health classification derived from probing
///
/// Distinct from the remote system's own job and build status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Probe returned a successful response
    Healthy,

    /// Master was reachable but answered with an error status
    Degraded,

    /// Probe failed or timed out
    Unhealthy,

    /// Never probed
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }

    /// Parse a stored status string; unrecognized values read as `Unknown`
    pub fn parse(s: &str) -> Self {
        match s {
            "healthy" => HealthStatus::Healthy,
            "degraded" => HealthStatus::Degraded,
            "unhealthy" => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
