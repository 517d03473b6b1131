//! Instance DTOs
//!
//! Data transfer objects for instance registration, administration and reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::instance::{HealthStatus, Instance};

fn default_max_connections() -> i32 {
    100
}

/// Request to register a new remote master
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterInstance {
    pub name: String,
    pub url: String,
    pub username: String,
    pub api_token: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub is_primary: bool,

    #[serde(default)]
    pub cluster_id: Option<String>,

    #[serde(default)]
    pub load_balancer_url: Option<String>,

    #[serde(default)]
    pub health_check_url: Option<String>,

    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_max_connections")]
    pub max_connections: i32,
}

/// Partial update of an instance's administrative fields
///
/// Only fields that are `Some` are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateInstance {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub load_balancer_url: Option<String>,
    #[serde(default)]
    pub health_check_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_primary: Option<bool>,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub max_connections: Option<i32>,
}

impl UpdateInstance {
    /// Whether applying this update changes how a client connects to the master
    pub fn changes_connection(&self) -> bool {
        self.url.is_some()
            || self.load_balancer_url.is_some()
            || self.username.is_some()
            || self.api_token.is_some()
    }
}

/// Request to probe a master without registering it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConnection {
    pub url: String,
    pub username: String,
    pub api_token: String,
}

/// Result of a successful connection probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub version: String,
    pub message: String,
}

/// Instance view without credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub url: String,
    pub load_balancer_url: Option<String>,
    pub is_active: bool,
    pub is_primary: bool,
    pub cluster_id: Option<String>,
    pub priority: i32,
    pub current_load: i32,
    pub max_connections: i32,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl From<Instance> for InstanceSummary {
    fn from(instance: Instance) -> Self {
        InstanceSummary {
            id: instance.id,
            name: instance.name,
            description: instance.description,
            url: instance.url,
            load_balancer_url: instance.load_balancer_url,
            is_active: instance.is_active,
            is_primary: instance.is_primary,
            cluster_id: instance.cluster_id,
            priority: instance.priority,
            current_load: instance.current_load,
            max_connections: instance.max_connections,
            health_status: instance.health_status,
            last_health_check: instance.last_health_check,
            last_sync_at: instance.last_sync_at,
        }
    }
}

/// Utilization and inventory figures for one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStats {
    pub instance_id: Uuid,
    pub name: String,
    pub current_load: i32,
    pub max_connections: i32,
    pub utilization_percent: f64,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub total_jobs: usize,
    /// Jobs whose last build is still running
    pub active_jobs: usize,
    pub total_executors: usize,
    pub idle_executors: usize,
    pub busy_executors: usize,
    pub executor_utilization: f64,
}
