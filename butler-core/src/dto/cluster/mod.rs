//! Cluster DTOs
//!
//! Load-balancing strategies and the per-cluster reporting view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::instance::{HealthStatus, Instance};

/// Policy used to pick an instance for new work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Lowest current load, priority as tie-break
    #[default]
    LeastLoad,

    /// Rotate through the healthy pool
    RoundRobin,

    /// Random draw weighted by priority
    Weighted,

    /// The cluster's primary, or its best backup
    PrimaryBackup,
}

/// One member of a cluster as shown in reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMember {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub is_primary: bool,
    pub priority: i32,
    pub current_load: i32,
    pub max_connections: i32,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl From<&Instance> for ClusterMember {
    fn from(instance: &Instance) -> Self {
        ClusterMember {
            id: instance.id,
            name: instance.name.clone(),
            url: instance.url.clone(),
            is_primary: instance.is_primary,
            priority: instance.priority,
            current_load: instance.current_load,
            max_connections: instance.max_connections,
            health_status: instance.health_status,
            last_health_check: instance.last_health_check,
        }
    }
}

/// Aggregate view of a cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: String,
    pub instances: Vec<ClusterMember>,
    pub total_instances: usize,
    pub healthy_instances: usize,
    pub total_load: i64,
    pub total_capacity: i64,
}

impl ClusterSummary {
    pub fn new(cluster_id: String, instances: &[Instance]) -> Self {
        ClusterSummary {
            cluster_id,
            instances: instances.iter().map(ClusterMember::from).collect(),
            total_instances: instances.len(),
            healthy_instances: instances.iter().filter(|i| i.is_healthy()).count(),
            total_load: instances.iter().map(|i| i64::from(i.current_load)).sum(),
            total_capacity: instances.iter().map(|i| i64::from(i.max_connections)).sum(),
        }
    }
}

/// Outcome of probing one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub instance_id: Uuid,
    pub name: String,
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instance::tests::sample_instance;

    #[test]
    fn test_cluster_summary_aggregates() {
        let mut a = sample_instance();
        a.current_load = 4;
        a.health_status = HealthStatus::Healthy;
        let mut b = sample_instance();
        b.current_load = 2;
        b.max_connections = 50;
        b.health_status = HealthStatus::Degraded;

        let summary = ClusterSummary::new("default".to_string(), &[a, b]);
        assert_eq!(summary.total_instances, 2);
        assert_eq!(summary.healthy_instances, 1);
        assert_eq!(summary.total_load, 6);
        assert_eq!(summary.total_capacity, 150);
    }

    #[test]
    fn test_strategy_serde() {
        let strategy: SelectionStrategy = serde_json::from_str("\"round_robin\"").unwrap();
        assert_eq!(strategy, SelectionStrategy::RoundRobin);
        assert_eq!(SelectionStrategy::default(), SelectionStrategy::LeastLoad);
    }
}
