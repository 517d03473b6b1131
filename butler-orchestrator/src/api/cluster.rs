//! Cluster API Handlers
//!
//! Instance selection, cluster reports and failover.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use butler_core::dto::cluster::{ClusterSummary, SelectionStrategy};
use butler_core::dto::instance::InstanceSummary;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::fleet::Fleet;

#[derive(Debug, Deserialize)]
pub struct SelectQuery {
    #[serde(default)]
    pub strategy: SelectionStrategy,
    pub cluster: Option<String>,
}

/// GET /api/select?strategy=&cluster=
/// Pick an instance for new work; `null` when no healthy instance is available
pub async fn select_instance(
    State(fleet): State<Arc<Fleet>>,
    Query(query): Query<SelectQuery>,
) -> ApiResult<Json<Option<InstanceSummary>>> {
    tracing::debug!(
        "Selecting instance with {:?} in cluster {:?}",
        query.strategy,
        query.cluster
    );

    let instance = fleet
        .select_instance(query.strategy, query.cluster.as_deref())
        .await?;
    Ok(Json(instance.map(Into::into)))
}

/// GET /api/clusters
pub async fn list_clusters(
    State(fleet): State<Arc<Fleet>>,
) -> ApiResult<Json<Vec<ClusterSummary>>> {
    let clusters = fleet.list_clusters().await?;
    Ok(Json(clusters))
}

/// POST /api/clusters/{cluster}/failover/{id}
/// Mark an instance unhealthy and return the backup to route to
pub async fn failover(
    State(fleet): State<Arc<Fleet>>,
    Path((cluster, id)): Path<(String, Uuid)>,
) -> ApiResult<Json<Option<InstanceSummary>>> {
    tracing::warn!("Failover requested for {} in cluster {}", id, cluster);

    let backup = fleet.failover(&cluster, id).await?;
    Ok(Json(backup.map(Into::into)))
}
