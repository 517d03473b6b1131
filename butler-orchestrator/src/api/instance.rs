//! Instance API Handlers
//!
//! HTTP endpoints for registering and administering remote masters.
//! Responses use `InstanceSummary`, which never carries credentials.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use butler_core::dto::instance::{
    ConnectionInfo, InstanceStats, InstanceSummary, RegisterInstance, TestConnection,
    UpdateInstance,
};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::fleet::Fleet;

/// GET /api/instances
pub async fn list_instances(
    State(fleet): State<Arc<Fleet>>,
) -> ApiResult<Json<Vec<InstanceSummary>>> {
    tracing::debug!("Listing all instances");

    let instances = fleet.list_instances().await?;
    Ok(Json(instances.into_iter().map(Into::into).collect()))
}

/// POST /api/instances
/// Register a new master; fails with 400 when it cannot be reached
pub async fn register_instance(
    State(fleet): State<Arc<Fleet>>,
    Json(req): Json<RegisterInstance>,
) -> ApiResult<(StatusCode, Json<InstanceSummary>)> {
    tracing::info!("Registering instance: {} ({})", req.name, req.url);

    let instance = fleet.register_instance(req).await?;
    Ok((StatusCode::CREATED, Json(instance.into())))
}

/// GET /api/instances/{id}
pub async fn get_instance(
    State(fleet): State<Arc<Fleet>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<InstanceSummary>> {
    tracing::debug!("Getting instance: {}", id);

    let instance = fleet.get_instance(id).await?;
    Ok(Json(instance.into()))
}

/// PATCH /api/instances/{id}
pub async fn update_instance(
    State(fleet): State<Arc<Fleet>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateInstance>,
) -> ApiResult<Json<InstanceSummary>> {
    tracing::info!("Updating instance: {}", id);

    let instance = fleet.update_instance(id, patch).await?;
    Ok(Json(instance.into()))
}

/// DELETE /api/instances/{id}
pub async fn delete_instance(
    State(fleet): State<Arc<Fleet>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting instance: {}", id);

    fleet.remove_instance(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/instances/{id}/stats
pub async fn instance_stats(
    State(fleet): State<Arc<Fleet>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<InstanceStats>> {
    tracing::debug!("Getting stats of instance: {}", id);

    let stats = fleet.instance_stats(id).await?;
    Ok(Json(stats))
}

/// POST /api/instances/{id}/load/increment
pub async fn increment_load(
    State(fleet): State<Arc<Fleet>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<InstanceSummary>> {
    let instance = fleet.increment_load(id).await?;
    Ok(Json(instance.into()))
}

/// POST /api/instances/{id}/load/decrement
pub async fn decrement_load(
    State(fleet): State<Arc<Fleet>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<InstanceSummary>> {
    let instance = fleet.decrement_load(id).await?;
    Ok(Json(instance.into()))
}

/// POST /api/instances/test
/// Probe a master's credentials without registering it
pub async fn test_connection(
    State(fleet): State<Arc<Fleet>>,
    Json(req): Json<TestConnection>,
) -> ApiResult<Json<ConnectionInfo>> {
    tracing::info!("Testing connection to {}", req.url);

    let info = fleet.test_connection(req).await?;
    Ok(Json(info))
}
