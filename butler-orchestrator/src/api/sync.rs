//! Sync & Mirror API Handlers
//!
//! Manual sync control and read access to the mirrored jobs and builds.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use butler_core::domain::build::Build;
use butler_core::domain::job::Job;
use butler_core::dto::sync::{SyncOutcome, SyncStatus};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::fleet::Fleet;

/// POST /api/sync
/// Run a sync pass now, or report that one is already running
pub async fn trigger_sync(State(fleet): State<Arc<Fleet>>) -> Json<SyncOutcome> {
    tracing::info!("Manual sync requested");
    Json(fleet.trigger_sync().await)
}

/// GET /api/sync/status
pub async fn sync_status(State(fleet): State<Arc<Fleet>>) -> Json<SyncStatus> {
    Json(fleet.sync_status())
}

/// GET /api/instances/{id}/jobs
pub async fn list_jobs(
    State(fleet): State<Arc<Fleet>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Job>>> {
    tracing::debug!("Listing jobs of instance: {}", id);

    let jobs = fleet.list_jobs(id).await?;
    Ok(Json(jobs))
}

/// GET /api/jobs/{id}/builds
pub async fn list_builds(
    State(fleet): State<Arc<Fleet>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Build>>> {
    tracing::debug!("Listing builds of job: {}", id);

    let builds = fleet.list_builds(id).await?;
    Ok(Json(builds))
}
