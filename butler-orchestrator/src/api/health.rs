//! Health Check API Handler
//!
//! Liveness of the orchestrator itself, plus on-demand probing of the fleet.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use butler_core::dto::cluster::HealthCheckResult;

use crate::api::error::ApiResult;
use crate::service::fleet::Fleet;

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// POST /api/health-checks
/// Probe every active instance and record the results
pub async fn run_health_checks(
    State(fleet): State<Arc<Fleet>>,
) -> ApiResult<Json<Vec<HealthCheckResult>>> {
    tracing::info!("Running health checks on demand");

    let results = fleet.perform_health_checks().await?;
    Ok(Json(results))
}
