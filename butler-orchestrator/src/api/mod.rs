//! API Module
//!
//! Admin HTTP API of the orchestrator.
//! Each submodule handles endpoints for a specific area.

pub mod cluster;
pub mod error;
pub mod health;
pub mod instance;
pub mod sync;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::service::fleet::Fleet;

/// Create the main API router with all endpoints
pub fn create_router(fleet: Arc<Fleet>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/api/health-checks", post(health::run_health_checks))
        // Instance endpoints
        .route(
            "/api/instances",
            get(instance::list_instances).post(instance::register_instance),
        )
        .route("/api/instances/test", post(instance::test_connection))
        .route(
            "/api/instances/{id}",
            get(instance::get_instance)
                .patch(instance::update_instance)
                .delete(instance::delete_instance),
        )
        .route("/api/instances/{id}/stats", get(instance::instance_stats))
        .route(
            "/api/instances/{id}/load/increment",
            post(instance::increment_load),
        )
        .route(
            "/api/instances/{id}/load/decrement",
            post(instance::decrement_load),
        )
        // Routing endpoints
        .route("/api/select", get(cluster::select_instance))
        .route("/api/clusters", get(cluster::list_clusters))
        .route(
            "/api/clusters/{cluster}/failover/{id}",
            post(cluster::failover),
        )
        // Mirror and sync endpoints
        .route("/api/instances/{id}/jobs", get(sync::list_jobs))
        .route("/api/jobs/{id}/builds", get(sync::list_builds))
        .route("/api/sync", post(sync::trigger_sync))
        .route("/api/sync/status", get(sync::sync_status))
        // Add state and middleware
        .with_state(fleet)
        .layer(TraceLayer::new_for_http())
}
