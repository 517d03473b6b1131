use std::sync::Arc;

use anyhow::Context;
use butler_client::ClientFactory;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;

#[cfg(test)]
mod testing;

use crate::cache::MemoryCache;
use crate::config::Config;
use crate::repository::PgMirror;
use crate::service::Fleet;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "butler_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Butler Orchestrator...");

    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let cache = Arc::new(MemoryCache::new());
    let fleet = Arc::new(Fleet::new(
        Arc::new(PgMirror::new(pool)),
        cache.clone(),
        Arc::new(ClientFactory::with_probe_timeout(config.probe_timeout)),
        &config,
    ));

    fleet.sync_engine().start();

    if config.health_checks_enabled() {
        spawn_health_loop(Arc::clone(&fleet), cache, config.health_check_interval);
    } else {
        tracing::info!("Periodic health checks disabled");
    }

    // Build router with all API endpoints
    let app = api::create_router(Arc::clone(&fleet));

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    fleet.sync_engine().stop().await;
    tracing::info!("Orchestrator stopped");
    Ok(())
}

/// Probe the fleet on a fixed interval and drop expired snapshots
fn spawn_health_loop(fleet: Arc<Fleet>, cache: Arc<MemoryCache>, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            match fleet.perform_health_checks().await {
                Ok(results) => {
                    tracing::debug!("Health checks finished: {} instances", results.len())
                }
                Err(e) => tracing::error!("Health check round failed: {}", e),
            }

            let purged = cache.purge_expired();
            if purged > 0 {
                tracing::debug!("Purged {} expired cache entries", purged);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
