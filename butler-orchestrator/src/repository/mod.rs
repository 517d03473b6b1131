//! Repository Module
//!
//! Data access layer for the local mirror.
//! The [`Mirror`] trait is the only way services touch persistence; `PgMirror`
//! is the production implementation and `MemoryMirror` backs tests and
//! embedded use.

pub mod build;
pub mod instance;
pub mod job;
pub mod memory;

// Re-export for convenience
pub use build as build_repository;
pub use instance as instance_repository;
pub use job as job_repository;
pub use memory::MemoryMirror;

use async_trait::async_trait;
use butler_core::domain::build::Build;
use butler_core::domain::instance::{HealthStatus, Instance};
use butler_core::domain::job::Job;
use butler_core::dto::job::{BuildUpsert, JobUpsert};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the mirror
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A unique key (instance name, primary per cluster) was violated
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable store for instances, jobs and builds
///
/// Instance rows are mutated only through field-scoped operations so the sync
/// engine, the balancer and administrative flows never overwrite each other's
/// fields. Job and build writes are keyed upserts and therefore idempotent.
#[async_trait]
pub trait Mirror: Send + Sync {
    // -------------------------------------------------------------------------
    // Instances
    // -------------------------------------------------------------------------

    async fn list_instances(&self) -> StoreResult<Vec<Instance>>;

    async fn list_active_instances(&self) -> StoreResult<Vec<Instance>>;

    /// Active and healthy instances, optionally restricted to one cluster,
    /// ordered by load ascending then priority descending
    async fn list_healthy_instances(&self, cluster: Option<&str>) -> StoreResult<Vec<Instance>>;

    async fn find_instance(&self, id: Uuid) -> StoreResult<Option<Instance>>;

    /// Insert a new instance, demoting any other primary of its cluster when it is primary
    async fn create_instance(&self, instance: &Instance) -> StoreResult<()>;

    /// Write the administrative fields of an instance, with the same demotion rule
    async fn update_instance(&self, instance: &Instance) -> StoreResult<()>;

    async fn delete_instance(&self, id: Uuid) -> StoreResult<bool>;

    /// Atomically add `delta` to the current load and return the updated row
    async fn adjust_load(&self, id: Uuid, delta: i32) -> StoreResult<Option<Instance>>;

    /// Set the health status, stamping `last_health_check` when `checked_at` is given
    async fn update_health(
        &self,
        id: Uuid,
        status: HealthStatus,
        checked_at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool>;

    async fn touch_last_sync(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    // -------------------------------------------------------------------------
    // Jobs & Builds
    // -------------------------------------------------------------------------

    /// Insert or update the job keyed on `(instance_id, name)`
    async fn upsert_job(&self, instance_id: Uuid, job: &JobUpsert) -> StoreResult<Job>;

    async fn list_jobs(&self, instance_id: Uuid) -> StoreResult<Vec<Job>>;

    /// Insert or update the build keyed on `(job_id, build_number)`
    async fn upsert_build(&self, job_id: Uuid, build: &BuildUpsert) -> StoreResult<Build>;

    /// Builds of a job, newest first
    async fn list_builds(&self, job_id: Uuid) -> StoreResult<Vec<Build>>;
}

/// Postgres-backed mirror
#[derive(Debug, Clone)]
pub struct PgMirror {
    pool: PgPool,
}

impl PgMirror {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Mirror for PgMirror {
    async fn list_instances(&self) -> StoreResult<Vec<Instance>> {
        Ok(instance_repository::list_all(&self.pool).await?)
    }

    async fn list_active_instances(&self) -> StoreResult<Vec<Instance>> {
        Ok(instance_repository::list_active(&self.pool).await?)
    }

    async fn list_healthy_instances(&self, cluster: Option<&str>) -> StoreResult<Vec<Instance>> {
        Ok(instance_repository::list_healthy(&self.pool, cluster).await?)
    }

    async fn find_instance(&self, id: Uuid) -> StoreResult<Option<Instance>> {
        Ok(instance_repository::find_by_id(&self.pool, id).await?)
    }

    async fn create_instance(&self, instance: &Instance) -> StoreResult<()> {
        Ok(instance_repository::create(&self.pool, instance).await?)
    }

    async fn update_instance(&self, instance: &Instance) -> StoreResult<()> {
        let updated = instance_repository::update(&self.pool, instance).await?;
        if !updated {
            return Err(StoreError::NotFound {
                entity: "Instance",
                id: instance.id,
            });
        }
        Ok(())
    }

    async fn delete_instance(&self, id: Uuid) -> StoreResult<bool> {
        Ok(instance_repository::delete(&self.pool, id).await?)
    }

    async fn adjust_load(&self, id: Uuid, delta: i32) -> StoreResult<Option<Instance>> {
        Ok(instance_repository::adjust_load(&self.pool, id, delta).await?)
    }

    async fn update_health(
        &self,
        id: Uuid,
        status: HealthStatus,
        checked_at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        Ok(instance_repository::update_health(&self.pool, id, status, checked_at).await?)
    }

    async fn touch_last_sync(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        Ok(instance_repository::touch_last_sync(&self.pool, id, at).await?)
    }

    async fn upsert_job(&self, instance_id: Uuid, job: &JobUpsert) -> StoreResult<Job> {
        Ok(job_repository::upsert(&self.pool, instance_id, job).await?)
    }

    async fn list_jobs(&self, instance_id: Uuid) -> StoreResult<Vec<Job>> {
        Ok(job_repository::list_by_instance(&self.pool, instance_id).await?)
    }

    async fn upsert_build(&self, job_id: Uuid, build: &BuildUpsert) -> StoreResult<Build> {
        Ok(build_repository::upsert(&self.pool, job_id, build).await?)
    }

    async fn list_builds(&self, job_id: Uuid) -> StoreResult<Vec<Build>> {
        Ok(build_repository::list_by_job(&self.pool, job_id).await?)
    }
}
