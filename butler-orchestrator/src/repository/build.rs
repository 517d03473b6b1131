//! Build Repository
//!
//! Handles all database operations related to mirrored builds.

use butler_core::domain::build::{Build, BuildStatus};
use butler_core::dto::job::BuildUpsert;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Insert or update a build keyed on `(job_id, build_number)`
pub async fn upsert(pool: &PgPool, job_id: Uuid, build: &BuildUpsert) -> Result<Build, sqlx::Error> {
    let now = Utc::now();

    let row = sqlx::query_as::<_, BuildRow>(
        r#"
        INSERT INTO builds (id, job_id, build_number, status, url, duration, timestamp, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        ON CONFLICT (job_id, build_number) DO UPDATE SET
            status = EXCLUDED.status,
            url = EXCLUDED.url,
            duration = EXCLUDED.duration,
            timestamp = EXCLUDED.timestamp,
            updated_at = EXCLUDED.updated_at
        RETURNING id, job_id, build_number, status, url, duration, timestamp, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(job_id)
    .bind(build.build_number)
    .bind(build.status.as_str())
    .bind(&build.url)
    .bind(build.duration)
    .bind(build.timestamp)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

/// List the builds of a job, newest first
pub async fn list_by_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<Build>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BuildRow>(
        r#"
        SELECT id, job_id, build_number, status, url, duration, timestamp, created_at, updated_at
        FROM builds
        WHERE job_id = $1
        ORDER BY build_number DESC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct BuildRow {
    id: Uuid,
    job_id: Uuid,
    build_number: i32,
    status: String,
    url: String,
    duration: i64,
    timestamp: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BuildRow> for Build {
    fn from(row: BuildRow) -> Self {
        Build {
            id: row.id,
            job_id: row.job_id,
            build_number: row.build_number,
            status: BuildStatus::parse(&row.status),
            url: row.url,
            duration: row.duration,
            timestamp: row.timestamp,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
