//! Job Repository
//!
//! Handles all database operations related to mirrored jobs.

use butler_core::domain::build::BuildStatus;
use butler_core::domain::job::{Job, JobType};
use butler_core::dto::job::JobUpsert;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Insert or update a job keyed on `(instance_id, name)`
///
/// The row keeps its id and `created_at` across updates.
pub async fn upsert(pool: &PgPool, instance_id: Uuid, job: &JobUpsert) -> Result<Job, sqlx::Error> {
    let now = Utc::now();

    let row = sqlx::query_as::<_, JobRow>(
        r#"
        INSERT INTO jobs (
            id, instance_id, name, display_name, url, job_type, color, description,
            buildable, in_queue, last_build_number, last_build_status, last_build_time,
            health_score, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
        ON CONFLICT (instance_id, name) DO UPDATE SET
            display_name = EXCLUDED.display_name,
            url = EXCLUDED.url,
            job_type = EXCLUDED.job_type,
            color = EXCLUDED.color,
            description = EXCLUDED.description,
            buildable = EXCLUDED.buildable,
            in_queue = EXCLUDED.in_queue,
            last_build_number = EXCLUDED.last_build_number,
            last_build_status = EXCLUDED.last_build_status,
            last_build_time = EXCLUDED.last_build_time,
            health_score = EXCLUDED.health_score,
            updated_at = EXCLUDED.updated_at
        RETURNING id, instance_id, name, display_name, url, job_type, color, description,
                  buildable, in_queue, last_build_number, last_build_status, last_build_time,
                  health_score, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(instance_id)
    .bind(&job.name)
    .bind(&job.display_name)
    .bind(&job.url)
    .bind(job.job_type.as_str())
    .bind(&job.color)
    .bind(&job.description)
    .bind(job.buildable)
    .bind(job.in_queue)
    .bind(job.last_build_number)
    .bind(job.last_build_status.as_str())
    .bind(job.last_build_time)
    .bind(job.health_score)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

/// List the jobs of an instance
pub async fn list_by_instance(pool: &PgPool, instance_id: Uuid) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, instance_id, name, display_name, url, job_type, color, description,
               buildable, in_queue, last_build_number, last_build_status, last_build_time,
               health_score, created_at, updated_at
        FROM jobs
        WHERE instance_id = $1
        ORDER BY name ASC
        "#,
    )
    .bind(instance_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    instance_id: Uuid,
    name: String,
    display_name: String,
    url: String,
    job_type: String,
    color: String,
    description: String,
    buildable: bool,
    in_queue: bool,
    last_build_number: i32,
    last_build_status: String,
    last_build_time: Option<DateTime<Utc>>,
    health_score: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            instance_id: row.instance_id,
            name: row.name,
            display_name: row.display_name,
            url: row.url,
            job_type: JobType::parse(&row.job_type),
            color: row.color,
            description: row.description,
            buildable: row.buildable,
            in_queue: row.in_queue,
            last_build_number: row.last_build_number,
            last_build_status: BuildStatus::parse(&row.last_build_status),
            last_build_time: row.last_build_time,
            health_score: row.health_score,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
