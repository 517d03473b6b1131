//! Instance Repository
//!
//! Handles all database operations related to registered instances.

use butler_core::domain::instance::{DEFAULT_CLUSTER, HealthStatus, Instance};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const INSTANCE_COLUMNS: &str = r#"
    id, name, description, url, load_balancer_url, health_check_url, username, api_token,
    is_active, is_primary, cluster_id, priority, current_load, max_connections,
    health_status, last_health_check, last_sync_at, created_at, updated_at
"#;

/// Insert a new instance
///
/// When the instance is primary, any other primary of the same cluster is
/// demoted in the same transaction.
pub async fn create(pool: &PgPool, instance: &Instance) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    if instance.is_primary {
        demote_primaries(&mut tx, instance.cluster(), instance.id).await?;
    }

    sqlx::query(
        r#"
        INSERT INTO instances (
            id, name, description, url, load_balancer_url, health_check_url, username, api_token,
            is_active, is_primary, cluster_id, priority, current_load, max_connections,
            health_status, last_health_check, last_sync_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        "#,
    )
    .bind(instance.id)
    .bind(&instance.name)
    .bind(&instance.description)
    .bind(&instance.url)
    .bind(&instance.load_balancer_url)
    .bind(&instance.health_check_url)
    .bind(&instance.username)
    .bind(&instance.api_token)
    .bind(instance.is_active)
    .bind(instance.is_primary)
    .bind(&instance.cluster_id)
    .bind(instance.priority)
    .bind(instance.current_load)
    .bind(instance.max_connections)
    .bind(instance.health_status.as_str())
    .bind(instance.last_health_check)
    .bind(instance.last_sync_at)
    .bind(instance.created_at)
    .bind(instance.updated_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

/// Write the administrative fields of an instance
///
/// Load, health and sync timestamps are owned by other writers and left alone.
pub async fn update(pool: &PgPool, instance: &Instance) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    if instance.is_primary {
        demote_primaries(&mut tx, instance.cluster(), instance.id).await?;
    }

    let result = sqlx::query(
        r#"
        UPDATE instances
        SET name = $1, description = $2, url = $3, load_balancer_url = $4,
            health_check_url = $5, username = $6, api_token = $7, is_active = $8,
            is_primary = $9, cluster_id = $10, priority = $11, max_connections = $12,
            updated_at = $13
        WHERE id = $14
        "#,
    )
    .bind(&instance.name)
    .bind(&instance.description)
    .bind(&instance.url)
    .bind(&instance.load_balancer_url)
    .bind(&instance.health_check_url)
    .bind(&instance.username)
    .bind(&instance.api_token)
    .bind(instance.is_active)
    .bind(instance.is_primary)
    .bind(&instance.cluster_id)
    .bind(instance.priority)
    .bind(instance.max_connections)
    .bind(instance.updated_at)
    .bind(instance.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

async fn demote_primaries(
    tx: &mut Transaction<'_, Postgres>,
    cluster: &str,
    keep: Uuid,
) -> Result<(), sqlx::Error> {
    let demoted = sqlx::query(
        r#"
        UPDATE instances
        SET is_primary = FALSE, updated_at = $1
        WHERE is_primary AND COALESCE(cluster_id, $2) = $3 AND id <> $4
        "#,
    )
    .bind(Utc::now())
    .bind(DEFAULT_CLUSTER)
    .bind(cluster)
    .bind(keep)
    .execute(&mut **tx)
    .await?;

    if demoted.rows_affected() > 0 {
        tracing::info!("Demoted previous primary of cluster {}", cluster);
    }
    Ok(())
}

/// Find an instance by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Instance>, sqlx::Error> {
    let row = sqlx::query_as::<_, InstanceRow>(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all instances
pub async fn list_all(pool: &PgPool) -> Result<Vec<Instance>, sqlx::Error> {
    let rows = sqlx::query_as::<_, InstanceRow>(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM instances ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// List active instances
pub async fn list_active(pool: &PgPool) -> Result<Vec<Instance>, sqlx::Error> {
    let rows = sqlx::query_as::<_, InstanceRow>(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM instances WHERE is_active ORDER BY priority DESC, name ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// List active healthy instances, least loaded first
pub async fn list_healthy(
    pool: &PgPool,
    cluster: Option<&str>,
) -> Result<Vec<Instance>, sqlx::Error> {
    let rows = sqlx::query_as::<_, InstanceRow>(&format!(
        r#"
        SELECT {INSTANCE_COLUMNS}
        FROM instances
        WHERE is_active
          AND health_status = $1
          AND ($2::TEXT IS NULL OR COALESCE(cluster_id, $3) = $2)
        ORDER BY current_load ASC, priority DESC, name ASC
        "#
    ))
    .bind(HealthStatus::Healthy.as_str())
    .bind(cluster)
    .bind(DEFAULT_CLUSTER)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Delete an instance; its jobs and builds cascade
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM instances WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Add `delta` to the current load in a single statement
pub async fn adjust_load(
    pool: &PgPool,
    id: Uuid,
    delta: i32,
) -> Result<Option<Instance>, sqlx::Error> {
    let row = sqlx::query_as::<_, InstanceRow>(&format!(
        r#"
        UPDATE instances
        SET current_load = current_load + $1, updated_at = $2
        WHERE id = $3
        RETURNING {INSTANCE_COLUMNS}
        "#
    ))
    .bind(delta)
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Record a health classification
pub async fn update_health(
    pool: &PgPool,
    id: Uuid,
    status: HealthStatus,
    checked_at: Option<DateTime<Utc>>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE instances
        SET health_status = $1,
            last_health_check = COALESCE($2, last_health_check),
            updated_at = $3
        WHERE id = $4
        "#,
    )
    .bind(status.as_str())
    .bind(checked_at)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Stamp the completion time of a sync pass
pub async fn touch_last_sync(
    pool: &PgPool,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE instances SET last_sync_at = $1 WHERE id = $2")
        .bind(at)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    url: String,
    load_balancer_url: Option<String>,
    health_check_url: Option<String>,
    username: String,
    api_token: String,
    is_active: bool,
    is_primary: bool,
    cluster_id: Option<String>,
    priority: i32,
    current_load: i32,
    max_connections: i32,
    health_status: String,
    last_health_check: Option<DateTime<Utc>>,
    last_sync_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<InstanceRow> for Instance {
    fn from(row: InstanceRow) -> Self {
        Instance {
            id: row.id,
            name: row.name,
            description: row.description,
            url: row.url,
            load_balancer_url: row.load_balancer_url,
            health_check_url: row.health_check_url,
            username: row.username,
            api_token: row.api_token,
            is_active: row.is_active,
            is_primary: row.is_primary,
            cluster_id: row.cluster_id,
            priority: row.priority,
            current_load: row.current_load,
            max_connections: row.max_connections,
            health_status: HealthStatus::parse(&row.health_status),
            last_health_check: row.last_health_check,
            last_sync_at: row.last_sync_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
