use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create instances table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS instances (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            description TEXT,
            url TEXT NOT NULL,
            load_balancer_url TEXT,
            health_check_url TEXT,
            username VARCHAR(255) NOT NULL,
            api_token TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            is_primary BOOLEAN NOT NULL DEFAULT FALSE,
            cluster_id VARCHAR(255),
            priority INTEGER NOT NULL DEFAULT 0,
            current_load INTEGER NOT NULL DEFAULT 0,
            max_connections INTEGER NOT NULL DEFAULT 100,
            health_status VARCHAR(20) NOT NULL DEFAULT 'unknown',
            last_health_check TIMESTAMPTZ,
            last_sync_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one primary per cluster
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_instances_one_primary
        ON instances ((COALESCE(cluster_id, 'default')))
        WHERE is_primary
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_instances_selection ON instances(is_active, health_status, current_load)",
    )
    .execute(pool)
    .await?;

    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            instance_id UUID NOT NULL REFERENCES instances(id) ON DELETE CASCADE,
            name VARCHAR(512) NOT NULL,
            display_name VARCHAR(512) NOT NULL,
            url TEXT NOT NULL,
            job_type VARCHAR(20) NOT NULL,
            color VARCHAR(50) NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            buildable BOOLEAN NOT NULL DEFAULT TRUE,
            in_queue BOOLEAN NOT NULL DEFAULT FALSE,
            last_build_number INTEGER NOT NULL DEFAULT 0,
            last_build_status VARCHAR(20) NOT NULL,
            last_build_time TIMESTAMPTZ,
            health_score INTEGER NOT NULL DEFAULT 100,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (instance_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create builds table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS builds (
            id UUID PRIMARY KEY,
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            build_number INTEGER NOT NULL,
            status VARCHAR(20) NOT NULL,
            url TEXT NOT NULL,
            duration BIGINT NOT NULL DEFAULT 0,
            timestamp TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (job_id, build_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_builds_job_number ON builds(job_id, build_number DESC)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
