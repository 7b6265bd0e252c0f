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
    // Create runners table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runners (
            id UUID PRIMARY KEY,
            token VARCHAR(255) NOT NULL UNIQUE,
            description TEXT NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            capabilities TEXT[] NOT NULL DEFAULT '{}',
            version VARCHAR(255),
            registered_at TIMESTAMPTZ NOT NULL,
            contacted_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create jobs table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            state VARCHAR(50) NOT NULL,
            runner_id UUID REFERENCES runners(id) ON DELETE SET NULL,
            token VARCHAR(255),
            payload JSONB NOT NULL DEFAULT 'null',
            trace_length BIGINT NOT NULL DEFAULT 0,
            erased BOOLEAN NOT NULL DEFAULT FALSE,
            artifacts_expire_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create trace chunks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_trace_chunks (
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            start_offset BIGINT NOT NULL,
            data BYTEA NOT NULL,
            PRIMARY KEY (job_id, start_offset)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create artifacts table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_artifacts (
            job_id UUID PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
            upload_id UUID NOT NULL,
            file_name TEXT NOT NULL,
            file_size BIGINT NOT NULL,
            metadata_size BIGINT NOT NULL,
            expire_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Claim order scan only touches pending rows
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_jobs_pending ON jobs(created_at, id) WHERE state = 'pending'",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_runner_id ON jobs(runner_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runners_contacted_at ON runners(contacted_at)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
