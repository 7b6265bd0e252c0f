//! Job Repository
//!
//! The job store owns job rows, their trace chunks and artifact metadata.
//! Every mutation that the protocol relies on for correctness (claim,
//! transition, trace append, artifact record) is a single isolated
//! read-modify-write inside the store, never a check in the service followed
//! by a separate write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::domain::artifact::ArtifactBundle;
use kiln_core::domain::job::{Job, JobState};
use kiln_core::domain::token::JobToken;
use sqlx::PgPool;
use uuid::Uuid;

use super::{StoreError, to_i64, to_u64};

/// Result of a conditional trace append
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Chunk written; `length` is the new total
    Appended { length: u64, state: JobState },

    /// Declared offset differs from the current length; nothing written
    OffsetMismatch { length: u64, state: JobState },

    /// Job is not running or has been erased; nothing written
    NotWritable { state: JobState, erased: bool },

    NotFound,
}

/// Storage capability consumed by the dispatcher, trace channel and
/// artifact gate
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Adds a new pending job to the queue
    async fn enqueue(&self, payload: serde_json::Value) -> Result<Job, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Atomically moves the oldest pending job to running, binding it to the
    /// runner and the freshly minted job token. Concurrent callers never
    /// receive the same job.
    async fn claim_oldest_pending(
        &self,
        runner_id: Uuid,
        token: &JobToken,
    ) -> Result<Option<Job>, StoreError>;

    /// Moves a job owned by `runner_id` from `from` to `to`. Returns `None`
    /// when the job is missing, not owned by the runner, or not in `from`.
    async fn transition(
        &self,
        id: Uuid,
        runner_id: Uuid,
        from: JobState,
        to: JobState,
    ) -> Result<Option<Job>, StoreError>;

    /// Appends `chunk` if `offset` equals the current trace length and the
    /// job is running and not erased
    async fn append_trace(
        &self,
        id: Uuid,
        offset: u64,
        chunk: &[u8],
    ) -> Result<AppendOutcome, StoreError>;

    async fn read_trace(&self, id: Uuid) -> Result<Option<Vec<u8>>, StoreError>;

    /// Records (or replaces) the artifact bundle. Returns `false` without
    /// writing if the job is no longer running or has been erased.
    async fn save_artifacts(&self, bundle: &ArtifactBundle) -> Result<bool, StoreError>;

    async fn artifacts(&self, id: Uuid) -> Result<Option<ArtifactBundle>, StoreError>;

    /// Flips the erasure flag and drops the artifact record. Returns `false`
    /// if the job does not exist.
    async fn erase(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Postgres implementation of [`JobStore`]
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = r#"
    id, state, runner_id, token, payload, trace_length, erased,
    artifacts_expire_at, created_at, started_at, finished_at
"#;

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, payload: serde_json::Value) -> Result<Job, StoreError> {
        let job = Job::pending(payload);

        sqlx::query(
            r#"
            INSERT INTO jobs (id, state, payload, trace_length, erased, created_at)
            VALUES ($1, $2, $3, 0, FALSE, $4)
            "#,
        )
        .bind(job.id)
        .bind(job.state.as_str())
        .bind(&job.payload)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn claim_oldest_pending(
        &self,
        runner_id: Uuid,
        token: &JobToken,
    ) -> Result<Option<Job>, StoreError> {
        // Single statement: the inner SELECT locks the candidate row and
        // SKIP LOCKED lets concurrent claimers move on to the next one.
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET state = 'running', runner_id = $1, token = $2, started_at = $3
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'pending'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND state = 'pending'
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(runner_id)
        .bind(token.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        runner_id: Uuid,
        from: JobState,
        to: JobState,
    ) -> Result<Option<Job>, StoreError> {
        let finished_at = to.is_terminal().then(Utc::now);

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET state = $4, finished_at = COALESCE($5, finished_at)
            WHERE id = $1 AND runner_id = $2 AND state = $3
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(id)
        .bind(runner_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(finished_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn append_trace(
        &self,
        id: Uuid,
        offset: u64,
        chunk: &[u8],
    ) -> Result<AppendOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String, bool, i64)> = sqlx::query_as(
            "SELECT state, erased, trace_length FROM jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((state, erased, length)) = current else {
            return Ok(AppendOutcome::NotFound);
        };
        let state = parse_state(&state)?;
        let length = to_u64(length)?;

        if state != JobState::Running || erased {
            return Ok(AppendOutcome::NotWritable { state, erased });
        }
        if offset != length {
            return Ok(AppendOutcome::OffsetMismatch { length, state });
        }

        let new_length = length + chunk.len() as u64;

        if !chunk.is_empty() {
            sqlx::query(
                "INSERT INTO job_trace_chunks (job_id, start_offset, data) VALUES ($1, $2, $3)",
            )
            .bind(id)
            .bind(to_i64(offset)?)
            .bind(chunk)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE jobs SET trace_length = $2 WHERE id = $1")
                .bind(id)
                .bind(to_i64(new_length)?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(AppendOutcome::Appended {
            length: new_length,
            state,
        })
    }

    async fn read_trace(&self, id: Uuid) -> Result<Option<Vec<u8>>, StoreError> {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let chunks: Vec<(Vec<u8>,)> = sqlx::query_as(
            "SELECT data FROM job_trace_chunks WHERE job_id = $1 ORDER BY start_offset ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(chunks.into_iter().flat_map(|(data,)| data).collect()))
    }

    async fn save_artifacts(&self, bundle: &ArtifactBundle) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String, bool)> =
            sqlx::query_as("SELECT state, erased FROM jobs WHERE id = $1 FOR UPDATE")
                .bind(bundle.job_id)
                .fetch_optional(&mut *tx)
                .await?;

        let writable = match current {
            Some((state, erased)) => parse_state(&state)? == JobState::Running && !erased,
            None => false,
        };
        if !writable {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO job_artifacts (job_id, upload_id, file_name, file_size, metadata_size, expire_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (job_id) DO UPDATE SET
                upload_id = EXCLUDED.upload_id,
                file_name = EXCLUDED.file_name,
                file_size = EXCLUDED.file_size,
                metadata_size = EXCLUDED.metadata_size,
                expire_at = EXCLUDED.expire_at,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(bundle.job_id)
        .bind(bundle.upload_id)
        .bind(&bundle.file_name)
        .bind(to_i64(bundle.file_size)?)
        .bind(to_i64(bundle.metadata_size)?)
        .bind(bundle.expire_at)
        .bind(bundle.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE jobs SET artifacts_expire_at = $2 WHERE id = $1")
            .bind(bundle.job_id)
            .bind(bundle.expire_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn artifacts(&self, id: Uuid) -> Result<Option<ArtifactBundle>, StoreError> {
        let row = sqlx::query_as::<_, ArtifactRow>(
            r#"
            SELECT job_id, upload_id, file_name, file_size, metadata_size, expire_at, created_at
            FROM job_artifacts
            WHERE job_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ArtifactBundle::try_from).transpose()
    }

    async fn erase(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE jobs SET erased = TRUE WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM job_artifacts WHERE job_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_state(s: &str) -> Result<JobState, StoreError> {
    s.parse()
        .map_err(|e: kiln_core::domain::job::UnknownJobState| StoreError::Corrupt(e.to_string()))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    state: String,
    runner_id: Option<Uuid>,
    token: Option<String>,
    payload: serde_json::Value,
    trace_length: i64,
    erased: bool,
    artifacts_expire_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let token = row
            .token
            .map(|t| JobToken::parse(&t))
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("job {} token: {}", row.id, e)))?;

        Ok(Job {
            id: row.id,
            state: parse_state(&row.state)?,
            runner_id: row.runner_id,
            token,
            payload: row.payload,
            trace_length: to_u64(row.trace_length)?,
            erased: row.erased,
            artifacts_expire_at: row.artifacts_expire_at,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    job_id: Uuid,
    upload_id: Uuid,
    file_name: String,
    file_size: i64,
    metadata_size: i64,
    expire_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ArtifactRow> for ArtifactBundle {
    type Error = StoreError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        Ok(ArtifactBundle {
            job_id: row.job_id,
            upload_id: row.upload_id,
            file_name: row.file_name,
            file_size: to_u64(row.file_size)?,
            metadata_size: to_u64(row.metadata_size)?,
            expire_at: row.expire_at,
            created_at: row.created_at,
        })
    }
}
