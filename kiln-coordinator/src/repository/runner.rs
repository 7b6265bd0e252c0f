//! Runner Repository
//!
//! Handles storage of provisioned runners and their liveness metadata.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::domain::runner::Runner;
use kiln_core::domain::token::RunnerToken;
use kiln_core::dto::runner::RunnerInfo;
use sqlx::PgPool;
use uuid::Uuid;

use super::StoreError;

/// Registry of runners, keyed by credential
#[async_trait]
pub trait RunnerStore: Send + Sync {
    /// Records a pre-provisioned runner. Provisioning an already known token
    /// returns the existing runner unchanged.
    async fn provision(
        &self,
        token: RunnerToken,
        description: &str,
    ) -> Result<Runner, StoreError>;

    async fn find_by_token(&self, token: &RunnerToken) -> Result<Option<Runner>, StoreError>;

    /// Refreshes liveness and, when reported, version and capabilities
    async fn touch(
        &self,
        id: Uuid,
        contacted_at: DateTime<Utc>,
        info: Option<RunnerInfo>,
    ) -> Result<bool, StoreError>;

    /// Pauses or resumes a runner
    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool, StoreError>;
}

/// Postgres implementation of [`RunnerStore`]
#[derive(Debug, Clone)]
pub struct PgRunnerStore {
    pool: PgPool,
}

impl PgRunnerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunnerStore for PgRunnerStore {
    async fn provision(
        &self,
        token: RunnerToken,
        description: &str,
    ) -> Result<Runner, StoreError> {
        let runner = Runner::provisioned(token, description);

        sqlx::query(
            r#"
            INSERT INTO runners (id, token, description, active, capabilities, registered_at)
            VALUES ($1, $2, $3, TRUE, '{}', $4)
            ON CONFLICT (token) DO NOTHING
            "#,
        )
        .bind(runner.id)
        .bind(runner.token.as_str())
        .bind(&runner.description)
        .bind(runner.registered_at)
        .execute(&self.pool)
        .await?;

        self.find_by_token(&runner.token)
            .await?
            .ok_or_else(|| StoreError::Corrupt("provisioned runner vanished".to_string()))
    }

    async fn find_by_token(&self, token: &RunnerToken) -> Result<Option<Runner>, StoreError> {
        let row = sqlx::query_as::<_, RunnerRow>(
            r#"
            SELECT id, token, description, active, capabilities, version,
                   registered_at, contacted_at
            FROM runners
            WHERE token = $1
            "#,
        )
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Runner::try_from).transpose()
    }

    async fn touch(
        &self,
        id: Uuid,
        contacted_at: DateTime<Utc>,
        info: Option<RunnerInfo>,
    ) -> Result<bool, StoreError> {
        let result = match info {
            Some(info) => {
                sqlx::query(
                    r#"
                    UPDATE runners
                    SET contacted_at = $2, version = $3, capabilities = $4
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(contacted_at)
                .bind(info.version)
                .bind(info.capabilities)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query("UPDATE runners SET contacted_at = $2 WHERE id = $1")
                    .bind(id)
                    .bind(contacted_at)
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE runners SET active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunnerRow {
    id: Uuid,
    token: String,
    description: String,
    active: bool,
    capabilities: Vec<String>,
    version: Option<String>,
    registered_at: DateTime<Utc>,
    contacted_at: Option<DateTime<Utc>>,
}

impl TryFrom<RunnerRow> for Runner {
    type Error = StoreError;

    fn try_from(row: RunnerRow) -> Result<Self, Self::Error> {
        let token = RunnerToken::parse(&row.token)
            .map_err(|e| StoreError::Corrupt(format!("runner {} token: {}", row.id, e)))?;

        Ok(Runner {
            id: row.id,
            token,
            description: row.description,
            active: row.active,
            capabilities: row.capabilities,
            version: row.version,
            registered_at: row.registered_at,
            contacted_at: row.contacted_at,
        })
    }
}
