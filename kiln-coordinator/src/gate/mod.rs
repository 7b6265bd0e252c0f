//! Runner Gate
//!
//! Verifies runner credentials at the protocol boundary and hands out the
//! [`RunnerIdentity`] that dispatcher operations require.

use std::sync::Arc;

use chrono::Utc;
use kiln_core::domain::job::Job;
use kiln_core::domain::runner::RunnerIdentity;
use kiln_core::domain::token::{JobToken, RunnerToken};
use kiln_core::dto::runner::RunnerInfo;
use uuid::Uuid;

use crate::error::{ProtocolError, Result};
use crate::repository::RunnerStore;

#[derive(Clone)]
pub struct RunnerGate {
    runners: Arc<dyn RunnerStore>,
}

impl RunnerGate {
    pub fn new(runners: Arc<dyn RunnerStore>) -> Self {
        Self { runners }
    }

    /// Verifies a runner credential
    ///
    /// On success the runner's liveness metadata is refreshed in the
    /// background; a failure there is logged and never surfaces to the caller.
    pub async fn authenticate(
        &self,
        raw_token: Option<&str>,
        info: Option<RunnerInfo>,
    ) -> Result<RunnerIdentity> {
        let raw_token = raw_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ProtocolError::Unauthorized("missing runner token".to_string()))?;

        let token = RunnerToken::parse(raw_token)
            .map_err(|e| ProtocolError::Unauthorized(format!("malformed runner token: {}", e)))?;

        let runner = self
            .runners
            .find_by_token(&token)
            .await?
            .ok_or_else(|| ProtocolError::Unauthorized("unknown runner token".to_string()))?;

        if !runner.active {
            tracing::warn!("Inactive runner {} attempted to authenticate", runner.id);
            return Err(ProtocolError::InactiveRunner(runner.id));
        }

        let runners = Arc::clone(&self.runners);
        let runner_id = runner.id;
        tokio::spawn(async move {
            match runners.touch(runner_id, Utc::now(), info).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!("Runner {} vanished before liveness refresh", runner_id),
                Err(e) => tracing::warn!("Failed to refresh liveness of runner {}: {}", runner_id, e),
            }
        });

        Ok(runner.identity())
    }

    /// Registers a pre-provisioned credential; known tokens are left as is
    pub async fn provision(&self, token: RunnerToken, description: &str) -> Result<RunnerIdentity> {
        let runner = self.runners.provision(token, description).await?;
        tracing::info!("Runner {} provisioned ({})", runner.id, runner.description);
        Ok(runner.identity())
    }

    /// Pauses or resumes a runner without revoking its credential
    pub async fn set_active(&self, runner_id: Uuid, active: bool) -> Result<()> {
        if !self.runners.set_active(runner_id, active).await? {
            return Err(ProtocolError::NotFound(format!("runner {}", runner_id)));
        }
        tracing::info!("Runner {} active = {}", runner_id, active);
        Ok(())
    }
}

/// Checks a job-scoped credential against the token minted at claim time
///
/// Runner credentials are never accepted here, even when they happen to be
/// syntactically valid job tokens.
pub fn verify_job_token(job: &Job, raw_token: Option<&str>) -> Result<()> {
    let raw_token = raw_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ProtocolError::Unauthorized("missing job token".to_string()))?;

    let token = JobToken::parse(raw_token)
        .map_err(|e| ProtocolError::Unauthorized(format!("malformed job token: {}", e)))?;

    match &job.token {
        Some(expected) if *expected == token => Ok(()),
        _ => Err(ProtocolError::Unauthorized(format!(
            "invalid job token for job {}",
            job.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRunnerStore;
    use kiln_core::dto::error::ReasonCode;
    use std::time::Duration;

    async fn gate_with_runner(token: &str) -> (RunnerGate, Arc<MemoryRunnerStore>, RunnerIdentity) {
        let store = Arc::new(MemoryRunnerStore::new());
        let runner = store
            .provision(RunnerToken::parse(token).unwrap(), "test runner")
            .await
            .unwrap();
        let gate = RunnerGate::new(store.clone());
        (gate, store, runner.identity())
    }

    #[tokio::test]
    async fn test_authenticate_known_runner() {
        let (gate, _, identity) = gate_with_runner("runner-1").await;

        let verified = gate.authenticate(Some("runner-1"), None).await.unwrap();
        assert_eq!(verified, identity);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_bad_credentials() {
        let (gate, _, _) = gate_with_runner("runner-1").await;

        for token in [None, Some(""), Some("has spaces"), Some("runner-2")] {
            let err = gate.authenticate(token, None).await.unwrap_err();
            assert_eq!(err.reason(), ReasonCode::Unauthorized, "token {:?}", token);
        }
    }

    #[tokio::test]
    async fn test_authenticate_rejects_inactive_runner() {
        let (gate, _, identity) = gate_with_runner("runner-1").await;
        gate.set_active(identity.id, false).await.unwrap();

        let err = gate.authenticate(Some("runner-1"), None).await.unwrap_err();
        assert_eq!(err.reason(), ReasonCode::InactiveRunner);

        gate.set_active(identity.id, true).await.unwrap();
        assert!(gate.authenticate(Some("runner-1"), None).await.is_ok());

        let err = gate.set_active(Uuid::new_v4(), false).await.unwrap_err();
        assert_eq!(err.reason(), ReasonCode::NotFound);
    }

    #[tokio::test]
    async fn test_authenticate_refreshes_liveness() {
        let (gate, store, _) = gate_with_runner("runner-1").await;
        let info = RunnerInfo {
            version: Some("0.3.0".to_string()),
            capabilities: vec!["trace".to_string()],
        };

        gate.authenticate(Some("runner-1"), Some(info)).await.unwrap();

        let token = RunnerToken::parse("runner-1").unwrap();
        let mut refreshed = None;
        for _ in 0..50 {
            let runner = store.find_by_token(&token).await.unwrap().unwrap();
            if runner.contacted_at.is_some() {
                refreshed = Some(runner);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let runner = refreshed.expect("liveness was not refreshed");
        assert_eq!(runner.version.as_deref(), Some("0.3.0"));
    }

    #[test]
    fn test_verify_job_token() {
        let token = JobToken::generate();
        let mut job = Job::pending(serde_json::Value::Null);
        job.token = Some(token.clone());

        assert!(verify_job_token(&job, Some(token.as_str())).is_ok());
        assert!(verify_job_token(&job, None).is_err());
        assert!(verify_job_token(&job, Some("kjt_other")).is_err());

        job.token = None;
        assert!(verify_job_token(&job, Some(token.as_str())).is_err());
    }
}
