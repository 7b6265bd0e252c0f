//! Dispatcher
//!
//! Hands pending jobs to polling runners and records their outcome.
//!
//! Claiming is delegated to [`JobStore::claim_oldest_pending`], which is a
//! single atomic statement; the dispatcher never checks a job's state and
//! then writes it in two steps. Empty polls are deduplicated through the
//! [`MarkerCache`], which is best-effort: with no cache at all every empty
//! poll simply receives a fresh marker.

use std::sync::Arc;
use std::time::Duration;

use kiln_core::domain::job::{Job, JobOutcome, JobState};
use kiln_core::domain::marker::PollMarker;
use kiln_core::domain::runner::RunnerIdentity;
use kiln_core::domain::token::JobToken;
use uuid::Uuid;

use crate::error::{ProtocolError, Result};
use crate::repository::{JobStore, MarkerCache};

/// Result of a poll
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// A job was claimed for the runner; `token` is its job-scoped credential
    Assigned { job: Job, token: JobToken },

    /// Nothing to do; the runner must echo `marker` on its next poll
    NoWork { marker: PollMarker },

    /// Nothing changed since the echoed marker was issued
    NotModified,
}

#[derive(Clone)]
pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    markers: Arc<dyn MarkerCache>,
    marker_ttl: Duration,
}

impl Dispatcher {
    pub fn new(jobs: Arc<dyn JobStore>, markers: Arc<dyn MarkerCache>, marker_ttl: Duration) -> Self {
        Self {
            jobs,
            markers,
            marker_ttl,
        }
    }

    /// Adds a pending job to the queue
    pub async fn enqueue(&self, payload: serde_json::Value) -> Result<Job> {
        let job = self.jobs.enqueue(payload).await?;
        tracing::info!("Job {} enqueued", job.id);
        Ok(job)
    }

    pub async fn poll(
        &self,
        runner: &RunnerIdentity,
        last_marker: Option<&PollMarker>,
    ) -> Result<PollOutcome> {
        let token = JobToken::generate();

        if let Some(job) = self.jobs.claim_oldest_pending(runner.id, &token).await? {
            tracing::info!("Job {} assigned to runner {}", job.id, runner.id);
            return Ok(PollOutcome::Assigned { job, token });
        }

        let cached = match self.markers.get(runner.id).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Marker cache read failed for runner {}: {}", runner.id, e);
                None
            }
        };

        if let (Some(cached), Some(echoed)) = (cached.as_ref(), last_marker) {
            if cached == echoed {
                tracing::debug!("Runner {} poll not modified", runner.id);
                return Ok(PollOutcome::NotModified);
            }
        }

        let marker = PollMarker::generate();
        if let Err(e) = self
            .markers
            .set_with_ttl(runner.id, marker.clone(), self.marker_ttl)
            .await
        {
            tracing::warn!("Marker cache write failed for runner {}: {}", runner.id, e);
        }

        tracing::debug!("No work for runner {}, issued marker {}", runner.id, marker);
        Ok(PollOutcome::NoWork { marker })
    }

    /// Moves a running job owned by `runner` to its terminal state
    ///
    /// Repeating the same outcome is a no-op; a different outcome than the
    /// one already recorded is a conflict.
    pub async fn complete(
        &self,
        runner: &RunnerIdentity,
        job_id: Uuid,
        outcome: JobOutcome,
    ) -> Result<Job> {
        let target = JobState::from(outcome);

        if let Some(job) = self
            .jobs
            .transition(job_id, runner.id, JobState::Running, target)
            .await?
        {
            tracing::info!("Job {} finished as {} by runner {}", job_id, target, runner.id);
            return Ok(job);
        }

        // The conditional transition did not apply; work out why
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| ProtocolError::job_not_found(job_id))?;

        if !job.is_owned_by(runner.id) {
            return Err(ProtocolError::Conflict(format!(
                "job {} is not owned by runner {}",
                job_id, runner.id
            )));
        }

        if job.state == target {
            tracing::debug!("Job {} already {}, completion ignored", job_id, target);
            return Ok(job);
        }

        Err(ProtocolError::Conflict(format!(
            "job {} is {} and cannot become {}",
            job_id, job.state, target
        )))
    }

    /// Confirms that `runner` still holds the running job
    pub async fn keep_alive(&self, runner: &RunnerIdentity, job_id: Uuid) -> Result<Job> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| ProtocolError::job_not_found(job_id))?;

        if !job.is_owned_by(runner.id) {
            return Err(ProtocolError::Conflict(format!(
                "job {} is not owned by runner {}",
                job_id, runner.id
            )));
        }
        if job.state != JobState::Running {
            return Err(ProtocolError::Conflict(format!(
                "job {} is {}, not running",
                job_id, job.state
            )));
        }

        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryJobStore, MemoryMarkerCache, NoopMarkerCache, StoreError};
    use async_trait::async_trait;
    use kiln_core::dto::error::ReasonCode;
    use std::collections::HashSet;

    fn runner() -> RunnerIdentity {
        RunnerIdentity {
            id: Uuid::new_v4(),
            description: "test".to_string(),
        }
    }

    fn dispatcher(markers: Arc<dyn MarkerCache>, ttl: Duration) -> Dispatcher {
        Dispatcher::new(Arc::new(MemoryJobStore::new()), markers, ttl)
    }

    fn cached_dispatcher() -> Dispatcher {
        dispatcher(Arc::new(MemoryMarkerCache::new()), Duration::from_secs(3600))
    }

    async fn assign(dispatcher: &Dispatcher, runner: &RunnerIdentity) -> Job {
        match dispatcher.poll(runner, None).await.unwrap() {
            PollOutcome::Assigned { job, .. } => job,
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_poll_then_echo_is_not_modified() {
        let dispatcher = cached_dispatcher();
        let runner = runner();

        let marker = match dispatcher.poll(&runner, None).await.unwrap() {
            PollOutcome::NoWork { marker } => marker,
            other => panic!("expected no work, got {:?}", other),
        };

        let again = dispatcher.poll(&runner, Some(&marker)).await.unwrap();
        assert!(matches!(again, PollOutcome::NotModified));
    }

    #[tokio::test]
    async fn test_unknown_marker_gets_fresh_marker() {
        let dispatcher = cached_dispatcher();
        let runner = runner();

        let first = match dispatcher.poll(&runner, None).await.unwrap() {
            PollOutcome::NoWork { marker } => marker,
            other => panic!("expected no work, got {:?}", other),
        };

        let bogus = PollMarker::from("0-deadbeef");
        match dispatcher.poll(&runner, Some(&bogus)).await.unwrap() {
            PollOutcome::NoWork { marker } => assert_ne!(marker, first),
            other => panic!("expected no work, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_markers_are_not_shared_between_runners() {
        let dispatcher = cached_dispatcher();
        let a = runner();
        let b = runner();

        let marker = match dispatcher.poll(&a, None).await.unwrap() {
            PollOutcome::NoWork { marker } => marker,
            other => panic!("expected no work, got {:?}", other),
        };

        let outcome = dispatcher.poll(&b, Some(&marker)).await.unwrap();
        assert!(matches!(outcome, PollOutcome::NoWork { .. }));
    }

    #[tokio::test]
    async fn test_expired_marker_yields_fresh_no_work() {
        let dispatcher = dispatcher(Arc::new(MemoryMarkerCache::new()), Duration::from_millis(30));
        let runner = runner();

        let marker = match dispatcher.poll(&runner, None).await.unwrap() {
            PollOutcome::NoWork { marker } => marker,
            other => panic!("expected no work, got {:?}", other),
        };

        tokio::time::sleep(Duration::from_millis(80)).await;

        match dispatcher.poll(&runner, Some(&marker)).await.unwrap() {
            PollOutcome::NoWork { marker: fresh } => assert_ne!(fresh, marker),
            other => panic!("expected no work, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_without_cache_every_empty_poll_is_fresh() {
        let dispatcher = dispatcher(Arc::new(NoopMarkerCache), Duration::from_secs(3600));
        let runner = runner();

        let mut marker = None;
        for _ in 0..3 {
            match dispatcher.poll(&runner, marker.as_ref()).await.unwrap() {
                PollOutcome::NoWork { marker: next } => marker = Some(next),
                other => panic!("expected no work, got {:?}", other),
            }
        }

        dispatcher.enqueue(serde_json::json!({"step": 1})).await.unwrap();
        let job = assign(&dispatcher, &runner).await;
        assert_eq!(job.state, JobState::Running);
    }

    struct BrokenCache;

    #[async_trait]
    impl MarkerCache for BrokenCache {
        async fn get(&self, _runner_id: Uuid) -> std::result::Result<Option<PollMarker>, StoreError> {
            Err(StoreError::Corrupt("cache down".to_string()))
        }

        async fn set_with_ttl(
            &self,
            _runner_id: Uuid,
            _marker: PollMarker,
            _ttl: Duration,
        ) -> std::result::Result<(), StoreError> {
            Err(StoreError::Corrupt("cache down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_cache_failure_degrades_to_no_work() {
        let dispatcher = dispatcher(Arc::new(BrokenCache), Duration::from_secs(3600));
        let outcome = dispatcher
            .poll(&runner(), Some(&PollMarker::generate()))
            .await
            .unwrap();
        assert!(matches!(outcome, PollOutcome::NoWork { .. }));
    }

    #[tokio::test]
    async fn test_pending_job_beats_marker() {
        let dispatcher = cached_dispatcher();
        let runner = runner();

        let marker = match dispatcher.poll(&runner, None).await.unwrap() {
            PollOutcome::NoWork { marker } => marker,
            other => panic!("expected no work, got {:?}", other),
        };

        dispatcher.enqueue(serde_json::Value::Null).await.unwrap();
        let outcome = dispatcher.poll(&runner, Some(&marker)).await.unwrap();
        match outcome {
            PollOutcome::Assigned { job, token } => {
                assert_eq!(job.token, Some(token));
                assert_eq!(job.runner_id, Some(runner.id));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_polls_claim_each_job_once() {
        let dispatcher = cached_dispatcher();
        let job = dispatcher.enqueue(serde_json::Value::Null).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                let runner = runner();
                let outcome = dispatcher.poll(&runner, None).await.unwrap();
                (runner, outcome)
            }));
        }

        let mut winners = Vec::new();
        for handle in handles {
            let (runner, outcome) = handle.await.unwrap();
            if let PollOutcome::Assigned { job, .. } = outcome {
                winners.push((runner, job));
            }
        }

        assert_eq!(winners.len(), 1);
        let (winner, claimed) = &winners[0];
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.runner_id, Some(winner.id));
    }

    #[tokio::test]
    async fn test_two_runners_never_get_the_same_job() {
        let dispatcher = cached_dispatcher();
        for i in 0..2 {
            dispatcher.enqueue(serde_json::json!(i)).await.unwrap();
        }

        let a = assign(&dispatcher, &runner()).await;
        let b = assign(&dispatcher, &runner()).await;
        let ids: HashSet<_> = [a.id, b.id].into_iter().collect();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let dispatcher = cached_dispatcher();
        let runner = runner();
        dispatcher.enqueue(serde_json::Value::Null).await.unwrap();
        let job = assign(&dispatcher, &runner).await;

        let done = dispatcher
            .complete(&runner, job.id, JobOutcome::Success)
            .await
            .unwrap();
        assert_eq!(done.state, JobState::Success);

        let again = dispatcher
            .complete(&runner, job.id, JobOutcome::Success)
            .await
            .unwrap();
        assert_eq!(again.state, JobState::Success);

        let err = dispatcher
            .complete(&runner, job.id, JobOutcome::Failed)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ReasonCode::Conflict);
    }

    #[tokio::test]
    async fn test_complete_rejects_foreign_and_unknown_jobs() {
        let dispatcher = cached_dispatcher();
        let owner = runner();
        dispatcher.enqueue(serde_json::Value::Null).await.unwrap();
        let job = assign(&dispatcher, &owner).await;

        let err = dispatcher
            .complete(&runner(), job.id, JobOutcome::Success)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ReasonCode::Conflict);

        let err = dispatcher
            .complete(&owner, Uuid::new_v4(), JobOutcome::Success)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ReasonCode::NotFound);
    }

    #[tokio::test]
    async fn test_complete_rejects_pending_job() {
        let dispatcher = cached_dispatcher();
        let job = dispatcher.enqueue(serde_json::Value::Null).await.unwrap();

        let err = dispatcher
            .complete(&runner(), job.id, JobOutcome::Failed)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ReasonCode::Conflict);
    }

    #[tokio::test]
    async fn test_keep_alive() {
        let dispatcher = cached_dispatcher();
        let owner = runner();
        dispatcher.enqueue(serde_json::Value::Null).await.unwrap();
        let job = assign(&dispatcher, &owner).await;

        assert!(dispatcher.keep_alive(&owner, job.id).await.is_ok());
        assert!(dispatcher.keep_alive(&runner(), job.id).await.is_err());

        dispatcher
            .complete(&owner, job.id, JobOutcome::Failed)
            .await
            .unwrap();
        let err = dispatcher.keep_alive(&owner, job.id).await.unwrap_err();
        assert_eq!(err.reason(), ReasonCode::Conflict);
    }
}
