//! In-memory repositories
//!
//! Used when the coordinator runs without a database (development mode) and
//! by tests. Each store keeps its whole state behind one async mutex, so every
//! operation is a single isolated read-modify-write, matching the guarantees
//! of the Postgres backends.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::domain::artifact::ArtifactBundle;
use kiln_core::domain::job::{Job, JobState};
use kiln_core::domain::runner::Runner;
use kiln_core::domain::token::{JobToken, RunnerToken};
use kiln_core::dto::runner::RunnerInfo;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::StoreError;
use super::job::{AppendOutcome, JobStore};
use super::runner::RunnerStore;

struct JobEntry {
    job: Job,
    trace: Vec<u8>,
    artifacts: Option<ArtifactBundle>,
}

#[derive(Default)]
struct JobTable {
    entries: HashMap<Uuid, JobEntry>,
    /// Pending job ids in enqueue order
    pending: VecDeque<Uuid>,
}

/// In-memory implementation of [`JobStore`]
#[derive(Default)]
pub struct MemoryJobStore {
    table: Mutex<JobTable>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, payload: serde_json::Value) -> Result<Job, StoreError> {
        let job = Job::pending(payload);
        let mut table = self.table.lock().await;

        table.pending.push_back(job.id);
        table.entries.insert(
            job.id,
            JobEntry {
                job: job.clone(),
                trace: Vec::new(),
                artifacts: None,
            },
        );

        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let table = self.table.lock().await;
        Ok(table.entries.get(&id).map(|e| e.job.clone()))
    }

    async fn claim_oldest_pending(
        &self,
        runner_id: Uuid,
        token: &JobToken,
    ) -> Result<Option<Job>, StoreError> {
        let mut table = self.table.lock().await;

        while let Some(id) = table.pending.pop_front() {
            let Some(entry) = table.entries.get_mut(&id) else {
                continue;
            };
            if entry.job.state != JobState::Pending {
                continue;
            }

            entry.job.state = JobState::Running;
            entry.job.runner_id = Some(runner_id);
            entry.job.token = Some(token.clone());
            entry.job.started_at = Some(Utc::now());
            return Ok(Some(entry.job.clone()));
        }

        Ok(None)
    }

    async fn transition(
        &self,
        id: Uuid,
        runner_id: Uuid,
        from: JobState,
        to: JobState,
    ) -> Result<Option<Job>, StoreError> {
        let mut table = self.table.lock().await;

        let Some(entry) = table.entries.get_mut(&id) else {
            return Ok(None);
        };
        if !entry.job.is_owned_by(runner_id) || entry.job.state != from {
            return Ok(None);
        }

        entry.job.state = to;
        if to.is_terminal() {
            entry.job.finished_at = Some(Utc::now());
        }
        Ok(Some(entry.job.clone()))
    }

    async fn append_trace(
        &self,
        id: Uuid,
        offset: u64,
        chunk: &[u8],
    ) -> Result<AppendOutcome, StoreError> {
        let mut table = self.table.lock().await;

        let Some(entry) = table.entries.get_mut(&id) else {
            return Ok(AppendOutcome::NotFound);
        };
        let job = &mut entry.job;

        if !job.is_writable() {
            return Ok(AppendOutcome::NotWritable {
                state: job.state,
                erased: job.erased,
            });
        }
        if offset != job.trace_length {
            return Ok(AppendOutcome::OffsetMismatch {
                length: job.trace_length,
                state: job.state,
            });
        }

        entry.trace.extend_from_slice(chunk);
        job.trace_length += chunk.len() as u64;

        Ok(AppendOutcome::Appended {
            length: job.trace_length,
            state: job.state,
        })
    }

    async fn read_trace(&self, id: Uuid) -> Result<Option<Vec<u8>>, StoreError> {
        let table = self.table.lock().await;
        Ok(table.entries.get(&id).map(|e| e.trace.clone()))
    }

    async fn save_artifacts(&self, bundle: &ArtifactBundle) -> Result<bool, StoreError> {
        let mut table = self.table.lock().await;

        let Some(entry) = table.entries.get_mut(&bundle.job_id) else {
            return Ok(false);
        };
        if !entry.job.is_writable() {
            return Ok(false);
        }

        entry.job.artifacts_expire_at = bundle.expire_at;
        entry.artifacts = Some(bundle.clone());
        Ok(true)
    }

    async fn artifacts(&self, id: Uuid) -> Result<Option<ArtifactBundle>, StoreError> {
        let table = self.table.lock().await;
        Ok(table.entries.get(&id).and_then(|e| e.artifacts.clone()))
    }

    async fn erase(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut table = self.table.lock().await;

        let Some(entry) = table.entries.get_mut(&id) else {
            return Ok(false);
        };
        entry.job.erased = true;
        entry.artifacts = None;
        Ok(true)
    }
}

/// In-memory implementation of [`RunnerStore`]
#[derive(Default)]
pub struct MemoryRunnerStore {
    runners: Mutex<HashMap<Uuid, Runner>>,
}

impl MemoryRunnerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunnerStore for MemoryRunnerStore {
    async fn provision(
        &self,
        token: RunnerToken,
        description: &str,
    ) -> Result<Runner, StoreError> {
        let mut runners = self.runners.lock().await;

        if let Some(existing) = runners.values().find(|r| r.token == token) {
            return Ok(existing.clone());
        }

        let runner = Runner::provisioned(token, description);
        runners.insert(runner.id, runner.clone());
        Ok(runner)
    }

    async fn find_by_token(&self, token: &RunnerToken) -> Result<Option<Runner>, StoreError> {
        let runners = self.runners.lock().await;
        Ok(runners.values().find(|r| &r.token == token).cloned())
    }

    async fn touch(
        &self,
        id: Uuid,
        contacted_at: DateTime<Utc>,
        info: Option<RunnerInfo>,
    ) -> Result<bool, StoreError> {
        let mut runners = self.runners.lock().await;

        let Some(runner) = runners.get_mut(&id) else {
            return Ok(false);
        };
        runner.contacted_at = Some(contacted_at);
        if let Some(info) = info {
            runner.version = info.version;
            runner.capabilities = info.capabilities;
        }
        Ok(true)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool, StoreError> {
        let mut runners = self.runners.lock().await;

        let Some(runner) = runners.get_mut(&id) else {
            return Ok(false);
        };
        runner.active = active;
        Ok(true)
    }
}
