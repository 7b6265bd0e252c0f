//! Job domain types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::token::JobToken;

/// Job record
///
/// Structure shared between coordinator (persists) and runner (executes).
/// The job token is never serialized; it only travels inside a
/// [`JobDescriptor`](crate::dto::job::JobDescriptor) at claim time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub state: JobState,
    /// Runner the job is bound to, set exactly once by a claim
    pub runner_id: Option<Uuid>,
    #[serde(skip)]
    pub token: Option<JobToken>,
    /// Opaque work description handed to the runner
    pub payload: serde_json::Value,
    pub trace_length: u64,
    pub erased: bool,
    pub artifacts_expire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a new pending job
    pub fn pending(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: JobState::Pending,
            runner_id: None,
            token: None,
            payload,
            trace_length: 0,
            erased: false,
            artifacts_expire_at: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether the job is bound to the given runner
    pub fn is_owned_by(&self, runner_id: Uuid) -> bool {
        self.runner_id == Some(runner_id)
    }

    /// Whether trace and artifact writes are currently allowed
    pub fn is_writable(&self) -> bool {
        self.state == JobState::Running && !self.erased
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Success => "success",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "success" => Ok(JobState::Success),
            "failed" => Ok(JobState::Failed),
            other => Err(UnknownJobState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job state: {0}")]
pub struct UnknownJobState(pub String);

/// Terminal outcome reported by a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Success,
    Failed,
}

impl From<JobOutcome> for JobState {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Success => JobState::Success,
            JobOutcome::Failed => JobState::Failed,
        }
    }
}

impl TryFrom<JobState> for JobOutcome {
    type Error = JobState;

    fn try_from(state: JobState) -> Result<Self, Self::Error> {
        match state {
            JobState::Success => Ok(JobOutcome::Success),
            JobState::Failed => Ok(JobOutcome::Failed),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            JobState::Pending,
            JobState::Running,
            JobState::Success,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>(), Ok(state));
        }
        assert!("cancelled".parse::<JobState>().is_err());
    }

    #[test]
    fn test_outcome_conversion() {
        assert_eq!(JobState::from(JobOutcome::Failed), JobState::Failed);
        assert_eq!(
            JobOutcome::try_from(JobState::Success),
            Ok(JobOutcome::Success)
        );
        assert_eq!(
            JobOutcome::try_from(JobState::Running),
            Err(JobState::Running)
        );
    }

    #[test]
    fn test_pending_job_is_not_writable() {
        let mut job = Job::pending(serde_json::json!({ "script": "make" }));
        assert!(!job.is_writable());

        job.state = JobState::Running;
        assert!(job.is_writable());

        job.erased = true;
        assert!(!job.is_writable());
    }

    #[test]
    fn test_token_is_not_serialized() {
        let mut job = Job::pending(serde_json::Value::Null);
        job.token = Some(JobToken::generate());

        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("token").is_none());
        assert_eq!(json["state"], "pending");
    }
}
