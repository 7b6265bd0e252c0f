//! Job DTOs for the poll and state update cycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::JobState;
use crate::domain::token::JobToken;
use crate::dto::runner::RunnerInfo;

/// Poll request sent by a runner looking for work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestJob {
    /// Runner credential
    pub token: String,

    /// Marker echoed from the previous no-work response
    #[serde(default)]
    pub last_update: Option<String>,

    #[serde(default)]
    pub info: Option<RunnerInfo>,
}

/// Job handed to a runner when a poll claims work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: Uuid,

    /// Job-scoped credential for trace and artifact calls
    pub token: JobToken,

    pub payload: serde_json::Value,

    /// Upper bound for artifact uploads, when artifacts are enabled
    pub artifacts_max_size: Option<u64>,

    pub started_at: Option<DateTime<Utc>>,
}

/// Trace chunk piggybacked on a state update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSnippet {
    pub offset: u64,
    pub content: String,
}

/// State update sent by the runner that owns a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateJob {
    /// Runner credential
    pub token: String,

    /// New state; `running` acts as a keep-alive
    pub state: JobState,

    #[serde(default)]
    pub trace: Option<TraceSnippet>,
}

/// Acknowledgement of a state update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUpdated {
    pub id: Uuid,
    pub state: JobState,
    pub trace_length: u64,
}
