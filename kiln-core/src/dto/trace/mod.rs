//! Trace DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::JobState;

/// Receipt returned for an accepted trace append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceAppended {
    pub job_id: Uuid,

    /// Total trace length after the append
    pub length: u64,

    /// Current job state, so a runner notices external changes mid-stream
    pub job_status: JobState,
}
