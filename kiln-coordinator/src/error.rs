//! Protocol errors
//!
//! One taxonomy shared by the runner gate, dispatcher, trace channel and
//! artifact gate. Every variant maps to a stable [`ReasonCode`].

use kiln_core::domain::job::JobState;
use kiln_core::dto::error::ReasonCode;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::StoreError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Missing, malformed or unknown credential
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Known runner credential, but the runner is paused
    #[error("runner {0} is not active")]
    InactiveRunner(Uuid),

    #[error("job {job_id} has been erased")]
    Erased { job_id: Uuid, job_status: JobState },

    #[error("job {job_id} is not running (state: {job_status})")]
    NotRunning { job_id: Uuid, job_status: JobState },

    #[error("{0} not found")]
    NotFound(String),

    /// State transition rejected
    #[error("conflict: {0}")]
    Conflict(String),

    /// Declared trace offset differs from the current length
    #[error("range conflict: current trace length is {current_length}")]
    RangeConflict {
        current_length: u64,
        job_status: JobState,
    },

    #[error("payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// Feature administratively disabled
    #[error("{0}")]
    NotAllowed(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("internal error: {0}")]
    Internal(#[from] StoreError),
}

impl ProtocolError {
    pub fn reason(&self) -> ReasonCode {
        match self {
            ProtocolError::Unauthorized(_) => ReasonCode::Unauthorized,
            ProtocolError::InactiveRunner(_) => ReasonCode::InactiveRunner,
            ProtocolError::Erased { .. } => ReasonCode::Erased,
            ProtocolError::NotRunning { .. } => ReasonCode::NotRunning,
            ProtocolError::NotFound(_) => ReasonCode::NotFound,
            ProtocolError::Conflict(_) => ReasonCode::Conflict,
            ProtocolError::RangeConflict { .. } => ReasonCode::RangeConflict,
            ProtocolError::PayloadTooLarge { .. } => ReasonCode::PayloadTooLarge,
            ProtocolError::NotAllowed(_) => ReasonCode::NotAllowed,
            ProtocolError::ValidationFailed(_) => ReasonCode::ValidationFailed,
            ProtocolError::Internal(_) => ReasonCode::Internal,
        }
    }

    /// Job state attached to state-dependent failures
    pub fn job_status(&self) -> Option<JobState> {
        match self {
            ProtocolError::Erased { job_status, .. }
            | ProtocolError::NotRunning { job_status, .. }
            | ProtocolError::RangeConflict { job_status, .. } => Some(*job_status),
            _ => None,
        }
    }

    pub fn job_not_found(job_id: Uuid) -> Self {
        ProtocolError::NotFound(format!("job {}", job_id))
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        let err = ProtocolError::RangeConflict {
            current_length: 100,
            job_status: JobState::Running,
        };
        assert_eq!(err.reason(), ReasonCode::RangeConflict);
        assert_eq!(err.job_status(), Some(JobState::Running));

        let err = ProtocolError::from(StoreError::Corrupt("bad".to_string()));
        assert_eq!(err.reason(), ReasonCode::Internal);
        assert_eq!(err.job_status(), None);
    }
}
