//! Structured error bodies
//!
//! Every failure response carries a stable reason code so runners can react
//! without parsing messages.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::job::JobState;

/// Machine-readable failure reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Unauthorized,
    InactiveRunner,
    Erased,
    NotRunning,
    NotFound,
    Conflict,
    RangeConflict,
    MissingRangeHeader,
    PayloadTooLarge,
    NotAllowed,
    ValidationFailed,
    Internal,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Unauthorized => "unauthorized",
            ReasonCode::InactiveRunner => "inactive_runner",
            ReasonCode::Erased => "erased",
            ReasonCode::NotRunning => "not_running",
            ReasonCode::NotFound => "not_found",
            ReasonCode::Conflict => "conflict",
            ReasonCode::RangeConflict => "range_conflict",
            ReasonCode::MissingRangeHeader => "missing_range_header",
            ReasonCode::PayloadTooLarge => "payload_too_large",
            ReasonCode::NotAllowed => "not_allowed",
            ReasonCode::ValidationFailed => "validation_failed",
            ReasonCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body of every error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ReasonCode,
    pub message: String,

    /// Authoritative trace length, present on range conflicts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_length: Option<u64>,

    /// Job state when the failure was caused by it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_status: Option<JobState>,
}
