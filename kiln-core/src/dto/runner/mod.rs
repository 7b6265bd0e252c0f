//! Runner DTOs
//!
//! Data transfer objects for runner-related operations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata a runner reports about itself on authenticated calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerInfo {
    /// Agent version string
    #[serde(default)]
    pub version: Option<String>,

    /// Capability flags (e.g. "artifacts", "trace")
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Request to verify a runner credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRunner {
    pub token: String,

    #[serde(default)]
    pub info: Option<RunnerInfo>,
}

/// Response to a successful verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedRunner {
    pub id: Uuid,
    pub description: String,
}
