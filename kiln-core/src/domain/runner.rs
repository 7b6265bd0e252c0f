//! Runner domain model
//!
//! Represents a provisioned runner that polls the coordinator for jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::token::RunnerToken;

/// A provisioned runner
#[derive(Debug, Clone, Serialize)]
pub struct Runner {
    /// Unique identifier for the runner
    pub id: Uuid,

    /// Credential the runner authenticates with
    #[serde(skip_serializing)]
    pub token: RunnerToken,

    /// Human readable description
    pub description: String,

    /// Paused runners keep their credential but are refused work
    pub active: bool,

    /// Self-reported capability flags (e.g. "artifacts", "trace")
    pub capabilities: Vec<String>,

    /// Self-reported agent version
    pub version: Option<String>,

    /// When this runner was provisioned
    pub registered_at: DateTime<Utc>,

    /// Last time this runner made an authenticated call
    pub contacted_at: Option<DateTime<Utc>>,
}

impl Runner {
    /// Creates a new active runner for a pre-provisioned token
    pub fn provisioned(token: RunnerToken, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            description: description.into(),
            active: true,
            capabilities: Vec::new(),
            version: None,
            registered_at: Utc::now(),
            contacted_at: None,
        }
    }

    pub fn identity(&self) -> RunnerIdentity {
        RunnerIdentity {
            id: self.id,
            description: self.description.clone(),
        }
    }
}

/// Proof that a runner credential was verified
///
/// Handed out by the runner gate and required by dispatcher operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerIdentity {
    pub id: Uuid,
    pub description: String,
}
