//! Artifact DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::artifact::ArtifactBundle;

/// Pre-flight permission for an artifact upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPermit {
    pub job_id: Uuid,

    /// Ceiling the actual upload is checked against
    pub max_size: u64,

    /// Size the runner announced, echoed back (advisory only)
    pub declared_size: Option<u64>,
}

/// Query parameters accepted by the authorize call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizeQuery {
    #[serde(default)]
    pub artifact_size: Option<u64>,
}

/// Query parameters accepted by the upload call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadQuery {
    /// Expiry in seconds from now; the coordinator default applies when absent
    #[serde(default)]
    pub expire_in: Option<u64>,
}

/// Description of a stored artifact bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub job_id: Uuid,
    pub file_name: String,
    pub size: u64,
    pub metadata_size: u64,
    pub expire_at: Option<DateTime<Utc>>,
}

impl From<ArtifactBundle> for ArtifactDescriptor {
    fn from(bundle: ArtifactBundle) -> Self {
        Self {
            job_id: bundle.job_id,
            file_name: bundle.file_name,
            size: bundle.file_size,
            metadata_size: bundle.metadata_size,
            expire_at: bundle.expire_at,
        }
    }
}

/// Multipart field holding the primary archive
pub const FILE_FIELD: &str = "file";

/// Multipart field holding the metadata file
pub const METADATA_FIELD: &str = "metadata";
