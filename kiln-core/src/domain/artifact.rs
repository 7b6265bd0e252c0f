//! Artifact domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata of the artifact bundle stored for a job
///
/// The bytes themselves live in the blob store under [`BlobKey`]s derived
/// from the job id and the upload id. Each upload writes fresh keys, so a
/// replacement never touches the blobs of the bundle it replaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub job_id: Uuid,
    pub upload_id: Uuid,
    /// Original file name of the primary archive
    pub file_name: String,
    pub file_size: u64,
    pub metadata_size: u64,
    pub expire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactBundle {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|at| at <= now)
    }

    pub fn archive_key(&self) -> BlobKey {
        BlobKey::archive(self.job_id, self.upload_id)
    }

    pub fn metadata_key(&self) -> BlobKey {
        BlobKey::metadata(self.job_id, self.upload_id)
    }

    pub fn keys(&self) -> [BlobKey; 2] {
        [self.archive_key(), self.metadata_key()]
    }
}

/// Which file of a bundle a blob holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Archive,
    Metadata,
}

impl BlobKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            BlobKind::Archive => "archive",
            BlobKind::Metadata => "metadata",
        }
    }
}

/// Address of a blob in the blob store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobKey {
    pub job_id: Uuid,
    pub upload_id: Uuid,
    pub kind: BlobKind,
}

impl BlobKey {
    pub fn archive(job_id: Uuid, upload_id: Uuid) -> Self {
        Self {
            job_id,
            upload_id,
            kind: BlobKind::Archive,
        }
    }

    pub fn metadata(job_id: Uuid, upload_id: Uuid) -> Self {
        Self {
            job_id,
            upload_id,
            kind: BlobKind::Metadata,
        }
    }

    /// Relative path `<job_id>/<upload_id>/<kind>`
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.job_id,
            self.upload_id,
            self.kind.file_name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut bundle = ArtifactBundle {
            job_id: Uuid::new_v4(),
            upload_id: Uuid::new_v4(),
            file_name: "build.zip".to_string(),
            file_size: 10,
            metadata_size: 2,
            expire_at: None,
            created_at: now,
        };
        assert!(!bundle.is_expired(now));

        bundle.expire_at = Some(now - Duration::seconds(1));
        assert!(bundle.is_expired(now));

        bundle.expire_at = Some(now + Duration::hours(1));
        assert!(!bundle.is_expired(now));
    }

    #[test]
    fn test_blob_paths() {
        let job_id = Uuid::new_v4();
        let upload_id = Uuid::new_v4();
        assert_eq!(
            BlobKey::archive(job_id, upload_id).path(),
            format!("{}/{}/archive", job_id, upload_id)
        );
        assert_eq!(
            BlobKey::metadata(job_id, upload_id).path(),
            format!("{}/{}/metadata", job_id, upload_id)
        );
    }
}
