//! Artifact Gate
//!
//! Authorize, store, fetch and erase the artifact bundle of a job. Every call
//! is authenticated with the job token minted at claim time. Store, fetch and
//! erase of the same job are serialized through [`JobLocks`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kiln_core::domain::artifact::{ArtifactBundle, BlobKey};
use kiln_core::domain::job::{Job, JobState};
use kiln_core::dto::artifact::ArtifactPermit;
use uuid::Uuid;

use crate::error::{ProtocolError, Result};
use crate::gate::verify_job_token;
use crate::repository::{BlobStore, JobStore};
use crate::service::locks::JobLocks;

/// Administrative artifact settings
#[derive(Debug, Clone)]
pub struct ArtifactPolicy {
    pub enabled: bool,
    /// Ceiling for the primary archive, in bytes
    pub max_size: u64,
    pub default_expiry: Duration,
}

impl Default for ArtifactPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 100 * 1024 * 1024,
            default_expiry: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// One file of an upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Where a stored archive can be read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    Inline {
        file_name: String,
        data: Vec<u8>,
    },
    Redirect(String),
}

#[derive(Clone)]
pub struct ArtifactGate {
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    locks: JobLocks,
    policy: ArtifactPolicy,
}

impl ArtifactGate {
    pub fn new(jobs: Arc<dyn JobStore>, blobs: Arc<dyn BlobStore>, policy: ArtifactPolicy) -> Self {
        Self {
            jobs,
            blobs,
            locks: JobLocks::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &ArtifactPolicy {
        &self.policy
    }

    /// Pre-flight check before an upload; performs no storage
    pub async fn authorize(
        &self,
        job_id: Uuid,
        job_token: Option<&str>,
        declared_size: Option<u64>,
    ) -> Result<ArtifactPermit> {
        self.ensure_enabled()?;
        let job = self.authenticated_job(job_id, job_token).await?;
        ensure_writable(&job)?;

        if let Some(size) = declared_size {
            self.ensure_within_limit(size)?;
        }

        Ok(ArtifactPermit {
            job_id,
            max_size: self.policy.max_size,
            declared_size,
        })
    }

    /// Stores (or replaces) the bundle of a running job
    ///
    /// The archive size is checked against the ceiling here regardless of
    /// what was declared to [`ArtifactGate::authorize`].
    pub async fn store(
        &self,
        job_id: Uuid,
        job_token: Option<&str>,
        archive: UploadFile,
        metadata: Option<UploadFile>,
        expire_in: Option<Duration>,
    ) -> Result<ArtifactBundle> {
        self.ensure_enabled()?;
        let _guard = self.locks.lock(job_id).await;

        let job = self.authenticated_job(job_id, job_token).await?;
        ensure_writable(&job)?;
        self.ensure_within_limit(archive.data.len() as u64)?;

        validate_file_name(&archive.file_name)?;
        if archive.data.is_empty() {
            return Err(ProtocolError::ValidationFailed(
                "artifact archive is empty".to_string(),
            ));
        }
        let metadata = metadata.ok_or_else(|| {
            ProtocolError::ValidationFailed("artifact metadata is missing".to_string())
        })?;

        let expiry = expire_in.unwrap_or(self.policy.default_expiry);
        let expiry = chrono::Duration::from_std(expiry)
            .map_err(|_| ProtocolError::ValidationFailed("expiry is out of range".to_string()))?;
        let now = Utc::now();
        let expire_at = now
            .checked_add_signed(expiry)
            .ok_or_else(|| ProtocolError::ValidationFailed("expiry is out of range".to_string()))?;

        let bundle = ArtifactBundle {
            job_id,
            upload_id: Uuid::new_v4(),
            file_name: archive.file_name,
            file_size: archive.data.len() as u64,
            metadata_size: metadata.data.len() as u64,
            expire_at: Some(expire_at),
            created_at: now,
        };
        let previous = self.jobs.artifacts(job_id).await?;

        // Fresh keys per upload; the previous bundle stays readable until the
        // new record is committed
        if let Err(e) = self.write_blobs(&bundle, &archive.data, &metadata.data).await {
            self.discard_blobs(&bundle).await;
            return Err(e);
        }

        if !self.jobs.save_artifacts(&bundle).await? {
            // The job changed state between the check and the record
            self.discard_blobs(&bundle).await;
            let job = self
                .jobs
                .get(job_id)
                .await?
                .ok_or_else(|| ProtocolError::job_not_found(job_id))?;
            ensure_writable(&job)?;
            return Err(ProtocolError::ValidationFailed(format!(
                "artifact record for job {} was rejected",
                job_id
            )));
        }

        if let Some(previous) = previous {
            self.discard_blobs(&previous).await;
        }

        tracing::info!(
            "Stored artifacts for job {} ({} bytes, expires {})",
            job_id,
            bundle.file_size,
            expire_at
        );
        Ok(bundle)
    }

    /// Returns the archive inline, or a redirect when the blob store is
    /// externally addressable
    pub async fn fetch(&self, job_id: Uuid, job_token: Option<&str>) -> Result<Download> {
        self.ensure_enabled()?;
        let _guard = self.locks.lock(job_id).await;

        let job = self.authenticated_job(job_id, job_token).await?;
        if job.erased {
            return Err(ProtocolError::NotFound(format!(
                "artifacts of job {} (erased)",
                job_id
            )));
        }

        let bundle = self
            .jobs
            .artifacts(job_id)
            .await?
            .filter(|b| !b.is_expired(Utc::now()))
            .ok_or_else(|| ProtocolError::NotFound(format!("artifacts of job {}", job_id)))?;

        let key = bundle.archive_key();
        if let Some(url) = self.blobs.public_url(&key) {
            if !self.blobs.exists(&key).await? {
                return Err(self.missing_blob(&key));
            }
            return Ok(Download::Redirect(url));
        }

        match self.blobs.get(&key).await? {
            Some(data) => Ok(Download::Inline {
                file_name: bundle.file_name,
                data,
            }),
            None => Err(self.missing_blob(&key)),
        }
    }

    /// Removes both files and marks the job erased
    ///
    /// Erasing an already erased job succeeds again with the same result.
    pub async fn erase(&self, job_id: Uuid, job_token: Option<&str>) -> Result<()> {
        let guard = self.locks.lock(job_id).await;

        self.authenticated_job(job_id, job_token).await?;

        if let Some(bundle) = self.jobs.artifacts(job_id).await? {
            for key in bundle.keys() {
                self.blobs.delete(&key).await?;
            }
        }

        if !self.jobs.erase(job_id).await? {
            return Err(ProtocolError::job_not_found(job_id));
        }

        drop(guard);
        self.locks.prune_idle();

        tracing::info!("Job {} erased", job_id);
        Ok(())
    }

    fn ensure_enabled(&self) -> Result<()> {
        if !self.policy.enabled {
            return Err(ProtocolError::NotAllowed(
                "artifact handling is disabled".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_within_limit(&self, size: u64) -> Result<()> {
        if size > self.policy.max_size {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                limit: self.policy.max_size,
            });
        }
        Ok(())
    }

    async fn authenticated_job(&self, job_id: Uuid, job_token: Option<&str>) -> Result<Job> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| ProtocolError::job_not_found(job_id))?;
        verify_job_token(&job, job_token)?;
        Ok(job)
    }

    async fn write_blobs(
        &self,
        bundle: &ArtifactBundle,
        archive: &[u8],
        metadata: &[u8],
    ) -> Result<()> {
        self.blobs.put(&bundle.archive_key(), archive).await?;
        self.blobs.put(&bundle.metadata_key(), metadata).await?;
        Ok(())
    }

    /// Best-effort removal of the blobs of one upload
    async fn discard_blobs(&self, bundle: &ArtifactBundle) {
        for key in bundle.keys() {
            if let Err(e) = self.blobs.delete(&key).await {
                tracing::warn!("Failed to discard blob {}: {}", key.path(), e);
            }
        }
    }

    fn missing_blob(&self, key: &BlobKey) -> ProtocolError {
        tracing::warn!("Artifact metadata present but blob {} is missing", key.path());
        ProtocolError::NotFound(format!("artifact blob {}", key.path()))
    }
}

fn ensure_writable(job: &Job) -> Result<()> {
    if job.erased {
        return Err(ProtocolError::Erased {
            job_id: job.id,
            job_status: job.state,
        });
    }
    if job.state != JobState::Running {
        return Err(ProtocolError::NotRunning {
            job_id: job.id,
            job_status: job.state,
        });
    }
    Ok(())
}

fn validate_file_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(ProtocolError::ValidationFailed(format!(
            "invalid artifact file name {:?}",
            name
        )));
    }
    Ok(())
}
