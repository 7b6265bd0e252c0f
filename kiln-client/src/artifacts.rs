//! Artifact endpoints

use std::time::Duration;

use crate::CoordinatorClient;
use crate::error::{ClientError, Result};
use kiln_core::dto::JOB_TOKEN_HEADER;
use kiln_core::dto::artifact::{ArtifactDescriptor, ArtifactPermit, FILE_FIELD, METADATA_FIELD};
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use reqwest::multipart::{Form, Part};
use uuid::Uuid;

/// Result of an artifact download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactDownload {
    /// Archive bytes served by the coordinator
    Inline(Vec<u8>),
    /// The archive is served from this location
    Redirect(String),
}

impl CoordinatorClient {
    // =============================================================================
    // Artifacts
    // =============================================================================

    /// Ask whether an upload of `size` bytes would be accepted
    pub async fn authorize_artifacts(
        &self,
        job_id: Uuid,
        job_token: &str,
        size: Option<u64>,
    ) -> Result<ArtifactPermit> {
        let url = format!("{}/api/v1/jobs/{}/artifacts/authorize", self.base_url, job_id);
        let mut request = self.client.post(&url).header(JOB_TOKEN_HEADER, job_token);
        if let Some(size) = size {
            request = request.query(&[("artifact_size", size)]);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Upload the archive and its metadata, replacing any previous bundle
    pub async fn upload_artifacts(
        &self,
        job_id: Uuid,
        job_token: &str,
        file_name: &str,
        archive: Vec<u8>,
        metadata: Vec<u8>,
        expire_in: Option<Duration>,
    ) -> Result<ArtifactDescriptor> {
        let url = format!("{}/api/v1/jobs/{}/artifacts", self.base_url, job_id);

        let form = Form::new()
            .part(
                FILE_FIELD,
                Part::bytes(archive).file_name(file_name.to_string()),
            )
            .part(
                METADATA_FIELD,
                Part::bytes(metadata).file_name("metadata.gz"),
            );

        let mut request = self
            .client
            .post(&url)
            .header(JOB_TOKEN_HEADER, job_token)
            .multipart(form);
        if let Some(expire_in) = expire_in {
            request = request.query(&[("expire_in", expire_in.as_secs())]);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Download the archive
    ///
    /// Redirects are reported rather than followed.
    pub async fn download_artifacts(
        &self,
        job_id: Uuid,
        job_token: &str,
    ) -> Result<ArtifactDownload> {
        let url = format!("{}/api/v1/jobs/{}/artifacts", self.base_url, job_id);
        let response = self
            .client
            .get(&url)
            .header(JOB_TOKEN_HEADER, job_token)
            .send()
            .await?;

        if response.status() == StatusCode::FOUND {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ClientError::ParseError("redirect without Location".to_string()))?;
            return Ok(ArtifactDownload::Redirect(location.to_string()));
        }

        let response = self.check_status(response).await?;
        Ok(ArtifactDownload::Inline(response.bytes().await?.to_vec()))
    }

    /// Erase the bundle of a job; repeating the call is harmless
    pub async fn erase_artifacts(&self, job_id: Uuid, job_token: &str) -> Result<()> {
        let url = format!("{}/api/v1/jobs/{}/artifacts", self.base_url, job_id);
        let response = self
            .client
            .delete(&url)
            .header(JOB_TOKEN_HEADER, job_token)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
