//! Polling and job state endpoints

use crate::CoordinatorClient;
use crate::error::{ClientError, Result};
use kiln_core::domain::job::JobState;
use kiln_core::dto::LAST_UPDATE_HEADER;
use kiln_core::dto::job::{JobDescriptor, JobUpdated, RequestJob, TraceSnippet, UpdateJob};
use kiln_core::dto::runner::RunnerInfo;
use reqwest::StatusCode;
use uuid::Uuid;

/// Answer to a poll
#[derive(Debug, Clone)]
pub enum PollResponse {
    /// A job was claimed for this runner
    Assigned(JobDescriptor),
    /// Nothing to do; `marker` must be echoed on the next poll
    NoWork { marker: String },
    /// Nothing changed since the echoed marker
    NotModified,
}

/// Marker bookkeeping between polls
///
/// Remembers the last no-work marker so the next poll can echo it, and
/// forgets it once a job is assigned.
#[derive(Debug, Clone, Default)]
pub struct PollState {
    last_update: Option<String>,
}

impl PollState {
    pub fn last_update(&self) -> Option<&str> {
        self.last_update.as_deref()
    }

    fn observe(&mut self, response: &PollResponse) {
        match response {
            PollResponse::Assigned(_) => self.last_update = None,
            PollResponse::NoWork { marker } => self.last_update = Some(marker.clone()),
            PollResponse::NotModified => {}
        }
    }
}

impl CoordinatorClient {
    // =============================================================================
    // Polling
    // =============================================================================

    /// Ask for the oldest pending job
    ///
    /// The marker held in `state` is echoed and updated from the response.
    pub async fn request_job(
        &self,
        token: &str,
        state: &mut PollState,
        info: Option<RunnerInfo>,
    ) -> Result<PollResponse> {
        let url = format!("{}/api/v1/jobs/request", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RequestJob {
                token: token.to_string(),
                last_update: state.last_update.clone(),
                info,
            })
            .send()
            .await?;

        let poll = match response.status() {
            StatusCode::NO_CONTENT => {
                let marker = response
                    .headers()
                    .get(LAST_UPDATE_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        ClientError::ParseError("no-work response without marker".to_string())
                    })?;
                PollResponse::NoWork {
                    marker: marker.to_string(),
                }
            }
            StatusCode::NOT_MODIFIED => PollResponse::NotModified,
            _ => PollResponse::Assigned(self.handle_response(response).await?),
        };

        state.observe(&poll);
        Ok(poll)
    }

    // =============================================================================
    // State Updates
    // =============================================================================

    /// Report the state of a job owned by this runner
    ///
    /// `JobState::Running` acts as a keep-alive; `Success` and `Failed` finish
    /// the job. A trace snippet is appended first under the usual offset rules.
    pub async fn update_job(
        &self,
        job_id: Uuid,
        token: &str,
        state: JobState,
        trace: Option<TraceSnippet>,
    ) -> Result<JobUpdated> {
        let url = format!("{}/api/v1/jobs/{}", self.base_url, job_id);
        let response = self
            .client
            .put(&url)
            .json(&UpdateJob {
                token: token.to_string(),
                state,
                trace,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
