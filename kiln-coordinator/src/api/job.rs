//! Job API Handlers
//!
//! HTTP endpoints for the poll and state update cycle.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use kiln_core::domain::job::{JobOutcome, JobState};
use kiln_core::domain::marker::PollMarker;
use kiln_core::dto::LAST_UPDATE_HEADER;
use kiln_core::dto::job::{JobDescriptor, JobUpdated, RequestJob, UpdateJob};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::error::ProtocolError;
use crate::service::PollOutcome;
use crate::state::AppState;

// =============================================================================
// Polling
// =============================================================================

/// POST /api/v1/jobs/request
/// Claim the oldest pending job, or report that there is nothing to do
///
/// - 201 with a job descriptor when a job was assigned
/// - 204 with a `Last-Update` marker when there is no work
/// - 304 when the echoed marker is still current
pub async fn request_job(
    State(state): State<AppState>,
    Json(req): Json<RequestJob>,
) -> ApiResult<Response> {
    let runner = state
        .runners
        .authenticate(Some(req.token.as_str()), req.info)
        .await?;

    let last_marker = req.last_update.map(PollMarker::from);
    let outcome = state.dispatcher.poll(&runner, last_marker.as_ref()).await?;

    let response = match outcome {
        PollOutcome::Assigned { job, token } => {
            let policy = state.artifacts.policy();
            let descriptor = JobDescriptor {
                id: job.id,
                token,
                payload: job.payload,
                artifacts_max_size: policy.enabled.then_some(policy.max_size),
                started_at: job.started_at,
            };
            (StatusCode::CREATED, Json(descriptor)).into_response()
        }
        PollOutcome::NoWork { marker } => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            let value = HeaderValue::from_str(marker.as_str())
                .map_err(|e| ApiError::BadRequest(format!("unencodable marker: {}", e)))?;
            response.headers_mut().insert(LAST_UPDATE_HEADER, value);
            response
        }
        PollOutcome::NotModified => StatusCode::NOT_MODIFIED.into_response(),
    };

    Ok(response)
}

// =============================================================================
// State Updates
// =============================================================================

/// PUT /api/v1/jobs/{id}
/// Report progress or the final outcome of a job owned by the runner
///
/// `state: running` acts as a keep-alive. A trace snippet, if present, is
/// appended before the state change under the usual offset rules.
pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateJob>,
) -> ApiResult<Json<JobUpdated>> {
    let runner = state
        .runners
        .authenticate(Some(req.token.as_str()), None)
        .await?;

    let job = match JobOutcome::try_from(req.state) {
        Ok(outcome) => {
            // A repeated completion finds the job already finished; the
            // snippet is then skipped and completion reports the result
            if let Some(snippet) = &req.trace {
                match state.dispatcher.keep_alive(&runner, id).await {
                    Ok(_) => {
                        state
                            .traces
                            .append_unchecked(id, snippet.offset, snippet.content.as_bytes())
                            .await?;
                    }
                    Err(ProtocolError::Conflict(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            state.dispatcher.complete(&runner, id, outcome).await?
        }
        Err(JobState::Running) => {
            let mut job = state.dispatcher.keep_alive(&runner, id).await?;
            if let Some(snippet) = &req.trace {
                let accepted = state
                    .traces
                    .append_unchecked(id, snippet.offset, snippet.content.as_bytes())
                    .await?;
                job.trace_length = accepted.length;
            }
            job
        }
        Err(other) => {
            return Err(ApiError::BadRequest(format!(
                "a runner cannot move a job to {}",
                other
            )));
        }
    };

    tracing::debug!("Job {} updated by runner {}: {}", id, runner.id, job.state);

    Ok(Json(JobUpdated {
        id: job.id,
        state: job.state,
        trace_length: job.trace_length,
    }))
}
