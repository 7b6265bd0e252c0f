//! Trace API Handlers
//!
//! HTTP endpoints for incremental trace upload. Appends follow HTTP range
//! semantics: the coordinator always answers with the acceptable range
//! `0-<length>` so a runner can resynchronize after a conflict.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use kiln_core::domain::trace::{ContentRange, accepted_range};
use kiln_core::dto::JOB_STATUS_HEADER;
use kiln_core::dto::trace::TraceAppended;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::api::job_token;
use crate::service::Accepted;
use crate::state::AppState;

/// PATCH /api/v1/jobs/{id}/trace
/// Append a chunk declared by `Content-Range: <start>-<end>`
///
/// An empty body with no range reports the current length without writing.
pub async fn append_trace(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let token = job_token(&headers);

    let range = headers
        .get(header::CONTENT_RANGE)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| ApiError::MissingRangeHeader("Content-Range is not ASCII".to_string()))
                .and_then(|raw| {
                    raw.parse::<ContentRange>().map_err(|e| {
                        ApiError::MissingRangeHeader(format!("invalid Content-Range: {}", e))
                    })
                })
        })
        .transpose()?;

    let accepted = match range {
        Some(range) => state.traces.append_range(id, token, range, &body).await?,
        None if body.is_empty() => state.traces.status(id, token).await?,
        None => {
            return Err(ApiError::MissingRangeHeader(
                "Content-Range header is required".to_string(),
            ));
        }
    };

    Ok(accepted_response(id, accepted))
}

/// GET /api/v1/jobs/{id}/trace
/// Read back the full trace
pub async fn get_trace(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let trace = state.traces.read(id, job_token(&headers)).await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        trace,
    )
        .into_response())
}

fn accepted_response(job_id: Uuid, accepted: Accepted) -> Response {
    let receipt = TraceAppended {
        job_id,
        length: accepted.length,
        job_status: accepted.job_status,
    };
    let mut response = (StatusCode::ACCEPTED, Json(receipt)).into_response();

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&accepted_range(accepted.length)) {
        headers.insert(header::RANGE, value);
    }
    headers.insert(
        JOB_STATUS_HEADER,
        HeaderValue::from_static(accepted.job_status.as_str()),
    );

    response
}
