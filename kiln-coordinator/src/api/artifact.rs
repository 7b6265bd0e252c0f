//! Artifact API Handlers
//!
//! HTTP endpoints for the artifact lifecycle of a job: pre-flight
//! authorization, multipart upload, download and erasure.

use std::time::Duration;

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use kiln_core::dto::artifact::{
    ArtifactDescriptor, ArtifactPermit, AuthorizeQuery, FILE_FIELD, METADATA_FIELD, UploadQuery,
};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::api::job_token;
use crate::service::{Download, UploadFile};
use crate::state::AppState;

/// POST /api/v1/jobs/{id}/artifacts/authorize
/// Pre-flight check; the size comes from `artifact_size` or `Content-Length`
pub async fn authorize_artifacts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AuthorizeQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<ArtifactPermit>> {
    let declared_size = query.artifact_size.or_else(|| {
        headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|size| *size > 0)
    });

    let permit = state
        .artifacts
        .authorize(id, job_token(&headers), declared_size)
        .await?;

    Ok(Json(permit))
}

/// POST /api/v1/jobs/{id}/artifacts
/// Upload the archive (`file` part) and its `metadata` part
pub async fn upload_artifacts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<ArtifactDescriptor>)> {
    let mut archive = None;
    let mut metadata = None;

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let file_name = field.file_name().unwrap_or(name.as_str()).to_string();

        match name.as_str() {
            FILE_FIELD => {
                let data = field.bytes().await?;
                archive = Some(UploadFile {
                    file_name,
                    data: data.to_vec(),
                });
            }
            METADATA_FIELD => {
                let data = field.bytes().await?;
                metadata = Some(UploadFile {
                    file_name,
                    data: data.to_vec(),
                });
            }
            other => tracing::debug!("Ignoring multipart field {} for job {}", other, id),
        }
    }

    let archive = archive.ok_or_else(|| {
        ApiError::BadRequest(format!("multipart field '{}' is required", FILE_FIELD))
    })?;

    let bundle = state
        .artifacts
        .store(
            id,
            job_token(&headers),
            archive,
            metadata,
            query.expire_in.map(Duration::from_secs),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ArtifactDescriptor::from(bundle))))
}

/// GET /api/v1/jobs/{id}/artifacts
/// Download the archive, or a redirect to where it is served from
pub async fn download_artifacts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let download = state.artifacts.fetch(id, job_token(&headers)).await?;

    let response = match download {
        Download::Inline { file_name, data } => {
            let disposition = HeaderValue::from_str(&format!(
                "attachment; filename=\"{}\"",
                file_name.replace('"', "")
            ))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

            (
                StatusCode::OK,
                [
                    (
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("application/octet-stream"),
                    ),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                data,
            )
                .into_response()
        }
        Download::Redirect(url) => {
            let location = HeaderValue::from_str(&url)
                .map_err(|e| ApiError::BadRequest(format!("unencodable redirect: {}", e)))?;
            (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
        }
    };

    Ok(response)
}

/// DELETE /api/v1/jobs/{id}/artifacts
/// Erase the bundle; repeating the call is harmless
pub async fn erase_artifacts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.artifacts.erase(id, job_token(&headers)).await?;
    Ok(StatusCode::NO_CONTENT)
}
