//! API Module
//!
//! HTTP surface of the runner protocol.
//! Each submodule handles endpoints for one protocol component.

pub mod artifact;
pub mod error;
pub mod health;
pub mod job;
pub mod runner;
pub mod trace;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderMap,
    routing::{delete, get, patch, post, put},
};
use kiln_core::dto::JOB_TOKEN_HEADER;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.upload_body_limit());

    let v1 = Router::new()
        // Runner endpoints
        .route("/runners/verify", post(runner::verify_runner))
        // Job endpoints
        .route("/jobs/request", post(job::request_job))
        .route("/jobs/{id}", put(job::update_job))
        // Trace endpoints
        .route("/jobs/{id}/trace", patch(trace::append_trace))
        .route("/jobs/{id}/trace", get(trace::get_trace))
        // Artifact endpoints
        .route(
            "/jobs/{id}/artifacts/authorize",
            post(artifact::authorize_artifacts),
        )
        .route(
            "/jobs/{id}/artifacts",
            post(artifact::upload_artifacts).layer(upload_limit),
        )
        .route("/jobs/{id}/artifacts", get(artifact::download_artifacts))
        .route("/jobs/{id}/artifacts", delete(artifact::erase_artifacts));

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .nest("/api/v1", v1)
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Job-scoped credential sent with trace and artifact calls
pub(crate) fn job_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(JOB_TOKEN_HEADER).and_then(|v| v.to_str().ok())
}
