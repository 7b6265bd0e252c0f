//! Runner API Handlers
//!
//! HTTP endpoints for runner credential checks.

use axum::{Json, extract::State};
use kiln_core::dto::runner::{VerifiedRunner, VerifyRunner};

use crate::api::error::ApiResult;
use crate::state::AppState;

/// POST /api/v1/runners/verify
/// Check a runner credential, typically at runner startup
pub async fn verify_runner(
    State(state): State<AppState>,
    Json(req): Json<VerifyRunner>,
) -> ApiResult<Json<VerifiedRunner>> {
    let identity = state
        .runners
        .authenticate(Some(req.token.as_str()), req.info)
        .await?;

    tracing::debug!("Runner {} verified", identity.id);

    Ok(Json(VerifiedRunner {
        id: identity.id,
        description: identity.description,
    }))
}
