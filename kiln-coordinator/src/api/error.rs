//! API Error Handling
//!
//! Renders protocol failures as JSON bodies carrying a stable reason code.

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use kiln_core::domain::trace::accepted_range;
use kiln_core::dto::JOB_STATUS_HEADER;
use kiln_core::dto::error::{ErrorBody, ReasonCode};

use crate::error::ProtocolError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    Protocol(ProtocolError),
    /// Trace append without a usable `Content-Range` header
    MissingRangeHeader(String),
    /// Malformed request the protocol core never saw
    BadRequest(String),
    /// Request body rejected by the transport size limit
    BodyTooLarge(String),
}

impl ApiError {
    fn reason(&self) -> ReasonCode {
        match self {
            ApiError::Protocol(err) => err.reason(),
            ApiError::MissingRangeHeader(_) => ReasonCode::MissingRangeHeader,
            ApiError::BadRequest(_) => ReasonCode::ValidationFailed,
            ApiError::BodyTooLarge(_) => ReasonCode::PayloadTooLarge,
        }
    }
}

pub fn status_for(reason: ReasonCode) -> StatusCode {
    match reason {
        ReasonCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ReasonCode::InactiveRunner
        | ReasonCode::Erased
        | ReasonCode::NotRunning
        | ReasonCode::NotAllowed => StatusCode::FORBIDDEN,
        ReasonCode::NotFound => StatusCode::NOT_FOUND,
        ReasonCode::Conflict => StatusCode::CONFLICT,
        ReasonCode::RangeConflict => StatusCode::RANGE_NOT_SATISFIABLE,
        ReasonCode::MissingRangeHeader | ReasonCode::ValidationFailed => StatusCode::BAD_REQUEST,
        ReasonCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ReasonCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let reason = self.reason();
        let status = status_for(reason);

        let (message, current_length, job_status) = match &self {
            ApiError::Protocol(ProtocolError::Internal(err)) => {
                tracing::error!("Internal error: {}", err);
                ("Internal server error".to_string(), None, None)
            }
            ApiError::Protocol(err) => {
                let current_length = match err {
                    ProtocolError::RangeConflict { current_length, .. } => Some(*current_length),
                    _ => None,
                };
                (err.to_string(), current_length, err.job_status())
            }
            ApiError::MissingRangeHeader(msg)
            | ApiError::BadRequest(msg)
            | ApiError::BodyTooLarge(msg) => (msg.clone(), None, None),
        };

        let body = ErrorBody {
            error: reason,
            message,
            current_length,
            job_status,
        };
        let mut response = (status, Json(body)).into_response();

        let headers = response.headers_mut();
        if let Some(length) = current_length {
            if let Ok(value) = HeaderValue::from_str(&accepted_range(length)) {
                headers.insert(header::RANGE, value);
            }
        }
        if let Some(state) = job_status {
            headers.insert(JOB_STATUS_HEADER, HeaderValue::from_static(state.as_str()));
        }

        response
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        ApiError::Protocol(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::BodyTooLarge(err.body_text());
        }
        ApiError::BadRequest(format!("invalid multipart body: {}", err.body_text()))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
