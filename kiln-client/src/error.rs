//! Error types for the Kiln client

use kiln_core::dto::error::{ErrorBody, ReasonCode};
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the Kiln client
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Reason code from the structured error body, if any
        reason: Option<ReasonCode>,
        /// Error message from the API
        message: String,
    },

    /// Trace append rejected; resend starting at `current_length`
    #[error("trace range conflict, coordinator has {current_length} bytes")]
    RangeConflict { current_length: u64 },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Create an API error from status code and response body
    ///
    /// Structured error bodies are decoded; anything else is kept verbatim.
    pub fn api_error(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => Self::ApiError {
                status,
                reason: Some(parsed.error),
                message: parsed.message,
            },
            Err(_) => Self::ApiError {
                status,
                reason: None,
                message: body,
            },
        }
    }

    /// Reason code reported by the coordinator
    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            Self::ApiError { reason, .. } => *reason,
            Self::RangeConflict { .. } => Some(ReasonCode::RangeConflict),
            _ => None,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::RangeConflict { .. })
            || matches!(self, Self::ApiError { status, .. } if *status >= 400 && *status < 500)
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}
