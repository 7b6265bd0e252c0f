//! Kiln HTTP Client
//!
//! A type-safe HTTP client for the runner side of the Kiln coordinator
//! protocol.
//!
//! # Example
//!
//! ```no_run
//! use kiln_client::{CoordinatorClient, PollResponse, PollState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = CoordinatorClient::new("http://localhost:8080");
//!     let mut poll = PollState::default();
//!
//!     match client.request_job("my-runner-token", &mut poll, None).await? {
//!         PollResponse::Assigned(job) => println!("Got job {}", job.id),
//!         PollResponse::NoWork { .. } | PollResponse::NotModified => {}
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod artifacts;
mod jobs;
mod runners;
mod trace;

// Re-export commonly used types
pub use artifacts::ArtifactDownload;
pub use error::{ClientError, Result};
pub use jobs::{PollResponse, PollState};
pub use kiln_core::dto::job::JobDescriptor;

use reqwest::Client;
use reqwest::redirect::Policy;
use serde::de::DeserializeOwned;

/// HTTP client for the Kiln coordinator API
///
/// Methods are organized into logical groups:
/// - Runner verification
/// - Polling and job state updates
/// - Trace streaming
/// - Artifact upload, download and erasure
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    /// Base URL of the coordinator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    ///
    /// Redirects are not followed, so artifact downloads served from an
    /// external location surface as [`ArtifactDownload::Redirect`].
    ///
    /// # Example
    /// ```
    /// use kiln_client::CoordinatorClient;
    ///
    /// let client = CoordinatorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .unwrap_or_default();
        Self::with_client(base_url, client)
    }

    /// Create a new coordinator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the coordinator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content (e.g., DELETE operations)
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        self.check_status(response).await?;
        Ok(())
    }

    /// Turns an error status into a [`ClientError`]
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if status.is_client_error() || status.is_server_error() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }
}
