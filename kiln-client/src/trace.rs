//! Trace streaming endpoints

use crate::CoordinatorClient;
use crate::error::{ClientError, Result};
use kiln_core::domain::trace::{ContentRange, parse_accepted_range};
use kiln_core::dto::JOB_TOKEN_HEADER;
use kiln_core::dto::error::ErrorBody;
use kiln_core::dto::trace::TraceAppended;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use uuid::Uuid;

impl CoordinatorClient {
    // =============================================================================
    // Trace Streaming
    // =============================================================================

    /// Append `chunk` at `offset`
    ///
    /// A `416` answer becomes [`ClientError::RangeConflict`] carrying the
    /// coordinator's length.
    pub async fn append_trace(
        &self,
        job_id: Uuid,
        job_token: &str,
        offset: u64,
        chunk: &[u8],
    ) -> Result<TraceAppended> {
        let url = format!("{}/api/v1/jobs/{}/trace", self.base_url, job_id);
        let mut request = self
            .client
            .patch(&url)
            .header(JOB_TOKEN_HEADER, job_token)
            .body(chunk.to_vec());
        if let Some(range) = ContentRange::covering(offset, chunk.len() as u64) {
            request = request.header(CONTENT_RANGE, range.to_string());
        }
        let response = request.send().await?;

        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            let from_header = response
                .headers()
                .get(RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_accepted_range);
            let current_length = match from_header {
                Some(length) => length,
                None => {
                    let body: ErrorBody = response.json().await.map_err(|e| {
                        ClientError::ParseError(format!("Failed to parse range conflict: {}", e))
                    })?;
                    body.current_length.ok_or_else(|| {
                        ClientError::ParseError("range conflict without length".to_string())
                    })?
                }
            };
            tracing::debug!(
                "Trace of job {} out of sync at {}, coordinator has {}",
                job_id,
                offset,
                current_length
            );
            return Err(ClientError::RangeConflict { current_length });
        }

        self.handle_response(response).await
    }

    /// Send everything in `trace` past `offset`, resynchronizing once if the
    /// coordinator reports a different length
    ///
    /// `trace` is the runner's full local trace. After a conflict the upload
    /// restarts at the coordinator's length; a coordinator that is ahead of
    /// the local trace is an error.
    pub async fn append_trace_resync(
        &self,
        job_id: Uuid,
        job_token: &str,
        trace: &[u8],
        offset: u64,
    ) -> Result<TraceAppended> {
        let chunk = tail(trace, offset)?;
        match self.append_trace(job_id, job_token, offset, chunk).await {
            Err(ClientError::RangeConflict { current_length }) => {
                let chunk = tail(trace, current_length)?;
                self.append_trace(job_id, job_token, current_length, chunk)
                    .await
            }
            other => other,
        }
    }

    /// Current trace length and job state, without writing
    pub async fn trace_status(&self, job_id: Uuid, job_token: &str) -> Result<TraceAppended> {
        self.append_trace(job_id, job_token, 0, &[]).await
    }

    /// Read back the full trace
    pub async fn get_trace(&self, job_id: Uuid, job_token: &str) -> Result<Vec<u8>> {
        let url = format!("{}/api/v1/jobs/{}/trace", self.base_url, job_id);
        let response = self
            .client
            .get(&url)
            .header(JOB_TOKEN_HEADER, job_token)
            .send()
            .await?;

        let response = self.check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn tail(trace: &[u8], offset: u64) -> Result<&[u8]> {
    usize::try_from(offset)
        .ok()
        .and_then(|start| trace.get(start..))
        .ok_or_else(|| {
            ClientError::InvalidRequest(format!(
                "offset {} is past the local trace of {} bytes",
                offset,
                trace.len()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail() {
        assert_eq!(tail(b"hello", 0).unwrap(), b"hello");
        assert_eq!(tail(b"hello", 3).unwrap(), b"lo");
        assert_eq!(tail(b"hello", 5).unwrap(), b"");
        assert!(tail(b"hello", 6).is_err());
    }
}
