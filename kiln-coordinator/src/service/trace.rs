//! Trace Channel
//!
//! Append-only job traces with strict offset validation. A chunk is accepted
//! only when its declared offset equals the current trace length, so gaps and
//! replays are both rejected with the authoritative length.

use std::sync::Arc;

use kiln_core::domain::job::{Job, JobState};
use kiln_core::domain::trace::ContentRange;
use uuid::Uuid;

use crate::error::{ProtocolError, Result};
use crate::gate::verify_job_token;
use crate::repository::{AppendOutcome, JobStore};

/// An accepted append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// Trace length after the append
    pub length: u64,
    pub job_status: JobState,
}

#[derive(Clone)]
pub struct TraceChannel {
    jobs: Arc<dyn JobStore>,
}

impl TraceChannel {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// Appends a chunk on behalf of the job token holder
    pub async fn append(
        &self,
        job_id: Uuid,
        job_token: Option<&str>,
        declared_offset: u64,
        chunk: &[u8],
    ) -> Result<Accepted> {
        self.authorize(job_id, job_token).await?;
        self.append_unchecked(job_id, declared_offset, chunk).await
    }

    /// Appends a chunk for a caller that was already authorized by other
    /// means, such as the runner owning the job
    pub async fn append_unchecked(
        &self,
        job_id: Uuid,
        declared_offset: u64,
        chunk: &[u8],
    ) -> Result<Accepted> {
        // Offset check and write happen atomically in the store
        match self.jobs.append_trace(job_id, declared_offset, chunk).await? {
            AppendOutcome::Appended { length, state } => {
                tracing::debug!(
                    "Trace of job {} accepted {} bytes, length {}",
                    job_id,
                    chunk.len(),
                    length
                );
                Ok(Accepted {
                    length,
                    job_status: state,
                })
            }
            AppendOutcome::OffsetMismatch { length, state } => {
                tracing::debug!(
                    "Trace of job {} rejected offset {}, length is {}",
                    job_id,
                    declared_offset,
                    length
                );
                Err(ProtocolError::RangeConflict {
                    current_length: length,
                    job_status: state,
                })
            }
            AppendOutcome::NotWritable { state, erased: true } => Err(ProtocolError::Erased {
                job_id,
                job_status: state,
            }),
            AppendOutcome::NotWritable { state, .. } => Err(ProtocolError::NotRunning {
                job_id,
                job_status: state,
            }),
            AppendOutcome::NotFound => Err(ProtocolError::job_not_found(job_id)),
        }
    }

    /// Appends a chunk whose position is given by a `Content-Range` header
    ///
    /// The range must describe exactly the bytes in `chunk`.
    pub async fn append_range(
        &self,
        job_id: Uuid,
        job_token: Option<&str>,
        range: ContentRange,
        chunk: &[u8],
    ) -> Result<Accepted> {
        if range.len() != chunk.len() as u64 {
            return Err(ProtocolError::ValidationFailed(format!(
                "range {} covers {} bytes but body has {}",
                range,
                range.len(),
                chunk.len()
            )));
        }
        self.append(job_id, job_token, range.start, chunk).await
    }

    /// Returns the full trace to the job token holder
    pub async fn read(&self, job_id: Uuid, job_token: Option<&str>) -> Result<Vec<u8>> {
        let job = self.authorize(job_id, job_token).await?;
        if job.erased {
            return Err(ProtocolError::job_not_found(job_id));
        }

        self.jobs
            .read_trace(job_id)
            .await?
            .ok_or_else(|| ProtocolError::job_not_found(job_id))
    }

    /// Current trace length and job state, without appending
    pub async fn status(&self, job_id: Uuid, job_token: Option<&str>) -> Result<Accepted> {
        let job = self.authorize(job_id, job_token).await?;
        Ok(Accepted {
            length: job.trace_length,
            job_status: job.state,
        })
    }

    async fn authorize(&self, job_id: Uuid, job_token: Option<&str>) -> Result<Job> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| ProtocolError::job_not_found(job_id))?;
        verify_job_token(&job, job_token)?;
        Ok(job)
    }
}
