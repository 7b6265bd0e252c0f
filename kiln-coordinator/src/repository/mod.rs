//! Repository Module
//!
//! Data access layer for the coordinator.
//! Each repository is a trait describing the capability the protocol core
//! consumes, with a Postgres backend for production and in-memory backends
//! for development mode and tests.

pub mod blob;
pub mod job;
pub mod marker;
pub mod memory;
pub mod runner;

use thiserror::Error;

// Re-export for convenience
pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use job::{AppendOutcome, JobStore, PgJobStore};
pub use marker::{MarkerCache, MemoryMarkerCache, NoopMarkerCache};
pub use memory::{MemoryJobStore, MemoryRunnerStore};
pub use runner::{PgRunnerStore, RunnerStore};

/// Failure inside a storage collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("blob storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub(crate) fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{} overflows i64", value)))
}

pub(crate) fn to_u64(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative length {}", value)))
}
