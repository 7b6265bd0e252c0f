//! Application state
//!
//! Wires storage backends into the protocol services shared by every
//! request handler.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::gate::RunnerGate;
use crate::repository::{
    BlobStore, FsBlobStore, JobStore, MarkerCache, MemoryBlobStore, MemoryJobStore,
    MemoryMarkerCache, MemoryRunnerStore, NoopMarkerCache, PgJobStore, PgRunnerStore, RunnerStore,
};
use crate::service::{ArtifactGate, ArtifactPolicy, Dispatcher, TraceChannel};

/// Storage collaborators the services are built on
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub runners: Arc<dyn RunnerStore>,
    pub markers: Arc<dyn MarkerCache>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Stores {
    /// Everything in process memory
    pub fn in_memory() -> Self {
        Self {
            jobs: Arc::new(MemoryJobStore::new()),
            runners: Arc::new(MemoryRunnerStore::new()),
            markers: Arc::new(MemoryMarkerCache::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
        }
    }

    /// Jobs and runners in Postgres; marker cache in memory
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            jobs: Arc::new(PgJobStore::new(pool.clone())),
            runners: Arc::new(PgRunnerStore::new(pool)),
            ..Self::in_memory()
        }
    }

    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn with_markers(mut self, markers: Arc<dyn MarkerCache>) -> Self {
        self.markers = markers;
        self
    }

    /// Replaces the marker cache with one that remembers nothing
    pub fn without_marker_cache(self) -> Self {
        self.with_markers(Arc::new(NoopMarkerCache))
    }
}

/// Filesystem blob store described by the configuration
pub fn fs_blob_store(config: &Config) -> FsBlobStore {
    let store = FsBlobStore::new(&config.artifacts_dir);
    match &config.artifacts_public_url {
        Some(url) => store.with_public_url(url.as_str()),
        None => store,
    }
}

/// Services shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub runners: RunnerGate,
    pub dispatcher: Dispatcher,
    pub traces: TraceChannel,
    pub artifacts: ArtifactGate,
}

impl AppState {
    pub fn new(stores: Stores, config: &Config) -> Self {
        let policy = ArtifactPolicy {
            enabled: config.artifacts_enabled,
            max_size: config.max_artifact_size,
            default_expiry: config.default_artifact_expiry,
        };

        Self {
            runners: RunnerGate::new(stores.runners),
            dispatcher: Dispatcher::new(
                Arc::clone(&stores.jobs),
                stores.markers,
                config.poll_marker_ttl,
            ),
            traces: TraceChannel::new(Arc::clone(&stores.jobs)),
            artifacts: ArtifactGate::new(stores.jobs, stores.blobs, policy),
        }
    }

    /// Fully in-memory state with default settings
    pub fn in_memory() -> Self {
        Self::new(Stores::in_memory(), &Config::default())
    }

    /// Ceiling for upload request bodies: the archive limit plus headroom
    /// for the metadata part and multipart framing
    pub fn upload_body_limit(&self) -> usize {
        let limit = self.artifacts.policy().max_size.saturating_add(1024 * 1024);
        usize::try_from(limit).unwrap_or(usize::MAX)
    }
}
