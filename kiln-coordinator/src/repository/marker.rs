//! Poll Marker Cache
//!
//! TTL key-value cache mapping a runner id to the last no-work marker handed
//! to it. The cache is an optimization only: an entry that expires or is
//! evicted costs the runner one full no-work response, never a wrong answer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use kiln_core::domain::marker::PollMarker;
use uuid::Uuid;

use super::StoreError;

#[async_trait]
pub trait MarkerCache: Send + Sync {
    /// Returns the cached marker for the runner, if present and not expired
    async fn get(&self, runner_id: Uuid) -> Result<Option<PollMarker>, StoreError>;

    async fn set_with_ttl(
        &self,
        runner_id: Uuid,
        marker: PollMarker,
        ttl: Duration,
    ) -> Result<(), StoreError>;
}

/// Process-local marker cache
#[derive(Debug, Default)]
pub struct MemoryMarkerCache {
    entries: DashMap<Uuid, (PollMarker, Instant)>,
}

impl MemoryMarkerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - self.entries.len()
    }
}

#[async_trait]
impl MarkerCache for MemoryMarkerCache {
    async fn get(&self, runner_id: Uuid) -> Result<Option<PollMarker>, StoreError> {
        let now = Instant::now();

        // Expired entries are removed lazily on read
        let removed = self
            .entries
            .remove_if(&runner_id, |_, (_, expires_at)| *expires_at <= now);
        if removed.is_some() {
            return Ok(None);
        }

        Ok(self.entries.get(&runner_id).map(|e| e.0.clone()))
    }

    async fn set_with_ttl(
        &self,
        runner_id: Uuid,
        marker: PollMarker,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.entries.insert(runner_id, (marker, Instant::now() + ttl));
        Ok(())
    }
}

/// Cache that never remembers anything; every empty poll gets a fresh marker
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMarkerCache;

#[async_trait]
impl MarkerCache for NoopMarkerCache {
    async fn get(&self, _runner_id: Uuid) -> Result<Option<PollMarker>, StoreError> {
        Ok(None)
    }

    async fn set_with_ttl(
        &self,
        _runner_id: Uuid,
        _marker: PollMarker,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let cache = MemoryMarkerCache::new();
        let runner = Uuid::new_v4();
        let marker = PollMarker::generate();

        cache
            .set_with_ttl(runner, marker.clone(), Duration::from_millis(40))
            .await
            .unwrap();
        assert_eq!(cache.get(runner).await.unwrap(), Some(marker));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get(runner).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_are_per_runner() {
        let cache = MemoryMarkerCache::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        cache
            .set_with_ttl(a, PollMarker::generate(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.get(a).await.unwrap().is_some());
        assert!(cache.get(b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = MemoryMarkerCache::new();
        cache
            .set_with_ttl(Uuid::new_v4(), PollMarker::generate(), Duration::ZERO)
            .await
            .unwrap();
        cache
            .set_with_ttl(
                Uuid::new_v4(),
                PollMarker::generate(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(cache.purge_expired(), 1);
    }

    #[tokio::test]
    async fn test_noop_cache_forgets() {
        let cache = NoopMarkerCache;
        let runner = Uuid::new_v4();
        cache
            .set_with_ttl(runner, PollMarker::generate(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.get(runner).await.unwrap().is_none());
    }
}
