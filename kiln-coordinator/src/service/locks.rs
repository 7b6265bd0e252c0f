//! Per-job locks
//!
//! Serializes artifact store, fetch and erase for a single job id without
//! blocking work on other jobs.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
pub struct JobLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to the job
    pub async fn lock(&self, job_id: Uuid) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard guard is released before awaiting
        let lock = self
            .locks
            .entry(job_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drops locks nobody holds or waits on
    pub fn prune_idle(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_is_exclusive_per_job() {
        let locks = JobLocks::new();
        let job = Uuid::new_v4();
        let inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(job).await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_distinct_jobs_do_not_block() {
        let locks = JobLocks::new();
        let _a = locks.lock(Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(Uuid::new_v4())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = JobLocks::new();
        let held = locks.lock(Uuid::new_v4()).await;
        drop(locks.lock(Uuid::new_v4()).await);

        locks.prune_idle();
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.prune_idle();
        assert!(locks.is_empty());
    }
}
