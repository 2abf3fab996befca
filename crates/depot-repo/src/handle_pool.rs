//! Pool of prepared stream handles
//!
//! When a download completes, the leader opens one stream per waiting request
//! and parks it here. Each waiter claims its own handle by id. A handle that
//! is never claimed (waiter timed out, was cancelled, or the entry was
//! dropped) is closed either when its owner releases it or by the idle reaper.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::stream::ResourceStream;

/// Identifier of a prepared handle
pub type HandleId = u64;

struct PooledHandle {
    stream: ResourceStream,
    prepared_at: Instant,
}

/// Registry owning every prepared, not yet claimed stream
#[derive(Default)]
pub struct HandlePool {
    next_id: AtomicU64,
    handles: Mutex<HashMap<HandleId, PooledHandle>>,
    reaped: AtomicU64,
}

impl HandlePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a stream; the pool owns it until claimed, released or reaped
    pub fn register(&self, stream: ResourceStream) -> HandleId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(
            id,
            PooledHandle {
                stream,
                prepared_at: Instant::now(),
            },
        );
        id
    }

    /// Take ownership of a prepared stream
    pub fn claim(&self, id: HandleId) -> Option<ResourceStream> {
        self.handles.lock().remove(&id).map(|h| h.stream)
    }

    /// Close a handle nobody is going to claim
    pub fn release(&self, id: HandleId) -> bool {
        let released = self.handles.lock().remove(&id);
        if let Some(handle) = &released {
            tracing::debug!(
                "Closed unclaimed handle {} for {}",
                id,
                handle.stream.resource().repo_path()
            );
        }
        released.is_some()
    }

    /// Close every handle older than `max_idle`; returns how many were closed
    pub fn reap(&self, max_idle: Duration) -> usize {
        let stale: Vec<PooledHandle> = {
            let mut handles = self.handles.lock();
            let ids: Vec<HandleId> = handles
                .iter()
                .filter(|(_, h)| h.prepared_at.elapsed() >= max_idle)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| handles.remove(&id)).collect()
        };

        for handle in &stale {
            tracing::warn!(
                "Reaped leaked download handle for {} (idle {:?})",
                handle.stream.resource().repo_path(),
                handle.prepared_at.elapsed()
            );
        }
        self.reaped.fetch_add(stale.len() as u64, Ordering::Relaxed);
        stale.len()
    }

    /// Handles prepared but not yet claimed
    pub fn outstanding(&self) -> usize {
        self.handles.lock().len()
    }

    /// Total handles closed by the reaper
    pub fn reaped_total(&self) -> u64 {
        self.reaped.load(Ordering::Relaxed)
    }

    /// Run `reap` every `interval` until the pool is dropped
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration, max_idle: Duration) -> JoinHandle<()> {
        let pool: Weak<HandlePool> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.reap(max_idle);
            }
        })
    }
}

impl std::fmt::Debug for HandlePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlePool")
            .field("outstanding", &self.outstanding())
            .field("reaped", &self.reaped_total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use depot_core::{RepoPath, RepoResource, ResourceInfo};

    fn stream() -> ResourceStream {
        let resource = RepoResource::found(
            RepoPath::new("central-cache", "a.jar"),
            ResourceInfo::new(3, Utc::now()),
        );
        ResourceStream::from_bytes(resource, Bytes::from_static(b"abc"))
    }

    #[test]
    fn test_register_claim() {
        let pool = HandlePool::new();
        let a = pool.register(stream());
        let b = pool.register(stream());
        assert_ne!(a, b);
        assert_eq!(pool.outstanding(), 2);

        assert!(pool.claim(a).is_some());
        assert!(pool.claim(a).is_none());
        assert!(pool.release(b));
        assert!(!pool.release(b));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_reap() {
        let pool = HandlePool::new();
        pool.register(stream());
        assert_eq!(pool.reap(Duration::from_secs(60)), 0);
        assert_eq!(pool.reap(Duration::ZERO), 1);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.reaped_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_task() {
        let pool = Arc::new(HandlePool::new());
        pool.register(stream());
        let task = pool.spawn_reaper(Duration::from_millis(10), Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(pool.outstanding(), 0);

        drop(pool);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(task.is_finished());
    }
}
