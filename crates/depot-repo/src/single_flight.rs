//! Single-flight download coordination
//!
//! Concurrent requests for the same remote path share one network fetch. The
//! first request becomes the leader and performs the download; later requests
//! join the in-flight entry and wait (bounded by a timeout) for the leader to
//! finish. On completion the leader opens one stream per waiter over the
//! now-cached content and parks them in the [`HandlePool`]; each waiter claims
//! its own handle.
//!
//! Waiter accounting uses a lock-free counter. Once the leader starts
//! preparing handles it swaps the counter to `-1`; a request arriving after
//! that point does not wait at all and proceeds independently.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::error::{RepoError, Result};
use crate::handle_pool::{HandleId, HandlePool};
use crate::stream::ResourceStream;

/// Waiter count once the leader has taken its snapshot
const SENTINEL: i64 = -1;

#[derive(Debug, Clone)]
enum FlightOutcome {
    Completed,
    Failed(String),
}

/// One in-flight download
struct DownloadEntry {
    key: String,
    waiters: AtomicI64,
    done: watch::Sender<bool>,
    prepared: Mutex<VecDeque<HandleId>>,
    outcome: OnceLock<FlightOutcome>,
    started: Instant,
    pool: Arc<HandlePool>,
}

impl DownloadEntry {
    fn new(key: String, pool: Arc<HandlePool>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            key,
            waiters: AtomicI64::new(0),
            done,
            prepared: Mutex::new(VecDeque::new()),
            outcome: OnceLock::new(),
            started: Instant::now(),
            pool,
        }
    }

    /// Count ourselves as a waiter unless the leader already took its snapshot
    fn try_join(&self) -> bool {
        let mut current = self.waiters.load(Ordering::SeqCst);
        loop {
            if current < 0 {
                return false;
            }
            match self.waiters.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Stop waiting; no effect once the leader has taken its snapshot
    fn leave(&self) {
        let mut current = self.waiters.load(Ordering::SeqCst);
        loop {
            if current <= 0 {
                return;
            }
            match self.waiters.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn finish(&self, outcome: FlightOutcome) {
        let _ = self.outcome.set(outcome);
        self.done.send_replace(true);
    }

    fn take_prepared(&self) -> Option<ResourceStream> {
        loop {
            let id = self.prepared.lock().pop_front()?;
            if let Some(stream) = self.pool.claim(id) {
                return Some(stream);
            }
            // Reaped in the meantime, try the next one
        }
    }
}

impl Drop for DownloadEntry {
    fn drop(&mut self) {
        for id in self.prepared.get_mut().drain(..) {
            self.pool.release(id);
        }
    }
}

struct Inner {
    entries: DashMap<String, Arc<DownloadEntry>>,
    pool: Arc<HandlePool>,
    wait_timeout: Duration,
}

/// Outcome of [`SingleFlight::begin_or_join`]
pub enum Flight {
    /// No download was in flight; the caller must perform it and then call
    /// [`FlightLeader::complete`] or [`FlightLeader::fail`]
    Leader(FlightLeader),

    /// A concurrent download finished and handed us our own stream
    Joined(ResourceStream),

    /// Waiting was not possible (late arrival or timeout); proceed as if no
    /// concurrent download existed
    Independent,
}

impl std::fmt::Debug for Flight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Flight::Leader(leader) => write!(f, "Leader({})", leader.entry.key),
            Flight::Joined(stream) => write!(f, "Joined({:?})", stream),
            Flight::Independent => f.write_str("Independent"),
        }
    }
}

/// Coordinator of in-flight downloads, keyed by path
#[derive(Clone)]
pub struct SingleFlight {
    inner: Arc<Inner>,
}

impl SingleFlight {
    pub fn new(wait_timeout: Duration) -> Self {
        Self::with_pool(wait_timeout, Arc::new(HandlePool::new()))
    }

    pub fn with_pool(wait_timeout: Duration, pool: Arc<HandlePool>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                pool,
                wait_timeout,
            }),
        }
    }

    pub fn pool(&self) -> &Arc<HandlePool> {
        &self.inner.pool
    }

    pub fn wait_timeout(&self) -> Duration {
        self.inner.wait_timeout
    }

    /// Number of downloads currently in flight
    pub fn in_flight(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.entries.contains_key(key)
    }

    /// Become the leader for `key`, or wait for the current leader
    ///
    /// Returns an error only when the leader we waited for failed.
    pub async fn begin_or_join(&self, key: &str) -> Result<Flight> {
        let (entry, is_leader) = match self.inner.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => (occupied.get().clone(), false),
            Entry::Vacant(vacant) => {
                let entry = Arc::new(DownloadEntry::new(key.to_string(), self.inner.pool.clone()));
                vacant.insert(entry.clone());
                (entry, true)
            }
        };

        if is_leader {
            tracing::debug!("Leading download of {}", key);
            return Ok(Flight::Leader(FlightLeader {
                inner: self.inner.clone(),
                entry,
                finished: false,
            }));
        }

        if !entry.try_join() {
            tracing::debug!("Download of {} is completing, proceeding independently", key);
            return Ok(Flight::Independent);
        }

        tracing::debug!(
            "Waiting for concurrent download of {} (started {:?} ago)",
            key,
            entry.started.elapsed()
        );

        let mut done = entry.done.subscribe();
        let timed_out = tokio::time::timeout(self.inner.wait_timeout, done.wait_for(|d| *d))
            .await
            .is_err();
        if timed_out {
            entry.leave();
            tracing::warn!(
                "Timed out after {:?} waiting for download of {}",
                self.inner.wait_timeout,
                key
            );
            return Ok(Flight::Independent);
        }

        match entry.outcome.get() {
            Some(FlightOutcome::Failed(message)) => Err(RepoError::NotFound {
                path: key.to_string(),
                reason: format!("Concurrent download failed: {}", message),
            }),
            _ => match entry.take_prepared() {
                Some(stream) => Ok(Flight::Joined(stream)),
                None => Ok(Flight::Independent),
            },
        }
    }
}

impl std::fmt::Debug for SingleFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight())
            .field("wait_timeout", &self.inner.wait_timeout)
            .finish()
    }
}

/// Leadership of one in-flight download
///
/// Dropping a leader without completing it fails the flight so waiters are
/// released.
pub struct FlightLeader {
    inner: Arc<Inner>,
    entry: Arc<DownloadEntry>,
    finished: bool,
}

impl FlightLeader {
    pub fn key(&self) -> &str {
        &self.entry.key
    }

    /// Requests currently waiting on this download
    pub fn waiters(&self) -> i64 {
        self.entry.waiters.load(Ordering::SeqCst).max(0)
    }

    /// Finish the download: unregister, prepare one stream per waiter with
    /// `open`, then release the waiters
    pub async fn complete<F, Fut>(mut self, open: F)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ResourceStream>>,
    {
        self.finished = true;
        self.unregister();

        let waiters = self.entry.waiters.swap(SENTINEL, Ordering::SeqCst).max(0);
        for _ in 0..waiters {
            match open().await {
                Ok(stream) => {
                    let id = self.inner.pool.register(stream);
                    self.entry.prepared.lock().push_back(id);
                }
                Err(e) => {
                    tracing::warn!("Failed to prepare stream for waiter of {}: {}", self.entry.key, e);
                    break;
                }
            }
        }

        tracing::debug!(
            "Download of {} completed in {:?}, released {} waiter(s)",
            self.entry.key,
            self.entry.started.elapsed(),
            waiters
        );
        self.entry.finish(FlightOutcome::Completed);
    }

    /// Abort the download and release waiters with the failure
    pub fn fail(mut self, message: impl Into<String>) {
        self.abort(message.into());
    }

    fn abort(&mut self, message: String) {
        self.finished = true;
        self.unregister();
        self.entry.waiters.swap(SENTINEL, Ordering::SeqCst);
        self.entry.finish(FlightOutcome::Failed(message));
    }

    fn unregister(&self) {
        self.inner
            .entries
            .remove_if(&self.entry.key, |_, registered| Arc::ptr_eq(registered, &self.entry));
    }
}

impl Drop for FlightLeader {
    fn drop(&mut self) {
        if !self.finished {
            self.abort("download abandoned".to_string());
        }
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

    async fn lead(flight: &SingleFlight, key: &str) -> FlightLeader {
        match flight.begin_or_join(key).await.unwrap() {
            Flight::Leader(leader) => leader,
            other => panic!("Expected leader, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiters_receive_own_handles() {
        let flight = SingleFlight::new(Duration::from_secs(5));
        let leader = lead(&flight, "central:a.jar").await;

        let mut joins = Vec::new();
        for _ in 0..5 {
            let flight = flight.clone();
            joins.push(tokio::spawn(async move {
                flight.begin_or_join("central:a.jar").await.unwrap()
            }));
        }

        while leader.waiters() < 5 {
            tokio::task::yield_now().await;
        }
        leader.complete(|| async { Ok::<_, RepoError>(stream()) }).await;

        for join in joins {
            match join.await.unwrap() {
                Flight::Joined(s) => assert_eq!(s.read_all().await.unwrap(), Bytes::from_static(b"abc")),
                other => panic!("Expected joined, got {:?}", other),
            }
        }
        assert_eq!(flight.in_flight(), 0);
        assert_eq!(flight.pool().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_waiter_timeout_proceeds_independently() {
        let flight = SingleFlight::new(Duration::from_millis(20));
        let leader = lead(&flight, "k").await;

        let result = flight.begin_or_join("k").await.unwrap();
        assert!(matches!(result, Flight::Independent));
        assert_eq!(leader.waiters(), 0);

        leader.complete(|| async { Ok::<_, RepoError>(stream()) }).await;
        assert_eq!(flight.pool().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_late_arrival_does_not_wait() {
        let flight = SingleFlight::new(Duration::from_secs(60));
        let leader = lead(&flight, "k").await;
        let entry = leader.entry.clone();
        leader.complete(|| async { Ok::<_, RepoError>(stream()) }).await;

        // The counter is now the sentinel
        assert!(!entry.try_join());
        // And the key is free for a new leader
        assert!(matches!(flight.begin_or_join("k").await.unwrap(), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn test_failed_leader_propagates() {
        let flight = SingleFlight::new(Duration::from_secs(5));
        let leader = lead(&flight, "k").await;

        let waiter = {
            let flight = flight.clone();
            tokio::spawn(async move { flight.begin_or_join("k").await })
        };
        while leader.waiters() < 1 {
            tokio::task::yield_now().await;
        }
        leader.fail("remote returned 500");

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(err.to_string().contains("remote returned 500"));
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_waiters() {
        let flight = SingleFlight::new(Duration::from_secs(5));
        let leader = lead(&flight, "k").await;
        let waiter = {
            let flight = flight.clone();
            tokio::spawn(async move { flight.begin_or_join("k").await })
        };
        while leader.waiters() < 1 {
            tokio::task::yield_now().await;
        }
        drop(leader);
        assert!(waiter.await.unwrap().is_err());
        assert!(!flight.is_in_flight("k"));
    }

    #[tokio::test]
    async fn test_unclaimed_handles_closed_with_entry() {
        let flight = SingleFlight::new(Duration::from_secs(5));
        let leader = lead(&flight, "k").await;
        let entry = leader.entry.clone();

        // A waiter that got counted but never claims its handle
        assert!(entry.try_join());
        leader.complete(|| async { Ok::<_, RepoError>(stream()) }).await;
        assert_eq!(flight.pool().outstanding(), 1);

        drop(entry);
        assert_eq!(flight.pool().outstanding(), 0);
    }
}
