//! In-memory transport for testing
//!
//! Counts every call so tests can assert on remote traffic, and can be told to
//! fail or to answer slowly.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use depot_core::{ChecksumType, Properties};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{RemoteDownload, RemoteInfo, RemoteItem, RemoteTransport};
use crate::error::{RepoError, Result};

#[derive(Debug, Clone)]
struct MockEntry {
    content: Bytes,
    last_modified: DateTime<Utc>,
    checksums: BTreeMap<ChecksumType, String>,
    properties: Option<Properties>,
}

/// Calls received by a [`MockTransport`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransportCounts {
    pub heads: usize,
    pub gets: usize,
    pub texts: usize,
    pub lists: usize,
    pub properties: usize,
}

impl TransportCounts {
    /// Every call that reached the origin
    pub fn total(&self) -> usize {
        self.heads + self.gets + self.texts + self.lists + self.properties
    }
}

#[derive(Default)]
struct Counters {
    heads: AtomicUsize,
    gets: AtomicUsize,
    texts: AtomicUsize,
    lists: AtomicUsize,
    properties: AtomicUsize,
}

pub struct MockTransport {
    base_url: String,
    entries: RwLock<BTreeMap<String, MockEntry>>,
    counters: Counters,
    failing: AtomicBool,
    failing_gets: AtomicBool,
    broken_streams: AtomicBool,
    delay: Mutex<Duration>,
}

impl MockTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            entries: RwLock::new(BTreeMap::new()),
            counters: Counters::default(),
            failing: AtomicBool::new(false),
            failing_gets: AtomicBool::new(false),
            broken_streams: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Serve `content` at `path` without declaring checksums
    pub fn put(&self, path: &str, content: impl Into<Bytes>, last_modified: DateTime<Utc>) {
        self.put_with_checksums(path, content, last_modified, BTreeMap::new());
    }

    /// Serve `content` at `path`, declaring `checksums` alongside
    pub fn put_with_checksums(
        &self,
        path: &str,
        content: impl Into<Bytes>,
        last_modified: DateTime<Utc>,
        checksums: BTreeMap<ChecksumType, String>,
    ) {
        let previous = self.entries.write().insert(
            normalize(path),
            MockEntry {
                content: content.into(),
                last_modified,
                checksums,
                properties: None,
            },
        );
        if let Some(previous) = previous.and_then(|p| p.properties) {
            self.set_properties(path, previous);
        }
    }

    /// Expose properties for an existing path
    pub fn set_properties(&self, path: &str, properties: Properties) {
        if let Some(entry) = self.entries.write().get_mut(&normalize(path)) {
            entry.properties = Some(properties);
        }
    }

    pub fn remove(&self, path: &str) -> bool {
        self.entries.write().remove(&normalize(path)).is_some()
    }

    /// Make every call fail as if the origin were unreachable
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make content downloads fail while HEAD and the other calls still answer
    pub fn set_failing_gets(&self, failing: bool) {
        self.failing_gets.store(failing, Ordering::SeqCst);
    }

    /// Make content streams break off with a connection reset after the first
    /// half of the body
    pub fn set_broken_streams(&self, broken: bool) {
        self.broken_streams.store(broken, Ordering::SeqCst);
    }

    /// Delay every call by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn counts(&self) -> TransportCounts {
        TransportCounts {
            heads: self.counters.heads.load(Ordering::SeqCst),
            gets: self.counters.gets.load(Ordering::SeqCst),
            texts: self.counters.texts.load(Ordering::SeqCst),
            lists: self.counters.lists.load(Ordering::SeqCst),
            properties: self.counters.properties.load(Ordering::SeqCst),
        }
    }

    pub fn reset_counts(&self) {
        for counter in [
            &self.counters.heads,
            &self.counters.gets,
            &self.counters.texts,
            &self.counters.lists,
            &self.counters.properties,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    async fn call(&self, counter: &AtomicUsize) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepoError::NetworkError {
                message: format!("Connection refused: {}", self.base_url),
            });
        }
        Ok(())
    }

    fn entry(&self, path: &str) -> Option<MockEntry> {
        self.entries.read().get(&normalize(path)).cloned()
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn info_of(entry: &MockEntry) -> RemoteInfo {
    let mut info = RemoteInfo::found(Some(entry.content.len() as u64), Some(entry.last_modified));
    info.checksums = entry.checksums.clone();
    info
}

#[async_trait]
impl RemoteTransport for MockTransport {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn head_info(&self, path: &str) -> Result<RemoteInfo> {
        self.call(&self.counters.heads).await?;
        Ok(self
            .entry(path)
            .map(|e| info_of(&e))
            .unwrap_or_else(|| RemoteInfo::not_found(404)))
    }

    async fn get_stream(&self, path: &str) -> Result<RemoteDownload> {
        self.call(&self.counters.gets).await?;
        if self.failing_gets.load(Ordering::SeqCst) {
            return Err(RepoError::NetworkError {
                message: format!("Connection reset: {}", self.base_url),
            });
        }
        let entry = self.entry(path).ok_or_else(|| RepoError::NotFound {
            path: format!("{}/{}", self.base_url, normalize(path)),
            reason: "Remote answered 404".to_string(),
        })?;
        let content = entry.content.clone();
        let chunks = if self.broken_streams.load(Ordering::SeqCst) {
            vec![
                Ok(content.slice(..content.len() / 2)),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer")),
            ]
        } else {
            vec![Ok(content)]
        };
        Ok(RemoteDownload {
            info: info_of(&entry),
            content: Box::pin(futures::stream::iter(chunks)),
        })
    }

    async fn get_text(&self, path: &str) -> Result<Option<String>> {
        self.call(&self.counters.texts).await?;
        Ok(self
            .entry(path)
            .map(|e| String::from_utf8_lossy(&e.content).to_string()))
    }

    async fn list(&self, path: &str) -> Result<Option<Vec<RemoteItem>>> {
        self.call(&self.counters.lists).await?;
        let prefix = match normalize(path) {
            p if p.is_empty() => String::new(),
            p => format!("{}/", p),
        };

        let entries = self.entries.read();
        let mut folders = BTreeSet::new();
        let mut items = Vec::new();
        for (key, entry) in entries.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    folders.insert(folder.to_string());
                }
                None => items.push(RemoteItem {
                    name: rest.to_string(),
                    folder: false,
                    size: Some(entry.content.len() as u64),
                    last_modified: Some(entry.last_modified),
                }),
            }
        }

        if folders.is_empty() && items.is_empty() {
            return Ok(None);
        }
        items.extend(folders.into_iter().map(|name| RemoteItem {
            name,
            folder: true,
            size: None,
            last_modified: None,
        }));
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Some(items))
    }

    async fn get_properties(&self, path: &str) -> Result<Option<Properties>> {
        self.call(&self.counters.properties).await?;
        Ok(self.entry(path).and_then(|e| e.properties))
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("base_url", &self.base_url)
            .field("counts", &self.counts())
            .finish()
    }
}
