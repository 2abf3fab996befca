//! Storage collaborators
//!
//! The engine persists three kinds of state through these traits:
//! - **Binaries**: content-addressed blobs keyed by SHA-1 ([`BinaryStore`])
//! - **Items**: per-path records pointing at a binary, with timestamps and
//!   checksums ([`ItemStore`])
//! - **Properties**: custom key/values attached to a path ([`PropertiesStore`])
//!
//! Implementations:
//! - In-memory stores with operation counters for tests
//! - [`FsBinaryStore`]: blobs on disk under `ab/cd/<sha1>`
//! - [`SqliteItemStore`]: items and properties in SQLite

mod memory;
mod fs;
mod sqlite;

pub use memory::{MemoryBinaryStore, MemoryItemStore, MemoryPropertiesStore, OperationCounts};
pub use fs::FsBinaryStore;
pub use sqlite::SqliteItemStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use depot_core::{ChecksumsInfo, ComputedChecksums, Properties, RepoPath, RepoResource, ResourceInfo};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::stream::{BinaryReader, ByteStream};

/// Content-addressed binary store
#[async_trait]
pub trait BinaryStore: Send + Sync {
    /// Open a binary by SHA-1; `BinaryNotFound` if absent
    async fn get(&self, sha1: &str) -> Result<BinaryReader>;

    /// Store a stream, computing its checksums on the way
    async fn put(&self, content: ByteStream) -> Result<ComputedChecksums>;

    /// Whether a binary with this SHA-1 is stored
    async fn exists(&self, sha1: &str) -> Result<bool>;

    /// Checksums and size of a stored binary
    async fn describe(&self, sha1: &str) -> Result<Option<ComputedChecksums>>;

    /// Store an in-memory buffer
    async fn put_bytes(&self, content: Bytes) -> Result<ComputedChecksums> {
        let stream: ByteStream = Box::pin(futures::stream::once(async move { Ok(content) }));
        self.put(stream).await
    }
}

/// Record of one stored file in a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredItem {
    pub repo_path: RepoPath,
    /// SHA-1 of the binary holding the content
    pub sha1: String,
    pub size: u64,
    pub created: DateTime<Utc>,
    /// Last modification at the origin
    pub last_modified: DateTime<Utc>,
    /// Last time the item was fetched or revalidated; drives cache expiry
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub checksums: ChecksumsInfo,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl StoredItem {
    pub fn new(
        repo_path: RepoPath,
        computed: &ComputedChecksums,
        checksums: ChecksumsInfo,
        last_modified: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            mime_type: Some(depot_core::naming::mime_type(repo_path.path()).to_string()),
            repo_path,
            sha1: computed.sha1.clone(),
            size: computed.size,
            created: now,
            last_modified,
            last_updated: now,
            checksums,
        }
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            size: self.size,
            last_modified: self.last_modified,
            checksums: self.checksums.clone(),
            mime_type: self.mime_type.clone(),
        }
    }

    /// Found resource describing this item
    pub fn to_resource(&self) -> RepoResource {
        RepoResource::found(self.repo_path.clone(), self.info())
    }
}

/// Per-path item records
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get(&self, path: &RepoPath) -> Result<Option<StoredItem>>;

    /// Insert or replace the item at `item.repo_path`
    async fn save(&self, item: StoredItem) -> Result<()>;

    async fn delete(&self, path: &RepoPath) -> Result<bool>;

    /// Items at or below `path`
    async fn list(&self, path: &RepoPath) -> Result<Vec<StoredItem>>;

    /// Set `last_updated`; returns false if there is no such item
    async fn touch(&self, path: &RepoPath, last_updated: DateTime<Utc>) -> Result<bool>;
}

/// Custom properties of items
#[async_trait]
pub trait PropertiesStore: Send + Sync {
    async fn properties(&self, path: &RepoPath) -> Result<Properties>;

    async fn set_properties(&self, path: &RepoPath, properties: &Properties) -> Result<()>;
}

/// The set of stores a repository service works against
#[derive(Clone)]
pub struct Storage {
    pub binaries: Arc<dyn BinaryStore>,
    pub items: Arc<dyn ItemStore>,
    pub properties: Arc<dyn PropertiesStore>,
}

impl Storage {
    pub fn new(
        binaries: Arc<dyn BinaryStore>,
        items: Arc<dyn ItemStore>,
        properties: Arc<dyn PropertiesStore>,
    ) -> Self {
        Self {
            binaries,
            items,
            properties,
        }
    }

    /// Everything in memory
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryBinaryStore::new()),
            Arc::new(MemoryItemStore::new()),
            Arc::new(MemoryPropertiesStore::new()),
        )
    }

    /// Binaries on disk under `root/binaries`, records in `root/items.db`
    pub fn on_disk(root: &Path) -> Result<Self> {
        let binaries = Arc::new(FsBinaryStore::open(root.join("binaries"))?);
        let items = Arc::new(SqliteItemStore::open_at(&root.join("items.db"))?);
        Ok(Self::new(binaries, items.clone(), items))
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}
