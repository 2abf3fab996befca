//! In-memory stores for testing
//!
//! These stores keep everything in memory and count the operations performed
//! on them, so tests can assert on storage traffic.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use depot_core::{Checksummer, ComputedChecksums, Properties, RepoPath};
use futures::TryStreamExt;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::Arc;

use super::{BinaryStore, ItemStore, PropertiesStore, StoredItem};
use crate::error::{RepoError, Result};
use crate::stream::{BinaryReader, ByteStream};

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub puts: usize,
    pub lists: usize,
    pub deletes: usize,
}

/// In-memory binary store
#[derive(Clone, Default)]
pub struct MemoryBinaryStore {
    blobs: Arc<RwLock<HashMap<String, (Bytes, ComputedChecksums)>>>,
    operations: Arc<RwLock<OperationCounts>>,
}

impl MemoryBinaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().clone()
    }

    /// Number of distinct binaries stored
    pub fn binary_count(&self) -> usize {
        self.blobs.read().len()
    }
}

#[async_trait]
impl BinaryStore for MemoryBinaryStore {
    async fn get(&self, sha1: &str) -> Result<BinaryReader> {
        self.operations.write().gets += 1;
        let data = self
            .blobs
            .read()
            .get(sha1)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| RepoError::BinaryNotFound {
                sha1: sha1.to_string(),
            })?;
        Ok(Box::new(io::Cursor::new(data)))
    }

    async fn put(&self, mut content: ByteStream) -> Result<ComputedChecksums> {
        self.operations.write().puts += 1;
        let mut checksummer = Checksummer::new();
        let mut buf = BytesMut::new();
        while let Some(chunk) = content.try_next().await? {
            checksummer.update(&chunk);
            buf.extend_from_slice(&chunk);
        }
        let computed = checksummer.finish();
        self.blobs
            .write()
            .entry(computed.sha1.clone())
            .or_insert_with(|| (buf.freeze(), computed.clone()));
        Ok(computed)
    }

    async fn exists(&self, sha1: &str) -> Result<bool> {
        Ok(self.blobs.read().contains_key(sha1))
    }

    async fn describe(&self, sha1: &str) -> Result<Option<ComputedChecksums>> {
        Ok(self.blobs.read().get(sha1).map(|(_, c)| c.clone()))
    }
}

/// In-memory item store
#[derive(Clone, Default)]
pub struct MemoryItemStore {
    items: Arc<RwLock<BTreeMap<RepoPath, StoredItem>>>,
    operations: Arc<RwLock<OperationCounts>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().clone()
    }

    pub fn item_count(&self) -> usize {
        self.items.read().len()
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn get(&self, path: &RepoPath) -> Result<Option<StoredItem>> {
        self.operations.write().gets += 1;
        Ok(self.items.read().get(path).cloned())
    }

    async fn save(&self, item: StoredItem) -> Result<()> {
        self.operations.write().puts += 1;
        self.items.write().insert(item.repo_path.clone(), item);
        Ok(())
    }

    async fn delete(&self, path: &RepoPath) -> Result<bool> {
        self.operations.write().deletes += 1;
        Ok(self.items.write().remove(path).is_some())
    }

    async fn list(&self, path: &RepoPath) -> Result<Vec<StoredItem>> {
        self.operations.write().lists += 1;
        Ok(self
            .items
            .read()
            .values()
            .filter(|item| item.repo_path.is_within(path))
            .cloned()
            .collect())
    }

    async fn touch(&self, path: &RepoPath, last_updated: DateTime<Utc>) -> Result<bool> {
        match self.items.write().get_mut(path) {
            Some(item) => {
                item.last_updated = last_updated;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// In-memory properties store
#[derive(Clone, Default)]
pub struct MemoryPropertiesStore {
    properties: Arc<RwLock<HashMap<RepoPath, Properties>>>,
}

impl MemoryPropertiesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PropertiesStore for MemoryPropertiesStore {
    async fn properties(&self, path: &RepoPath) -> Result<Properties> {
        Ok(self.properties.read().get(path).cloned().unwrap_or_default())
    }

    async fn set_properties(&self, path: &RepoPath, properties: &Properties) -> Result<()> {
        let mut all = self.properties.write();
        if properties.is_empty() {
            all.remove(path);
        } else {
            all.insert(path.clone(), properties.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::ChecksumsInfo;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_binary_put_get() {
        let store = MemoryBinaryStore::new();
        let computed = store.put_bytes(Bytes::from_static(b"hello world")).await.unwrap();
        assert_eq!(computed.sha1, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert!(store.exists(&computed.sha1).await.unwrap());

        let mut reader = store.get(&computed.sha1).await.unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "hello world");

        // Same content is stored once
        store.put_bytes(Bytes::from_static(b"hello world")).await.unwrap();
        assert_eq!(store.binary_count(), 1);
        assert_eq!(store.operation_counts().puts, 2);

        assert!(matches!(
            store.get("missing").await,
            Err(RepoError::BinaryNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_items_list_and_touch() {
        let store = MemoryItemStore::new();
        let computed = ComputedChecksums::of(b"x");
        for path in ["org/acme/a.jar", "org/acme/b.jar", "org/other/c.jar"] {
            let item = StoredItem::new(
                RepoPath::new("libs", path),
                &computed,
                ChecksumsInfo::new(),
                Utc::now(),
            );
            store.save(item).await.unwrap();
        }

        let listed = store.list(&RepoPath::new("libs", "org/acme")).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(store.list(&RepoPath::root("libs")).await.unwrap().len(), 3);

        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        let path = RepoPath::new("libs", "org/acme/a.jar");
        assert!(store.touch(&path, epoch).await.unwrap());
        assert_eq!(store.get(&path).await.unwrap().unwrap().last_updated, epoch);
        assert!(!store.touch(&RepoPath::new("libs", "nope"), epoch).await.unwrap());

        assert!(store.delete(&path).await.unwrap());
        assert_eq!(store.item_count(), 2);
    }

    #[tokio::test]
    async fn test_properties() {
        let store = MemoryPropertiesStore::new();
        let path = RepoPath::new("libs", "a.jar");
        assert!(store.properties(&path).await.unwrap().is_empty());

        let mut props = Properties::new();
        props.add("build.number", "42");
        store.set_properties(&path, &props).await.unwrap();
        assert_eq!(store.properties(&path).await.unwrap(), props);
    }
}
