//! Local repository
//!
//! Items are records in the item store pointing at binaries in the binary
//! store. Local repositories accept deploys; cache repositories reuse the same
//! store logic for the content they mirror.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::{
    ChecksumInfo, ChecksumMismatch, ChecksumPolicy, ChecksumType, ChecksumsInfo, Properties,
    RepoPath, RepoResource, RequestContext, naming,
};
use futures::TryStreamExt;
use std::collections::BTreeMap;

use super::{RepoKind, Repository, check_path, rejected};
use crate::config::{RepoDescriptor, RepoPatterns};
use crate::error::{RepoError, Result};
use crate::security::AccessStatus;
use crate::storage::{Storage, StoredItem};
use crate::stream::{ByteStream, ResourceStream};

pub struct LocalRepo {
    descriptor: RepoDescriptor,
    patterns: RepoPatterns,
    policy: ChecksumPolicy,
    storage: Storage,
}

impl LocalRepo {
    pub fn new(descriptor: RepoDescriptor, storage: Storage) -> Result<Self> {
        Ok(Self {
            patterns: descriptor.patterns()?,
            policy: ChecksumPolicy::new(descriptor.checksum_policy),
            descriptor,
            storage,
        })
    }

    pub fn descriptor(&self) -> &RepoDescriptor {
        &self.descriptor
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Whether this repository may hold `path`
    pub fn check_path(&self, path: &str) -> AccessStatus {
        check_path(&self.descriptor, &self.patterns, path)
    }

    fn repo_path(&self, path: &str) -> RepoPath {
        RepoPath::new(&self.descriptor.key, path)
    }

    /// Stored record of `path`
    pub async fn item(&self, path: &str) -> Result<Option<StoredItem>> {
        self.storage.items.get(&self.repo_path(path)).await
    }

    /// Open the binary behind `item`, describing it as `resource`
    pub async fn open_item(&self, resource: RepoResource, item: &StoredItem) -> Result<ResourceStream> {
        let reader = self.storage.binaries.get(&item.sha1).await?;
        Ok(ResourceStream::new(resource, reader))
    }

    pub async fn save(&self, item: StoredItem) -> Result<()> {
        self.storage.items.save(item).await
    }

    pub async fn delete(&self, path: &str) -> Result<bool> {
        self.storage.items.delete(&self.repo_path(path)).await
    }

    /// Items at or below `path`
    pub async fn list(&self, path: &str) -> Result<Vec<StoredItem>> {
        self.storage.items.list(&self.repo_path(path)).await
    }

    pub async fn properties(&self, path: &str) -> Result<Properties> {
        self.storage.properties.properties(&self.repo_path(path)).await
    }

    pub async fn set_properties(&self, path: &str, properties: &Properties) -> Result<()> {
        self.storage
            .properties
            .set_properties(&self.repo_path(path), properties)
            .await
    }

    /// Store `content` at `path`
    ///
    /// Checksums declared by the client must match what was received. A
    /// checksum file path (`*.sha1`, ...) records the declared value on the
    /// item it describes instead of creating an item of its own.
    pub async fn deploy(
        &self,
        path: &str,
        content: ByteStream,
        declared: BTreeMap<ChecksumType, String>,
        last_modified: Option<DateTime<Utc>>,
        properties: &Properties,
    ) -> Result<RepoResource> {
        let repo_path = self.repo_path(path);
        let access = self.check_path(path);
        if !access.is_allowed() {
            return Err(RepoError::Forbidden {
                path: repo_path.to_string(),
                reason: access.reason,
                status: access.status,
            });
        }

        if let Some((target, checksum_type)) = naming::checksum_target(path) {
            return self.deploy_checksum(target, checksum_type, content).await;
        }

        let computed = self.storage.binaries.put(content).await?;
        let checksums = ChecksumsInfo::from_parts(&declared, Some(&computed));
        verify_declared(&checksums, &repo_path)?;

        let mut item = StoredItem::new(
            repo_path.clone(),
            &computed,
            checksums,
            last_modified.unwrap_or_else(Utc::now),
        );
        if let Some(existing) = self.storage.items.get(&repo_path).await? {
            item.created = existing.created;
        }
        let resource = item.to_resource();
        self.storage.items.save(item).await?;
        if !properties.is_empty() {
            self.storage.properties.set_properties(&repo_path, properties).await?;
        }

        tracing::debug!("Deployed {} ({} bytes, sha1 {})", repo_path, computed.size, computed.sha1);
        Ok(resource)
    }

    async fn deploy_checksum(
        &self,
        target: &str,
        checksum_type: ChecksumType,
        content: ByteStream,
    ) -> Result<RepoResource> {
        let body = content.map_ok(|chunk| chunk.to_vec()).try_concat().await?;
        let text = String::from_utf8_lossy(&body);
        let value = checksum_type.parse_file_content(&text).ok_or_else(|| {
            RepoError::Other(format!("Invalid {} checksum for {}", checksum_type, target))
        })?;

        let target_path = self.repo_path(target);
        let mut item = self
            .storage
            .items
            .get(&target_path)
            .await?
            .ok_or_else(|| RepoError::NotFound {
                path: target_path.to_string(),
                reason: "Checksum deployed before its file".to_string(),
            })?;

        let actual = item.checksums.actual(checksum_type).map(str::to_string);
        item.checksums
            .insert(ChecksumInfo::new(checksum_type, Some(value), actual));
        verify_declared(&item.checksums, &target_path)?;

        let resource = item.to_resource();
        self.storage.items.save(item).await?;
        Ok(resource)
    }
}

/// Declared values that disagree with the computed ones
fn verify_declared(checksums: &ChecksumsInfo, path: &RepoPath) -> Result<()> {
    for info in checksums.iter() {
        if let (Some(original), Some(actual)) = (&info.original, &info.actual) {
            if original != actual {
                tracing::warn!(
                    "Checksum mismatch for {}: declared {} {} but received {}",
                    path,
                    info.checksum_type,
                    original,
                    actual
                );
                return Err(ChecksumMismatch {
                    path: path.to_string(),
                    checksum_type: info.checksum_type,
                    expected: original.clone(),
                    actual: actual.clone(),
                }
                .into());
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Repository for LocalRepo {
    fn key(&self) -> &str {
        &self.descriptor.key
    }

    fn kind(&self) -> RepoKind {
        RepoKind::Local
    }

    fn handles_releases(&self) -> bool {
        self.descriptor.handle_releases
    }

    fn handles_snapshots(&self) -> bool {
        self.descriptor.handle_snapshots
    }

    fn checksum_policy(&self) -> ChecksumPolicy {
        self.policy
    }

    async fn get_info(&self, _ctx: &RequestContext, path: &RepoPath) -> Result<RepoResource> {
        let path = path.with_repo_key(self.key());
        let access = self.check_path(path.path());
        if !access.is_allowed() {
            return Ok(rejected(path, access));
        }

        match self.storage.items.get(&path).await? {
            Some(item) => Ok(item.to_resource()),
            None => Ok(RepoResource::unfound_with_status(
                path.clone(),
                format!("{} not found", path),
                404,
            )),
        }
    }

    async fn get_resource_stream_handle(
        &self,
        _ctx: &RequestContext,
        resource: &RepoResource,
    ) -> Result<ResourceStream> {
        let path = resource.repo_path().with_repo_key(self.key());
        let item = self
            .storage
            .items
            .get(&path)
            .await?
            .ok_or_else(|| RepoError::NotFound {
                path: path.to_string(),
                reason: "Item no longer stored".to_string(),
            })?;
        self.open_item(resource.clone(), &item).await
    }
}

impl std::fmt::Debug for LocalRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRepo")
            .field("key", &self.descriptor.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn bytes_stream(data: &'static [u8]) -> ByteStream {
        Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(data))]))
    }

    fn repo() -> LocalRepo {
        let mut descriptor = RepoDescriptor::new("libs-release");
        descriptor.handle_snapshots = false;
        LocalRepo::new(descriptor, Storage::in_memory()).unwrap()
    }

    const JAR: &str = "org/acme/lib/1.0/lib-1.0.jar";

    #[tokio::test]
    async fn test_deploy_and_read() {
        let repo = repo();
        let ctx = RequestContext::anonymous(RepoPath::new("libs-release", JAR));

        let deployed = repo
            .deploy(JAR, bytes_stream(b"hello world"), BTreeMap::new(), None, &Properties::new())
            .await
            .unwrap();
        assert_eq!(deployed.sha1(), Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"));

        let info = repo.get_info(&ctx, ctx.repo_path()).await.unwrap();
        assert!(info.is_found());
        assert_eq!(info.size(), 11);

        let content = repo
            .get_resource_stream_handle(&ctx, &info)
            .await
            .unwrap()
            .read_all()
            .await
            .unwrap();
        assert_eq!(&content[..], b"hello world");
    }

    #[tokio::test]
    async fn test_deploy_rejects_bad_declared_checksum() {
        let repo = repo();
        let mut declared = BTreeMap::new();
        declared.insert(ChecksumType::Sha1, "0".repeat(40));
        let err = repo
            .deploy(JAR, bytes_stream(b"hello world"), declared, None, &Properties::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::ChecksumMismatch(_)));
        assert!(repo.item(JAR).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deploy_checksum_file() {
        let repo = repo();
        repo.deploy(JAR, bytes_stream(b"hello world"), BTreeMap::new(), None, &Properties::new())
            .await
            .unwrap();
        repo.deploy(
            &format!("{}.sha1", JAR),
            bytes_stream(b"2aae6c35c94fcfb415dbe95f408b9ce91ee846ed  lib-1.0.jar"),
            BTreeMap::new(),
            None,
            &Properties::new(),
        )
        .await
        .unwrap();

        let item = repo.item(JAR).await.unwrap().unwrap();
        assert_eq!(
            item.checksums.original(ChecksumType::Sha1),
            Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
        );

        let bad = repo
            .deploy(
                &format!("{}.md5", JAR),
                bytes_stream(b"00000000000000000000000000000000"),
                BTreeMap::new(),
                None,
                &Properties::new(),
            )
            .await;
        assert!(matches!(bad, Err(RepoError::ChecksumMismatch(_))));
    }

    #[tokio::test]
    async fn test_rejected_paths() {
        let repo = repo();
        let snapshot = "org/acme/lib/1.0-SNAPSHOT/lib-1.0-SNAPSHOT.jar";
        let ctx = RequestContext::anonymous(RepoPath::new("libs-release", snapshot));

        let info = repo.get_info(&ctx, ctx.repo_path()).await.unwrap();
        assert!(!info.is_found());
        assert_eq!(info.status_code(), Some(404));

        let err = repo
            .deploy(snapshot, bytes_stream(b"x"), BTreeMap::new(), None, &Properties::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Forbidden { .. }));
    }
}
