//! Cache repository of a remote
//!
//! Holds what the remote downloaded, keyed `<remote>-cache`. Metadata and
//! non-unique snapshots expire once their last update is older than the
//! remote's retrieval cache period; releases never expire.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use depot_core::{ChecksumPolicy, RepoPath, RepoResource, RequestContext, naming};

use super::{LocalRepo, RepoKind, Repository, rejected};
use crate::config::{RemoteRepoDescriptor, RepoDescriptor};
use crate::error::{RepoError, Result};
use crate::security::AccessStatus;
use crate::storage::{Storage, StoredItem};
use crate::stream::ResourceStream;

pub struct LocalCacheRepo {
    store: LocalRepo,
    remote_key: String,
    retrieval_cache_period_secs: i64,
}

impl LocalCacheRepo {
    pub fn new(remote: &RemoteRepoDescriptor, storage: Storage) -> Result<Self> {
        let descriptor = RepoDescriptor {
            key: remote.cache_key(),
            description: Some(format!("Cache of {}", remote.key())),
            ..remote.base.clone()
        };
        Ok(Self {
            store: LocalRepo::new(descriptor, storage)?,
            remote_key: remote.key().to_string(),
            retrieval_cache_period_secs: remote.retrieval_cache_period_secs,
        })
    }

    pub fn remote_key(&self) -> &str {
        &self.remote_key
    }

    pub fn check_path(&self, path: &str) -> AccessStatus {
        self.store.check_path(path)
    }

    /// Whether a stored item is past its retrieval period
    pub fn is_expired(&self, item: &StoredItem) -> bool {
        if self.retrieval_cache_period_secs <= 0 || !naming::is_expirable(item.repo_path.path()) {
            return false;
        }
        item.last_updated + Duration::seconds(self.retrieval_cache_period_secs) <= Utc::now()
    }

    /// Cached copy of `path`, flagged expired if stale
    pub async fn cached_resource(&self, path: &str) -> Result<Option<RepoResource>> {
        Ok(self.store.item(path).await?.map(|item| {
            let expired = self.is_expired(&item);
            item.to_resource().with_expired(expired)
        }))
    }

    /// Open a cached resource
    pub async fn open(&self, resource: &RepoResource) -> Result<ResourceStream> {
        let path = resource.repo_path().path();
        let item = self.store.item(path).await?.ok_or_else(|| RepoError::NotFound {
            path: format!("{}:{}", self.key(), path),
            reason: "Item no longer cached".to_string(),
        })?;
        self.store.open_item(resource.clone(), &item).await
    }

    pub async fn save(&self, item: StoredItem) -> Result<()> {
        self.store.save(item).await
    }

    pub fn store(&self) -> &LocalRepo {
        &self.store
    }

    /// Mark `path` as freshly validated
    pub async fn unexpire(&self, path: &str) -> Result<bool> {
        let repo_path = RepoPath::new(self.key(), path);
        let touched = self.store.storage().items.touch(&repo_path, Utc::now()).await?;
        if touched {
            tracing::debug!("Unexpired {}", repo_path);
        }
        Ok(touched)
    }

    /// Force expirable items at (or below, if `recursive`) `path` to expire
    ///
    /// Returns the number of items zapped. Releases are left alone.
    pub async fn zap(&self, path: &str, recursive: bool) -> Result<usize> {
        let items = if recursive {
            self.store.list(path).await?
        } else {
            self.store.item(path).await?.into_iter().collect()
        };

        let mut zapped = 0;
        for item in items {
            if !naming::is_expirable(item.repo_path.path()) {
                continue;
            }
            if self
                .store
                .storage()
                .items
                .touch(&item.repo_path, DateTime::<Utc>::UNIX_EPOCH)
                .await?
            {
                zapped += 1;
            }
        }

        if zapped > 0 {
            tracing::info!("Zapped {} item(s) under {}:{}", zapped, self.key(), path);
        }
        Ok(zapped)
    }
}

#[async_trait]
impl Repository for LocalCacheRepo {
    fn key(&self) -> &str {
        self.store.key()
    }

    fn kind(&self) -> RepoKind {
        RepoKind::Cache
    }

    fn handles_releases(&self) -> bool {
        self.store.handles_releases()
    }

    fn handles_snapshots(&self) -> bool {
        self.store.handles_snapshots()
    }

    fn checksum_policy(&self) -> ChecksumPolicy {
        self.store.checksum_policy()
    }

    async fn get_info(&self, _ctx: &RequestContext, path: &RepoPath) -> Result<RepoResource> {
        let path = path.with_repo_key(self.key());
        let access = self.check_path(path.path());
        if !access.is_allowed() {
            return Ok(rejected(path, access));
        }

        match self.cached_resource(path.path()).await? {
            Some(resource) => Ok(resource),
            None => Ok(RepoResource::unfound_with_status(
                path.clone(),
                format!("{} not cached", path),
                404,
            )),
        }
    }

    async fn get_resource_stream_handle(
        &self,
        _ctx: &RequestContext,
        resource: &RepoResource,
    ) -> Result<ResourceStream> {
        self.open(resource).await
    }
}

impl std::fmt::Debug for LocalCacheRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCacheRepo")
            .field("key", &self.key())
            .field("remote", &self.remote_key)
            .finish()
    }
}
