//! Remote repository proxy
//!
//! A remote repository answers lookups from its cache when it can and from
//! the origin when it must. Downloads go through the [`SingleFlight`]
//! coordinator so concurrent requests for one path share a single transfer,
//! and the transfer itself runs in its own task: a client going away does not
//! abort a cache write other requests are waiting on.
//!
//! Remote failures flip the repository to assumed-offline for a cooldown
//! window (see [`OfflineState`]); while offline the origin is not contacted
//! and stale cached copies are served rather than nothing.

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use depot_core::{
    ChecksumPolicy, ChecksumType, ChecksumsInfo, ComputedChecksums, Properties, RepoPath,
    RepoResource, RequestContext, ResourceInfo, naming,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::{LocalCacheRepo, OfflineState, RepoKind, Repository, check_path, rejected};
use crate::config::{RemoteRepoDescriptor, RepoPatterns};
use crate::error::{RepoError, Result};
use crate::interceptor::DownloadInterceptor;
use crate::security::PermissionGate;
use crate::single_flight::{Flight, FlightLeader, SingleFlight};
use crate::storage::{Storage, StoredItem};
use crate::stream::{ByteStream, ResourceStream};
use crate::transport::{RemoteInfo, RemoteItem, RemoteTransport};
use crate::ttl_cache::TtlCache;

/// Upper bound on remembered folder listings per repository
const MAX_LISTINGS: u64 = 10_000;

/// Collaborators a remote repository is wired with
#[derive(Clone)]
pub struct RemoteRepoParts {
    pub storage: Storage,
    pub transport: Arc<dyn RemoteTransport>,
    pub gate: Arc<dyn PermissionGate>,
    pub single_flight: SingleFlight,
    pub interceptors: Vec<Arc<dyn DownloadInterceptor>>,
    /// Shared global offline switch
    pub global_offline: Arc<AtomicBool>,
}

pub struct RemoteRepo {
    descriptor: RemoteRepoDescriptor,
    patterns: RepoPatterns,
    policy: ChecksumPolicy,
    cache: Arc<LocalCacheRepo>,
    transport: Arc<dyn RemoteTransport>,
    gate: Arc<dyn PermissionGate>,
    single_flight: SingleFlight,
    interceptors: Vec<Arc<dyn DownloadInterceptor>>,
    global_offline: Arc<AtomicBool>,
    offline: OfflineState,
    missed: TtlCache<String, RepoResource>,
    listings: TtlCache<String, Arc<Vec<RemoteItem>>>,
    me: Weak<RemoteRepo>,
}

impl RemoteRepo {
    pub fn new(descriptor: RemoteRepoDescriptor, parts: RemoteRepoParts) -> Result<Arc<Self>> {
        let patterns = descriptor.base.patterns()?;
        let cache = Arc::new(LocalCacheRepo::new(&descriptor, parts.storage)?);
        let key = descriptor.key().to_string();

        Ok(Arc::new_cyclic(|me| Self {
            policy: ChecksumPolicy::new(descriptor.base.checksum_policy),
            offline: OfflineState::new(&key, descriptor.assumed_offline_period_secs),
            missed: TtlCache::new(
                format!("{}-missed", key),
                descriptor.missed_retrieval_cache_period_secs,
            ),
            listings: TtlCache::with_capacity(
                format!("{}-listings", key),
                descriptor.remote_listing_cache_period_secs,
                Some(MAX_LISTINGS),
            ),
            patterns,
            cache,
            transport: parts.transport,
            gate: parts.gate,
            single_flight: parts.single_flight,
            interceptors: parts.interceptors,
            global_offline: parts.global_offline,
            descriptor,
            me: me.clone(),
        }))
    }

    pub fn descriptor(&self) -> &RemoteRepoDescriptor {
        &self.descriptor
    }

    pub fn cache(&self) -> &Arc<LocalCacheRepo> {
        &self.cache
    }

    pub fn transport(&self) -> &Arc<dyn RemoteTransport> {
        &self.transport
    }

    pub fn offline_state(&self) -> &OfflineState {
        &self.offline
    }

    /// Negative results remembered from the origin
    pub fn missed_cache(&self) -> &TtlCache<String, RepoResource> {
        &self.missed
    }

    pub fn listing_cache(&self) -> &TtlCache<String, Arc<Vec<RemoteItem>>> {
        &self.listings
    }

    /// Administratively offline, globally offline or assumed offline
    pub fn is_offline(&self) -> bool {
        self.descriptor.offline
            || self.global_offline.load(Ordering::Acquire)
            || self.offline.is_assumed_offline()
    }

    fn arc(&self) -> Result<Arc<Self>> {
        self.me
            .upgrade()
            .ok_or_else(|| RepoError::Other(format!("Repository {} is shut down", self.key())))
    }

    /// Record a failed remote call
    fn remote_failure(&self, e: RepoError) -> RepoError {
        if !matches!(e, RepoError::NotFound { .. }) {
            tracing::warn!("Remote repository {} failed: {}", self.key(), e);
            self.offline.mark_failed();
        }
        e
    }

    fn remote_resource(&self, path: RepoPath, info: RemoteInfo) -> RepoResource {
        let mut resource_info = ResourceInfo::new(
            info.size.unwrap_or(0),
            info.last_modified.unwrap_or_else(Utc::now),
        )
        .with_checksums(ChecksumsInfo::from_parts(&info.checksums, None));
        resource_info.mime_type = Some(naming::mime_type(path.path()).to_string());
        RepoResource::found(path, resource_info)
    }

    /// Drop negative and listing entries made stale by a newly cached path
    fn purge(&self, path: &str) {
        self.missed.remove(&path.to_string());
        let parent = path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("");
        self.listings.remove(&parent.to_string());
    }

    /// Decide between the cached copy and a fresh download, and open the
    /// winner
    ///
    /// A download is only warranted when the origin is reachable and either
    /// nothing is cached or the cached copy is expired and the origin has a
    /// strictly newer one. A transient download failure falls back to the
    /// expired copy unless the repository hard-fails.
    pub async fn download_and_save(
        &self,
        ctx: &RequestContext,
        remote: &RepoResource,
        cached: Option<RepoResource>,
    ) -> Result<ResourceStream> {
        let path = remote.repo_path().path();
        let from_origin = remote.is_found() && remote.repo_path().repo_key() == self.key();
        let offline = self.is_offline();

        let warranted = !offline
            && from_origin
            && match &cached {
                Some(cached) if cached.is_expired() => remote.is_newer_than(cached),
                Some(_) => false,
                None => true,
            };

        if warranted {
            return match self.fetch_coordinated(ctx, remote).await {
                Ok(stream) => Ok(stream),
                Err(e) if self.descriptor.hard_fail => Err(e),
                Err(e) if e.is_transient() || matches!(e, RepoError::NotFound { .. }) => {
                    match &cached {
                        Some(expired) => {
                            tracing::warn!(
                                "Download of {} failed, serving expired {}: {}",
                                remote.repo_path(),
                                expired.repo_path(),
                                e
                            );
                            self.cache.open(expired).await
                        }
                        None if e.is_transient() => Err(RepoError::NotFound {
                            path: remote.repo_path().to_string(),
                            reason: format!("Remote repository {} is offline", self.key()),
                        }),
                        None => Err(e),
                    }
                }
                Err(e) => Err(e),
            };
        }

        let Some(mut cached) = cached else {
            let reason = if offline {
                format!("Remote repository {} is offline", self.key())
            } else {
                "Not available in the cache".to_string()
            };
            return Err(RepoError::NotFound {
                path: remote.repo_path().to_string(),
                reason,
            });
        };

        if from_origin && cached.is_expired() && !offline {
            // The origin has nothing newer
            self.cache.unexpire(path).await?;
            cached = cached.with_expired(false);
        }
        if self.descriptor.synchronize_properties && !offline {
            self.synchronize_properties(path).await;
        }
        self.cache.open(&cached).await
    }

    async fn fetch_coordinated(
        &self,
        ctx: &RequestContext,
        remote: &RepoResource,
    ) -> Result<ResourceStream> {
        let me = self.arc()?;
        let key = remote.repo_path().to_string();
        let ctx = ctx.clone();
        let remote = remote.clone();

        let task = match self.single_flight.begin_or_join(&key).await? {
            Flight::Joined(stream) => {
                tracing::debug!("Served {} from a concurrent download", key);
                return Ok(stream);
            }
            Flight::Leader(leader) => {
                tokio::spawn(async move { me.download_and_notify(ctx, remote, Some(leader)).await })
            }
            Flight::Independent => {
                tokio::spawn(async move { me.download_and_notify(ctx, remote, None).await })
            }
        };

        let saved = task
            .await
            .map_err(|e| RepoError::Other(format!("Download of {} aborted: {}", key, e)))??;
        self.cache.open(&saved).await
    }

    /// Download into the cache, release the flight's waiters (if leading),
    /// then run the post-download hooks when a new copy was stored
    async fn download_and_notify(
        self: Arc<Self>,
        ctx: RequestContext,
        remote: RepoResource,
        leader: Option<FlightLeader>,
    ) -> Result<RepoResource> {
        let (saved, downloaded) = match self.download_to_cache(&ctx, &remote).await {
            Ok(done) => done,
            Err(e) => {
                if let Some(leader) = leader {
                    leader.fail(e.to_string());
                }
                return Err(e);
            }
        };

        if let Some(leader) = leader {
            let cache = self.cache.clone();
            let prepared = saved.clone();
            leader
                .complete(|| {
                    let cache = cache.clone();
                    let resource = prepared.clone();
                    async move { cache.open(&resource).await }
                })
                .await;
        }
        if downloaded {
            self.after_download(&ctx, &saved).await;
        }
        Ok(saved)
    }

    /// Transfer `remote` into the cache and return the cached resource
    ///
    /// The flag is false when a fresh copy was cached in the meantime and
    /// nothing was transferred.
    async fn download_to_cache(
        &self,
        ctx: &RequestContext,
        remote: &RepoResource,
    ) -> Result<(RepoResource, bool)> {
        let path = remote.repo_path().path().to_string();
        let cache_path = RepoPath::new(self.cache.key(), &path);

        let access = self.cache.check_path(&path);
        if !access.is_allowed() {
            return Err(RepoError::Forbidden {
                path: cache_path.to_string(),
                reason: access.reason,
                status: access.status,
            });
        }

        // Another download may have finished since the lookup
        if let Some(cached) = self.cache.cached_resource(&path).await? {
            if !cached.is_expired() {
                tracing::debug!("{} was cached in the meantime", cache_path);
                return Ok((cached, false));
            }
        }

        let mut declared: BTreeMap<ChecksumType, String> = remote
            .checksums()
            .map(|checksums| {
                checksums
                    .iter()
                    .filter_map(|info| info.original.clone().map(|v| (info.checksum_type, v)))
                    .collect()
            })
            .unwrap_or_default();
        let mut last_modified = remote.last_modified();
        let binaries = self.cache.store().storage().binaries.clone();

        let mut alternate = None;
        for interceptor in &self.interceptors {
            if let Some(content) = interceptor.alternate_content(ctx, remote).await? {
                tracing::debug!("Using alternate content for {}", cache_path);
                alternate = Some(content);
                break;
            }
        }

        let computed = match alternate {
            Some(content) => binaries.put(content).await?,
            None => match self.existing_binary(&declared).await? {
                Some(computed) => {
                    tracing::debug!("Reusing stored binary {} for {}", computed.sha1, cache_path);
                    computed
                }
                None => {
                    let download = self
                        .transport
                        .get_stream(&path)
                        .await
                        .map_err(|e| self.remote_failure(e))?;
                    for (checksum_type, value) in download.info.checksums {
                        declared.entry(checksum_type).or_insert(value);
                    }
                    if last_modified.is_none() {
                        last_modified = download.info.last_modified;
                    }
                    // Only a broken transfer counts against the origin
                    let broken = Arc::new(AtomicBool::new(false));
                    let flag = broken.clone();
                    let body: ByteStream = Box::pin(
                        download
                            .content
                            .inspect_err(move |_| flag.store(true, Ordering::Release)),
                    );
                    binaries.put(body).await.map_err(|e| {
                        if broken.load(Ordering::Acquire) {
                            self.remote_failure(RepoError::NetworkError {
                                message: format!("Transfer of {} broke off: {}", path, e),
                            })
                        } else {
                            e
                        }
                    })?
                }
            },
        };

        self.fill_missing_checksums(&path, &mut declared).await;
        let checksums = ChecksumsInfo::from_parts(&declared, Some(&computed));
        if let Err(mismatch) = self.policy.verify(&checksums, &cache_path) {
            tracing::warn!("Refusing to cache {}: {}", cache_path, mismatch);
            return Err(mismatch.into());
        }

        let properties = if self.descriptor.synchronize_properties {
            self.remote_properties(&path).await
        } else {
            None
        };

        let item = StoredItem::new(
            cache_path.clone(),
            &computed,
            checksums,
            last_modified.unwrap_or_else(Utc::now),
        );
        let saved = item.to_resource();
        self.cache.save(item).await?;
        if let Some(properties) = properties {
            self.cache.store().set_properties(&path, &properties).await?;
        }

        self.offline.mark_online();
        self.purge(&path);
        tracing::info!(
            "Cached {} ({} bytes) from {}",
            cache_path,
            computed.size,
            self.transport.base_url()
        );
        Ok((saved, true))
    }

    /// Stored binary matching the declared SHA-1, if any
    async fn existing_binary(
        &self,
        declared: &BTreeMap<ChecksumType, String>,
    ) -> Result<Option<ComputedChecksums>> {
        let Some(sha1) = declared.get(&ChecksumType::Sha1) else {
            return Ok(None);
        };
        let binaries = &self.cache.store().storage().binaries;
        if !binaries.exists(sha1).await? {
            return Ok(None);
        }
        binaries.describe(sha1).await
    }

    /// Ask the origin for checksum files it did not send as headers
    async fn fill_missing_checksums(
        &self,
        path: &str,
        declared: &mut BTreeMap<ChecksumType, String>,
    ) {
        for checksum_type in [ChecksumType::Sha1, ChecksumType::Md5] {
            if declared.contains_key(&checksum_type) {
                continue;
            }
            let checksum_path = naming::checksum_path(path, checksum_type);
            match self.transport.get_text(&checksum_path).await {
                Ok(Some(text)) => match checksum_type.parse_file_content(&text) {
                    Some(value) => {
                        declared.insert(checksum_type, value);
                    }
                    None => tracing::debug!("Ignoring malformed checksum file {}", checksum_path),
                },
                Ok(None) => {}
                Err(e) => tracing::debug!("Could not fetch {}: {}", checksum_path, e),
            }
        }
    }

    async fn remote_properties(&self, path: &str) -> Option<Properties> {
        match self.transport.get_properties(path).await {
            Ok(properties) => properties,
            Err(e) => {
                tracing::debug!("Could not fetch properties of {} from {}: {}", path, self.key(), e);
                None
            }
        }
    }

    /// Copy the origin's properties of `path` onto the cached copy
    async fn synchronize_properties(&self, path: &str) {
        if let Some(properties) = self.remote_properties(path).await {
            if let Err(e) = self.cache.store().set_properties(path, &properties).await {
                tracing::warn!("Failed to store properties of {}: {}", path, e);
            }
        }
    }

    async fn after_download(&self, ctx: &RequestContext, saved: &RepoResource) {
        for interceptor in &self.interceptors {
            interceptor.after_download(ctx, saved).await;
        }

        let path = saved.repo_path().path();
        let Some(companion) = naming::companion(
            path,
            self.descriptor.fetch_jars_eagerly,
            self.descriptor.fetch_sources_eagerly,
        ) else {
            return;
        };
        let Ok(me) = self.arc() else {
            return;
        };
        let ctx = ctx.for_path(RepoPath::new(self.key(), &companion));
        tokio::spawn(async move { me.prefetch(ctx).await });
    }

    /// Best-effort download of `ctx`'s path into the cache
    async fn prefetch(&self, ctx: RequestContext) {
        let path = ctx.repo_path().clone();
        match self.cache.cached_resource(path.path()).await {
            Ok(Some(cached)) if !cached.is_expired() => return,
            Err(e) => {
                tracing::debug!("Skipping pre-fetch of {}: {}", path, e);
                return;
            }
            _ => {}
        }

        let resource = match self.get_info(&ctx, &path).await {
            Ok(resource) if resource.is_found() => resource,
            Ok(_) => {
                tracing::debug!("Nothing to pre-fetch at {}", path);
                return;
            }
            Err(e) => {
                tracing::debug!("Pre-fetch of {} failed: {}", path, e);
                return;
            }
        };

        match self.get_resource_stream_handle(&ctx, &resource).await {
            Ok(_) => tracing::debug!("Pre-fetched {}", path),
            Err(e) => tracing::debug!("Pre-fetch of {} failed: {}", path, e),
        }
    }

    /// Children of a remote folder, from the listing cache when possible
    pub async fn list_remote(&self, path: &str) -> Result<Vec<RemoteItem>> {
        if !self.descriptor.list_remote_folder_items {
            return Ok(Vec::new());
        }
        let key = path.trim_matches('/').to_string();
        if let Some(items) = self.listings.get(&key) {
            return Ok(items.as_ref().clone());
        }
        if self.is_offline() {
            return Ok(Vec::new());
        }

        match self.transport.list(&key).await {
            Ok(items) => {
                self.offline.mark_online();
                let items = items.unwrap_or_default();
                self.listings.put(key, Arc::new(items.clone()));
                Ok(items)
            }
            Err(e) => {
                let e = self.remote_failure(e);
                if self.descriptor.hard_fail {
                    Err(e)
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    /// Empty the missed-retrieval and listing caches
    pub fn clear_caches(&self) {
        self.missed.clear();
        self.listings.clear();
    }

    /// Expire cached items at (or below) `path` and forget remembered misses
    pub async fn invalidate(&self, path: &str, recursive: bool) -> Result<usize> {
        let path = path.trim_matches('/').to_string();
        let zapped = self.cache.zap(&path, recursive).await?;

        if recursive {
            let prefix = if path.is_empty() { String::new() } else { format!("{}/", path) };
            let matches = |key: &String| key == &path || key.starts_with(&prefix);
            self.missed.remove_where(matches);
            self.listings.remove_where(matches);
        } else {
            self.missed.remove(&path);
            self.listings.remove(&path);
        }
        Ok(zapped)
    }
}

#[async_trait]
impl Repository for RemoteRepo {
    fn key(&self) -> &str {
        self.descriptor.key()
    }

    fn kind(&self) -> RepoKind {
        RepoKind::Remote
    }

    fn handles_releases(&self) -> bool {
        self.descriptor.base.handle_releases
    }

    fn handles_snapshots(&self) -> bool {
        self.descriptor.base.handle_snapshots
    }

    fn checksum_policy(&self) -> ChecksumPolicy {
        self.policy
    }

    async fn get_info(&self, ctx: &RequestContext, path: &RepoPath) -> Result<RepoResource> {
        let path = path.with_repo_key(self.key());

        let access = self.gate.check_download_allowed(ctx, &path);
        if !access.is_allowed() {
            return Ok(rejected(path, access));
        }
        let access = check_path(&self.descriptor.base, &self.patterns, path.path());
        if !access.is_allowed() {
            return Ok(rejected(path, access));
        }
        if naming::is_checksum(path.path()) {
            return Ok(RepoResource::unfound_with_status(
                path,
                "Checksums are not fetched from remote repositories",
                404,
            ));
        }

        if let Some(missed) = self.missed.get(&path.path().to_string()) {
            tracing::debug!("{} answered from the missed-retrieval cache", path);
            return Ok(missed);
        }

        let cached = self.cache.cached_resource(path.path()).await?;
        if let Some(cached) = &cached {
            if !cached.is_expired() {
                tracing::debug!("{} served from {}", path, self.cache.key());
                return Ok(cached.clone().with_response_repo_path(cached.repo_path().clone()));
            }
        }

        if self.is_offline() {
            return Ok(match cached {
                Some(expired) => {
                    tracing::debug!("{} is offline, serving expired {}", self.key(), expired.repo_path());
                    expired
                }
                None => RepoResource::unfound_with_status(
                    path,
                    format!("Remote repository {} is offline", self.key()),
                    404,
                ),
            });
        }

        match self.transport.head_info(path.path()).await {
            Ok(info) if info.found => {
                self.offline.mark_online();
                Ok(self.remote_resource(path, info))
            }
            Ok(info) => {
                self.offline.mark_online();
                if let Some(expired) = cached {
                    tracing::debug!("{} gone from origin, keeping expired cached copy", path);
                    return Ok(expired);
                }
                let unfound = RepoResource::unfound_with_status(
                    path.clone(),
                    format!("{} not found on {}", path.path(), self.transport.base_url()),
                    info.status.or(Some(404)),
                );
                self.missed.put(path.path().to_string(), unfound.clone());
                Ok(unfound)
            }
            Err(e) => {
                let e = self.remote_failure(e);
                if self.descriptor.hard_fail {
                    return Err(RepoError::RemoteUnavailable {
                        repo: self.key().to_string(),
                        message: e.to_string(),
                    });
                }
                Ok(match cached {
                    Some(expired) => expired,
                    None => RepoResource::unfound_with_status(
                        path,
                        format!("Remote repository {} failed: {}", self.key(), e),
                        404,
                    ),
                })
            }
        }
    }

    async fn get_resource_stream_handle(
        &self,
        ctx: &RequestContext,
        resource: &RepoResource,
    ) -> Result<ResourceStream> {
        let cached = self.cache.cached_resource(resource.repo_path().path()).await?;
        self.download_and_save(ctx, resource, cached).await
    }
}

impl std::fmt::Debug for RemoteRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRepo")
            .field("key", &self.key())
            .field("url", &self.descriptor.url)
            .field("offline", &self.is_offline())
            .finish()
    }
}
