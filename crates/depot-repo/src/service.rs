//! Repository service
//!
//! The entry point front ends talk to. Wires configuration, storage,
//! permission gate and transports into the repository graph, and exposes
//! resolution, responding, deploy and the cache management hooks.

use bytes::Bytes;
use depot_core::{ChecksumType, RepoPath, RepoResource, RequestContext};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;

use crate::config::{DepotConfig, GLOBAL_REPO_KEY};
use crate::download::{DownloadEngine, Resolution};
use crate::error::{RepoError, Result};
use crate::handle_pool::HandlePool;
use crate::interceptor::DownloadInterceptor;
use crate::merge::MergedChecksumCache;
use crate::repo::{LocalRepo, RemoteRepo, RemoteRepoParts, Repositories, VirtualRepo};
use crate::resolver::RepositoryResolver;
use crate::responder::{RequestResponder, ResponseOutcome, ResponseSink};
use crate::security::{AllowAll, PermissionGate};
use crate::single_flight::SingleFlight;
use crate::storage::Storage;
use crate::stream::ByteStream;
use crate::transport::{RemoteItem, RemoteTransport, create_transport};

/// Builder for [`RepositoryService`]
pub struct RepositoryServiceBuilder {
    config: DepotConfig,
    storage: Option<Storage>,
    gate: Arc<dyn PermissionGate>,
    transports: HashMap<String, Arc<dyn RemoteTransport>>,
    interceptors: Vec<Arc<dyn DownloadInterceptor>>,
}

impl RepositoryServiceBuilder {
    pub fn new(config: DepotConfig) -> Self {
        Self {
            config,
            storage: None,
            gate: Arc::new(AllowAll),
            transports: HashMap::new(),
            interceptors: Vec::new(),
        }
    }

    /// Use these stores instead of the on-disk ones under the storage path
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn gate(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Replace the transport of remote repository `key`
    pub fn transport(mut self, key: impl Into<String>, transport: Arc<dyn RemoteTransport>) -> Self {
        self.transports.insert(key.into(), transport);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn DownloadInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Validate the configuration and build the service
    pub fn build(mut self) -> Result<RepositoryService> {
        self.config.validate()?;

        let storage = match self.storage.take() {
            Some(storage) => storage,
            None => Storage::on_disk(&self.config.storage_path()?)?,
        };

        let settings = &self.config.download;
        let pool = Arc::new(HandlePool::new());
        let single_flight = SingleFlight::with_pool(settings.wait_timeout, pool.clone());
        let global_offline = Arc::new(AtomicBool::new(self.config.offline));

        let mut repositories = Repositories::new();
        for descriptor in &self.config.local_repositories {
            let local = LocalRepo::new(descriptor.clone(), storage.clone())?;
            repositories.add_local(Arc::new(local));
        }

        for descriptor in &self.config.remote_repositories {
            let transport = match self.transports.remove(descriptor.key()) {
                Some(transport) => transport,
                None => create_transport(descriptor)?,
            };
            let parts = RemoteRepoParts {
                storage: storage.clone(),
                transport,
                gate: self.gate.clone(),
                single_flight: single_flight.clone(),
                interceptors: self.interceptors.clone(),
                global_offline: global_offline.clone(),
            };
            repositories.add_remote(RemoteRepo::new(descriptor.clone(), parts)?);
        }

        for descriptor in &self.config.virtual_repositories {
            repositories.add_virtual(Arc::new(VirtualRepo::new(descriptor.clone())?));
        }

        if let Some(unused) = self.transports.keys().next() {
            tracing::warn!("Transport given for unknown remote repository {}", unused);
        }

        let repositories = Arc::new(repositories);
        let merged = Arc::new(MergedChecksumCache::new());
        let engine = DownloadEngine::new(RepositoryResolver::new(repositories.clone()), merged.clone());
        let responder = RequestResponder::new(settings.stream_timeout);

        tracing::debug!("Repository service ready: {:?}", repositories);
        Ok(RepositoryService {
            config: self.config,
            storage,
            gate: self.gate,
            repositories,
            engine,
            responder,
            merged,
            single_flight,
            pool,
            global_offline,
        })
    }
}

pub struct RepositoryService {
    config: DepotConfig,
    storage: Storage,
    gate: Arc<dyn PermissionGate>,
    repositories: Arc<Repositories>,
    engine: DownloadEngine,
    responder: RequestResponder,
    merged: Arc<MergedChecksumCache>,
    single_flight: SingleFlight,
    pool: Arc<HandlePool>,
    global_offline: Arc<AtomicBool>,
}

impl RepositoryService {
    pub fn builder(config: DepotConfig) -> RepositoryServiceBuilder {
        RepositoryServiceBuilder::new(config)
    }

    pub fn config(&self) -> &DepotConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn repositories(&self) -> &Arc<Repositories> {
        &self.repositories
    }

    pub fn single_flight(&self) -> &SingleFlight {
        &self.single_flight
    }

    pub fn merged_checksums(&self) -> &Arc<MergedChecksumCache> {
        &self.merged
    }

    pub fn handle_pool(&self) -> &Arc<HandlePool> {
        &self.pool
    }

    /// Resolve the request in `ctx`
    ///
    /// A request the gate refuses resolves to an unfound resource carrying
    /// the gate's status; it is not remembered anywhere.
    pub async fn resolve(&self, ctx: &RequestContext) -> Result<Resolution> {
        let path = ctx.repo_path();
        let access = self.gate.check_download_allowed(ctx, path);
        if !access.is_allowed() {
            tracing::debug!("Download of {} refused: {}", path, access.reason);
            return Ok(Resolution::unfound(RepoResource::unfound_with_status(
                path.clone(),
                access.reason,
                access.status,
            )));
        }
        self.engine.resolve(ctx).await
    }

    /// Write a resolution to `sink`
    pub async fn respond(
        &self,
        ctx: &RequestContext,
        resolution: &Resolution,
        sink: &mut dyn ResponseSink,
    ) -> ResponseOutcome {
        self.responder.respond(ctx, resolution, sink).await
    }

    /// Resolve and read the whole content
    pub async fn download(&self, ctx: &RequestContext) -> Result<(RepoResource, Bytes)> {
        let resolution = self.resolve(ctx).await?;
        if !resolution.is_found() {
            let resource = &resolution.resource;
            let reason = resource.reason().unwrap_or("Not found").to_string();
            return Err(match resource.status_code() {
                Some(status @ (401 | 403)) => RepoError::Forbidden {
                    path: resource.repo_path().to_string(),
                    reason,
                    status,
                },
                _ => RepoError::NotFound {
                    path: resource.repo_path().to_string(),
                    reason,
                },
            });
        }

        let stream = resolution.open(ctx).await?;
        let resource = stream.resource().clone();
        let content = stream.read_all().await?;
        Ok((resource, content))
    }

    /// Store `content` at the local repository path of `ctx`
    pub async fn deploy(
        &self,
        ctx: &RequestContext,
        content: Bytes,
        declared: BTreeMap<ChecksumType, String>,
    ) -> Result<RepoResource> {
        let path = ctx.repo_path();
        let local = self.repositories.local(path.repo_key()).ok_or_else(|| {
            if self.repositories.get(path.repo_key()).is_some()
                || self.repositories.virtual_repo(path.repo_key()).is_some()
            {
                RepoError::Forbidden {
                    path: path.to_string(),
                    reason: format!("{} is not a local repository", path.repo_key()),
                    status: 403,
                }
            } else {
                RepoError::RepositoryNotFound {
                    name: path.repo_key().to_string(),
                }
            }
        })?;

        let access = self.gate.check_deploy_allowed(ctx, path, content.len() as u64);
        if !access.is_allowed() {
            return Err(RepoError::Forbidden {
                path: path.to_string(),
                reason: access.reason,
                status: access.status,
            });
        }

        let stream: ByteStream = Box::pin(futures::stream::once(async move { Ok(content) }));
        let resource = local
            .deploy(path.path(), stream, declared, None, &ctx.request.properties)
            .await?;
        tracing::info!("Deployed {}", resource.repo_path());
        Ok(resource)
    }

    /// Empty every in-memory cache: misses, listings and merged checksums
    pub fn clear_caches(&self) {
        for remote in self.repositories.remotes() {
            remote.clear_caches();
        }
        self.merged.clear();
        tracing::info!("Cleared repository caches");
    }

    /// Expire cached items at (or below) `path`
    ///
    /// `path` may name a remote, its cache, a virtual repository or the
    /// global aggregate; every remote it covers is invalidated. Returns the
    /// number of cached items that were expired.
    pub async fn invalidate(&self, path: &RepoPath, recursive: bool) -> Result<usize> {
        let key = path.repo_key();
        let remotes: Vec<Arc<RemoteRepo>> = if key == GLOBAL_REPO_KEY {
            self.repositories.remotes().cloned().collect()
        } else if let Some(remote) = self.repositories.remote(key) {
            vec![remote.clone()]
        } else if let Some(cache) = self.repositories.cache(key) {
            self.repositories
                .remote(cache.remote_key())
                .cloned()
                .into_iter()
                .collect()
        } else if let Some(virtual_repo) = self.repositories.virtual_repo(key) {
            virtual_repo.members(&self.repositories)?.remotes
        } else if self.repositories.local(key).is_some() {
            Vec::new()
        } else {
            return Err(RepoError::RepositoryNotFound {
                name: key.to_string(),
            });
        };

        let mut zapped = 0;
        for remote in remotes {
            zapped += remote.invalidate(path.path(), recursive).await?;
        }
        self.merged.invalidate_path(path.path().trim_matches('/'), recursive);
        Ok(zapped)
    }

    /// Children of a folder of remote repository `key`
    pub async fn list_remote(&self, key: &str, path: &str) -> Result<Vec<RemoteItem>> {
        let remote = self
            .repositories
            .remote(key)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                name: key.to_string(),
            })?;
        remote.list_remote(path).await
    }

    /// Switch global offline mode; no remote is contacted while it is on
    pub fn set_global_offline(&self, offline: bool) {
        let previous = self.global_offline.swap(offline, Ordering::AcqRel);
        if previous != offline {
            tracing::info!("Global offline mode {}", if offline { "enabled" } else { "disabled" });
        }
    }

    pub fn is_global_offline(&self) -> bool {
        self.global_offline.load(Ordering::Acquire)
    }

    /// Start the periodic sweep closing unclaimed prepared handles
    pub fn spawn_handle_reaper(&self) -> JoinHandle<()> {
        let settings = &self.config.download;
        self.pool
            .spawn_reaper(settings.reaper_interval, settings.handle_max_idle)
    }
}

impl std::fmt::Debug for RepositoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryService")
            .field("repositories", &self.repositories)
            .field("offline", &self.is_global_offline())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RemoteRepoDescriptor, RepoDescriptor, VirtualRepoDescriptor};
    use crate::security::AnonymousReadOnly;
    use crate::transport::MockTransport;
    use chrono::Utc;
    use depot_core::{DownloadRequest, Principal};

    fn config() -> DepotConfig {
        let mut config = DepotConfig::default();
        config.add_local(RepoDescriptor::new("libs")).unwrap();
        config
            .add_remote(RemoteRepoDescriptor::new("central", "https://repo.example.com"))
            .unwrap();
        config
            .add_virtual(VirtualRepoDescriptor::new(
                "public",
                vec!["libs".to_string(), "central".to_string()],
            ))
            .unwrap();
        config
    }

    fn service(mock: Arc<MockTransport>) -> RepositoryService {
        RepositoryService::builder(config())
            .storage(Storage::in_memory())
            .gate(Arc::new(AnonymousReadOnly))
            .transport("central", mock)
            .build()
            .unwrap()
    }

    fn user_ctx(key: &str, path: &str) -> RequestContext {
        RequestContext::new(
            Principal::user("deployer"),
            DownloadRequest::new(RepoPath::new(key, path)),
        )
    }

    #[tokio::test]
    async fn test_deploy_requires_local_and_permission() {
        let service = service(Arc::new(MockTransport::new("https://repo.example.com")));
        let path = "org/acme/lib/1.0/lib-1.0.jar";

        let anonymous = RequestContext::anonymous(RepoPath::new("libs", path));
        let err = service
            .deploy(&anonymous, Bytes::from_static(b"jar"), BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);

        let err = service
            .deploy(&user_ctx("public", path), Bytes::from_static(b"jar"), BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);

        service
            .deploy(&user_ctx("libs", path), Bytes::from_static(b"jar"), BTreeMap::new())
            .await
            .unwrap();
        let (_, content) = service
            .download(&RequestContext::anonymous(RepoPath::new("public", path)))
            .await
            .unwrap();
        assert_eq!(content, Bytes::from_static(b"jar"));
    }

    #[tokio::test]
    async fn test_checksum_request_served_from_target() {
        let service = service(Arc::new(MockTransport::new("https://repo.example.com")));
        let path = "org/acme/lib/1.0/lib-1.0.jar";
        let deployed = service
            .deploy(&user_ctx("libs", path), Bytes::from_static(b"jar"), BTreeMap::new())
            .await
            .unwrap();

        let ctx = RequestContext::anonymous(RepoPath::new("public", format!("{}.sha1", path)));
        let (_, content) = service.download(&ctx).await.unwrap();
        assert_eq!(std::str::from_utf8(&content).unwrap(), deployed.sha1().unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_targets() {
        let mock = Arc::new(MockTransport::new("https://repo.example.com"));
        mock.put("org/acme/lib/maven-metadata.xml", "<metadata/>", Utc::now());
        let service = service(mock);

        let ctx = RequestContext::anonymous(RepoPath::new("central", "org/acme/lib/maven-metadata.xml"));
        service.download(&ctx).await.unwrap();

        let zapped = service
            .invalidate(&RepoPath::new("public", "org/acme"), true)
            .await
            .unwrap();
        assert_eq!(zapped, 1);

        assert_eq!(
            service.invalidate(&RepoPath::new("libs", "org"), true).await.unwrap(),
            0
        );
        assert!(matches!(
            service.invalidate(&RepoPath::new("nope", "org"), true).await,
            Err(RepoError::RepositoryNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_global_offline() {
        let mock = Arc::new(MockTransport::new("https://repo.example.com"));
        mock.put("org/acme/lib/1.0/lib-1.0.jar", "jar", Utc::now());
        let service = service(mock.clone());

        service.set_global_offline(true);
        let ctx = RequestContext::anonymous(RepoPath::new("central", "org/acme/lib/1.0/lib-1.0.jar"));
        assert!(service.download(&ctx).await.is_err());
        assert_eq!(mock.counts().total(), 0);

        service.set_global_offline(false);
        assert!(service.download(&ctx).await.is_ok());
    }
}
