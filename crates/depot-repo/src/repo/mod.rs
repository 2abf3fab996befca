//! Repositories
//!
//! Four kinds of repository take part in resolution:
//!
//! - [`LocalRepo`]: directly deployable, no upstream
//! - [`LocalCacheRepo`]: the stored mirror of one remote repository
//! - [`RemoteRepo`]: proxy to an origin, caching into its `LocalCacheRepo`
//! - [`VirtualRepo`]: an ordered aggregation of other repositories, holding
//!   no content of its own
//!
//! The first three implement [`Repository`]; a virtual repository only
//! contributes its flattened member list to the resolver.

mod cache;
mod local;
mod offline;
mod remote;
mod virtual_repo;

pub use cache::LocalCacheRepo;
pub use local::LocalRepo;
pub use offline::OfflineState;
pub use remote::{RemoteRepo, RemoteRepoParts};
pub use virtual_repo::{VirtualMembers, VirtualRepo};

use async_trait::async_trait;
use depot_core::{ChecksumPolicy, RepoPath, RepoResource, RequestContext, naming};
use indexmap::IndexMap;
use std::sync::Arc;

use crate::config::{RepoDescriptor, RepoPatterns};
use crate::error::Result;
use crate::security::AccessStatus;
use crate::stream::ResourceStream;

/// Kind of a content-bearing repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoKind {
    Local,
    Cache,
    Remote,
}

impl std::fmt::Display for RepoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoKind::Local => write!(f, "local"),
            RepoKind::Cache => write!(f, "cache"),
            RepoKind::Remote => write!(f, "remote"),
        }
    }
}

/// A repository that can answer lookups and serve content
#[async_trait]
pub trait Repository: Send + Sync {
    fn key(&self) -> &str;

    fn kind(&self) -> RepoKind;

    /// Local and cache repositories hold their content; remotes do not
    fn is_local(&self) -> bool {
        self.kind() != RepoKind::Remote
    }

    fn is_remote(&self) -> bool {
        self.kind() == RepoKind::Remote
    }

    fn handles_releases(&self) -> bool;

    fn handles_snapshots(&self) -> bool;

    fn checksum_policy(&self) -> ChecksumPolicy;

    /// Look a path up. `path` is re-keyed to this repository.
    async fn get_info(&self, ctx: &RequestContext, path: &RepoPath) -> Result<RepoResource>;

    /// Open the content of a resource previously returned by `get_info`
    async fn get_resource_stream_handle(
        &self,
        ctx: &RequestContext,
        resource: &RepoResource,
    ) -> Result<ResourceStream>;
}

/// Whether a repository may hold `path`
///
/// Checksum paths are judged by the file they describe. Metadata is accepted
/// regardless of the release/snapshot handling.
pub(crate) fn check_path(
    descriptor: &RepoDescriptor,
    patterns: &RepoPatterns,
    path: &str,
) -> AccessStatus {
    if descriptor.blacked_out {
        return AccessStatus::denied(format!("Repository {} is blacked out", descriptor.key), 403);
    }

    let target = naming::checksum_target(path)
        .map(|(target, _)| target)
        .unwrap_or(path);

    if !patterns.accepts(target) {
        return AccessStatus::denied(
            format!(
                "{} rejected by the includes/excludes patterns of {}",
                target, descriptor.key
            ),
            404,
        );
    }

    if !naming::is_metadata(target) {
        let snapshot = naming::is_snapshot(target);
        if snapshot && !descriptor.handle_snapshots {
            return AccessStatus::denied(
                format!("Repository {} does not handle snapshots", descriptor.key),
                404,
            );
        }
        if !snapshot && !descriptor.handle_releases {
            return AccessStatus::denied(
                format!("Repository {} does not handle releases", descriptor.key),
                404,
            );
        }
    }

    AccessStatus::allowed()
}

/// Unfound resource for a rejected path
pub(crate) fn rejected(path: RepoPath, status: AccessStatus) -> RepoResource {
    RepoResource::unfound_with_status(path, status.reason, status.status)
}

/// All configured repositories, in configuration order
#[derive(Default)]
pub struct Repositories {
    locals: IndexMap<String, Arc<LocalRepo>>,
    remotes: IndexMap<String, Arc<RemoteRepo>>,
    virtuals: IndexMap<String, Arc<VirtualRepo>>,
}

impl Repositories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_local(&mut self, repo: Arc<LocalRepo>) {
        self.locals.insert(repo.key().to_string(), repo);
    }

    pub fn add_remote(&mut self, repo: Arc<RemoteRepo>) {
        self.remotes.insert(repo.key().to_string(), repo);
    }

    pub fn add_virtual(&mut self, repo: Arc<VirtualRepo>) {
        self.virtuals.insert(repo.key().to_string(), repo);
    }

    pub fn local(&self, key: &str) -> Option<&Arc<LocalRepo>> {
        self.locals.get(key)
    }

    pub fn remote(&self, key: &str) -> Option<&Arc<RemoteRepo>> {
        self.remotes.get(key)
    }

    /// Cache repository by its own key (`<remote>-cache`)
    pub fn cache(&self, key: &str) -> Option<&Arc<LocalCacheRepo>> {
        self.remotes
            .values()
            .map(|remote| remote.cache())
            .find(|cache| cache.key() == key)
    }

    pub fn virtual_repo(&self, key: &str) -> Option<&Arc<VirtualRepo>> {
        self.virtuals.get(key)
    }

    pub fn locals(&self) -> impl Iterator<Item = &Arc<LocalRepo>> {
        self.locals.values()
    }

    pub fn remotes(&self) -> impl Iterator<Item = &Arc<RemoteRepo>> {
        self.remotes.values()
    }

    pub fn caches(&self) -> impl Iterator<Item = &Arc<LocalCacheRepo>> {
        self.remotes.values().map(|remote| remote.cache())
    }

    pub fn virtuals(&self) -> impl Iterator<Item = &Arc<VirtualRepo>> {
        self.virtuals.values()
    }

    /// Any content-bearing repository by key
    pub fn get(&self, key: &str) -> Option<Arc<dyn Repository>> {
        if let Some(local) = self.locals.get(key) {
            return Some(local.clone());
        }
        if let Some(remote) = self.remotes.get(key) {
            return Some(remote.clone());
        }
        self.cache(key).map(|cache| cache.clone() as Arc<dyn Repository>)
    }
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories")
            .field("locals", &self.locals.keys().collect::<Vec<_>>())
            .field("remotes", &self.remotes.keys().collect::<Vec<_>>())
            .field("virtuals", &self.virtuals.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_path() {
        let mut descriptor = RepoDescriptor::new("libs-release");
        descriptor.handle_snapshots = false;
        let patterns = RepoPatterns::new("org/**", "org/internal/**").unwrap();

        let release = "org/acme/lib/1.0/lib-1.0.jar";
        assert!(check_path(&descriptor, &patterns, release).is_allowed());
        assert!(check_path(&descriptor, &patterns, &format!("{}.sha1", release)).is_allowed());

        let snapshot = "org/acme/lib/1.0-SNAPSHOT/lib-1.0-SNAPSHOT.jar";
        let denied = check_path(&descriptor, &patterns, snapshot);
        assert!(!denied.is_allowed());
        assert_eq!(denied.status, 404);

        // Metadata is fine even under a snapshot folder
        let metadata = "org/acme/lib/1.0-SNAPSHOT/maven-metadata.xml";
        assert!(check_path(&descriptor, &patterns, metadata).is_allowed());

        assert!(!check_path(&descriptor, &patterns, "org/internal/x/1/x-1.jar").is_allowed());
        assert!(!check_path(&descriptor, &patterns, "com/acme/x/1/x-1.jar").is_allowed());

        descriptor.blacked_out = true;
        assert_eq!(check_path(&descriptor, &patterns, release).status, 403);
    }
}
