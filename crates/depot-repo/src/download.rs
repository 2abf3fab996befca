//! Download orchestration
//!
//! Turns a request into a resolved resource by querying the candidate
//! repositories with one of three strategies:
//!
//! - **Standard**: the first repository that has the path wins
//! - **Snapshot**: every candidate is consulted and the newest copy wins;
//!   remotes are skipped once any local or cache repository had it
//! - **Metadata merge**: every `maven-metadata.xml` found in an aggregate
//!   request is merged into one document
//!
//! Checksum files are never looked up directly. The artifact they describe
//! is resolved and the value its repository's checksum policy vouches for is
//! served.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use depot_core::{
    ChecksumType, ChecksumsInfo, RepoPath, RepoResource, RequestContext, ResourceInfo, naming,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{RepoError, Result};
use crate::merge::{MergedChecksumCache, Merged, MetadataMerger};
use crate::repo::Repository;
use crate::resolver::{Candidates, RepositoryResolver};
use crate::stream::ResourceStream;

/// Outcome of resolving one request
#[derive(Clone)]
pub struct Resolution {
    pub resource: RepoResource,
    /// Repository serving the content, absent for synthesized responses
    pub repository: Option<Arc<dyn Repository>>,
    /// Inline content for synthesized responses (merged metadata, checksums)
    pub content: Option<Bytes>,
}

impl Resolution {
    pub fn found(resource: RepoResource, repository: Arc<dyn Repository>) -> Self {
        Self {
            resource,
            repository: Some(repository),
            content: None,
        }
    }

    pub fn synthesized(resource: RepoResource, content: Bytes) -> Self {
        Self {
            resource,
            repository: None,
            content: Some(content),
        }
    }

    pub fn unfound(resource: RepoResource) -> Self {
        Self {
            resource,
            repository: None,
            content: None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.resource.is_found()
    }

    /// Key of the repository that satisfied the request
    pub fn repository_key(&self) -> Option<&str> {
        self.repository.as_ref().map(|r| r.key())
    }

    /// Open the resolved content
    pub async fn open(&self, ctx: &RequestContext) -> Result<ResourceStream> {
        if let Some(content) = &self.content {
            return Ok(ResourceStream::from_bytes(self.resource.clone(), content.clone()));
        }
        match &self.repository {
            Some(repository) if self.resource.is_found() => {
                repository.get_resource_stream_handle(ctx, &self.resource).await
            }
            _ => Err(RepoError::NotFound {
                path: self.resource.repo_path().to_string(),
                reason: self.resource.reason().unwrap_or("Not found").to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
            .field("resource", &self.resource)
            .field("repository", &self.repository_key())
            .field("inline", &self.content.as_ref().map(|c| c.len()))
            .finish()
    }
}

/// How the candidates of a request are searched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Standard,
    Snapshot,
    MetadataMerge,
}

impl Strategy {
    pub fn for_path(path: &str, aggregate: bool) -> Self {
        if naming::is_metadata(path) {
            if aggregate {
                Strategy::MetadataMerge
            } else {
                Strategy::Standard
            }
        } else if naming::is_snapshot(path) {
            Strategy::Snapshot
        } else {
            Strategy::Standard
        }
    }
}

/// Found, and either fresh or vouched for by a remote
///
/// Expired copies in cache repositories are passed over so their remote gets
/// the chance to revalidate them.
fn usable(repository: &dyn Repository, resource: &RepoResource) -> bool {
    resource.is_found() && (!resource.is_expired() || repository.is_remote())
}

#[derive(Debug, Clone)]
pub struct DownloadEngine {
    resolver: RepositoryResolver,
    merged: Arc<MergedChecksumCache>,
}

impl DownloadEngine {
    pub fn new(resolver: RepositoryResolver, merged: Arc<MergedChecksumCache>) -> Self {
        Self { resolver, merged }
    }

    pub fn resolver(&self) -> &RepositoryResolver {
        &self.resolver
    }

    pub fn merged_checksums(&self) -> &Arc<MergedChecksumCache> {
        &self.merged
    }

    /// Resolve the request in `ctx`
    ///
    /// Not finding anything is not an error: the returned resolution carries
    /// an unfound resource with the reason and status to report.
    pub async fn resolve(&self, ctx: &RequestContext) -> Result<Resolution> {
        let path = ctx.repo_path();
        match naming::checksum_target(path.path()) {
            Some((target, checksum_type)) => {
                let target = path.with_path(target);
                self.resolve_checksum(ctx, target, checksum_type).await
            }
            None => self.resolve_content(ctx).await,
        }
    }

    async fn resolve_content(&self, ctx: &RequestContext) -> Result<Resolution> {
        let path = ctx.repo_path();
        let candidates = self.resolver.candidates(ctx)?;
        let strategy = Strategy::for_path(path.path(), candidates.aggregate);
        tracing::debug!(
            "Resolving {} ({:?}) across [{}]",
            path,
            strategy,
            candidates.keys().join(", ")
        );

        match strategy {
            Strategy::Standard => self.first_found(ctx, &candidates).await,
            Strategy::Snapshot => self.latest_snapshot(ctx, &candidates).await,
            Strategy::MetadataMerge => self.merge_metadata(ctx, &candidates).await,
        }
    }

    async fn first_found(&self, ctx: &RequestContext, candidates: &Candidates) -> Result<Resolution> {
        let path = ctx.repo_path();
        let mut last_unfound = None;

        for repository in &candidates.repos {
            let resource = repository.get_info(ctx, path).await?;
            if usable(repository.as_ref(), &resource) {
                tracing::debug!("{} satisfied by {}", path, repository.key());
                return Ok(Resolution::found(resource, repository.clone()));
            }
            tracing::debug!(
                "{} not in {}: {}",
                path,
                repository.key(),
                resource.reason().unwrap_or("expired")
            );
            last_unfound = Some(resource);
        }

        Ok(not_found(path, candidates, last_unfound))
    }

    async fn latest_snapshot(
        &self,
        ctx: &RequestContext,
        candidates: &Candidates,
    ) -> Result<Resolution> {
        let path = ctx.repo_path();
        let mut best: Option<(RepoResource, Arc<dyn Repository>)> = None;
        let mut local_hit: Option<String> = None;
        let mut last_unfound = None;

        for repository in &candidates.repos {
            if repository.is_remote() && local_hit.is_some() {
                tracing::debug!("Skipping {} for {}: found locally", repository.key(), path);
                continue;
            }

            let resource = repository.get_info(ctx, path).await?;
            if !usable(repository.as_ref(), &resource) {
                last_unfound = Some(resource);
                continue;
            }

            if repository.is_local() {
                match &local_hit {
                    Some(first) => tracing::warn!(
                        "Snapshot {} found in both {} and {}",
                        path.path(),
                        first,
                        repository.key()
                    ),
                    None => local_hit = Some(repository.key().to_string()),
                }
            }

            let newer = match &best {
                Some((current, _)) => resource.is_newer_than(current),
                None => true,
            };
            if newer {
                best = Some((resource, repository.clone()));
            }
        }

        match best {
            Some((resource, repository)) => {
                tracing::debug!("{} satisfied by {} (latest)", path, repository.key());
                Ok(Resolution::found(resource, repository))
            }
            None => Ok(not_found(path, candidates, last_unfound)),
        }
    }

    async fn merge_metadata(
        &self,
        ctx: &RequestContext,
        candidates: &Candidates,
    ) -> Result<Resolution> {
        let path = ctx.repo_path();
        let mut merger = MetadataMerger::new(path.clone());
        let mut first_repository = None;
        let mut local_hit = false;
        let mut last_unfound = None;

        for repository in &candidates.repos {
            if repository.is_remote() && local_hit {
                continue;
            }

            let resource = repository.get_info(ctx, path).await?;
            if !usable(repository.as_ref(), &resource) {
                last_unfound = Some(resource);
                continue;
            }

            let content = match repository.get_resource_stream_handle(ctx, &resource).await {
                Ok(stream) => stream.read_all().await,
                Err(e) => {
                    tracing::warn!("Cannot read {} from {}: {}", path.path(), repository.key(), e);
                    continue;
                }
            };
            let content = match content {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Cannot read {} from {}: {}", path.path(), repository.key(), e);
                    continue;
                }
            };

            if repository.is_local() {
                local_hit = true;
            }
            let before = merger.contributors();
            merger.add(resource, content)?;
            if before == 0 && merger.contributors() == 1 {
                first_repository = Some(repository.clone());
            }
        }

        match merger.finish()? {
            None => Ok(not_found(path, candidates, last_unfound)),
            Some(Merged::Single { resource, content }) => {
                tracing::debug!("{} served unmerged from {}", path, resource.repo_path().repo_key());
                Ok(Resolution {
                    resource,
                    repository: first_repository,
                    content: Some(content),
                })
            }
            Some(Merged::Combined {
                content,
                last_modified,
                contributors,
            }) => {
                tracing::debug!("{} merged from {} documents", path, contributors);
                Ok(self.merged_resolution(path, content, last_modified))
            }
        }
    }

    fn merged_resolution(
        &self,
        path: &RepoPath,
        content: Bytes,
        last_modified: DateTime<Utc>,
    ) -> Resolution {
        let computed = self.merged.checksums_for(path, &content, last_modified);
        let mut info = ResourceInfo::new(content.len() as u64, last_modified)
            .with_checksums(ChecksumsInfo::from_parts(&BTreeMap::new(), Some(&computed)));
        info.mime_type = Some(naming::mime_type(path.path()).to_string());
        Resolution::synthesized(RepoResource::found(path.clone(), info), content)
    }

    async fn resolve_checksum(
        &self,
        ctx: &RequestContext,
        target: RepoPath,
        checksum_type: ChecksumType,
    ) -> Result<Resolution> {
        let path = ctx.repo_path();
        let resolved = self.resolve_content(&ctx.for_path(target.clone())).await?;
        if !resolved.is_found() {
            let reason = resolved.resource.reason().unwrap_or("Not found").to_string();
            let status = resolved.resource.status_code().unwrap_or(404);
            return Ok(Resolution::unfound(RepoResource::unfound_with_status(
                path.clone(),
                reason,
                status,
            )));
        }

        let value = match (&resolved.repository, resolved.resource.checksums()) {
            (Some(repository), Some(checksums)) => repository.checksum_policy().select(
                checksum_type,
                checksums,
                resolved.resource.repo_path(),
            ),
            (None, _) => self.merged.get(&target, checksum_type),
            (Some(_), None) => None,
        };

        let Some(value) = value else {
            tracing::debug!("No trusted {} checksum for {}", checksum_type, target);
            return Ok(Resolution::unfound(RepoResource::unfound_with_status(
                path.clone(),
                format!("No valid {} checksum for {}", checksum_type, target.path()),
                404,
            )));
        };

        let content = Bytes::from(value);
        let mut info = ResourceInfo::new(
            content.len() as u64,
            resolved.resource.last_modified().unwrap_or_else(Utc::now),
        );
        info.mime_type = Some(naming::mime_type(path.path()).to_string());
        Ok(Resolution::synthesized(RepoResource::found(path.clone(), info), content))
    }
}

fn not_found(path: &RepoPath, candidates: &Candidates, last_unfound: Option<RepoResource>) -> Resolution {
    if candidates.repos.len() == 1 {
        if let Some(unfound) = last_unfound.filter(|r| !r.is_found()) {
            return Resolution::unfound(unfound);
        }
    }

    let reason = if candidates.is_empty() {
        format!("No repository accepts {}", path.path())
    } else {
        format!("{} not found in [{}]", path.path(), candidates.keys().join(", "))
    };
    tracing::debug!("{}", reason);
    Resolution::unfound(RepoResource::unfound_with_status(path.clone(), reason, 404))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_for_path() {
        let metadata = "org/acme/lib/maven-metadata.xml";
        assert_eq!(Strategy::for_path(metadata, true), Strategy::MetadataMerge);
        assert_eq!(Strategy::for_path(metadata, false), Strategy::Standard);

        let snapshot = "org/acme/lib/1.0-SNAPSHOT/lib-1.0-SNAPSHOT.jar";
        assert_eq!(Strategy::for_path(snapshot, true), Strategy::Snapshot);
        assert_eq!(Strategy::for_path(snapshot, false), Strategy::Snapshot);

        let release = "org/acme/lib/1.0/lib-1.0.jar";
        assert_eq!(Strategy::for_path(release, true), Strategy::Standard);
    }
}
