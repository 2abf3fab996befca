//! Virtual repository
//!
//! An ordered aggregation of local, remote and other virtual repositories.
//! Resolution flattens it depth-first into its content-bearing members;
//! nested virtual repositories are visited once, so cycles are harmless.

use std::collections::HashSet;
use std::sync::Arc;

use super::{LocalCacheRepo, LocalRepo, RemoteRepo, Repositories, Repository};
use crate::config::{RepoPatterns, VirtualRepoDescriptor};
use crate::error::{RepoError, Result};

pub struct VirtualRepo {
    descriptor: VirtualRepoDescriptor,
    patterns: RepoPatterns,
}

/// Content-bearing members of a virtual repository, in resolution order
#[derive(Default)]
pub struct VirtualMembers {
    pub locals: Vec<Arc<LocalRepo>>,
    pub caches: Vec<Arc<LocalCacheRepo>>,
    pub remotes: Vec<Arc<RemoteRepo>>,
}

impl VirtualRepo {
    pub fn new(descriptor: VirtualRepoDescriptor) -> Result<Self> {
        Ok(Self {
            patterns: RepoPatterns::new(&descriptor.includes_pattern, &descriptor.excludes_pattern)?,
            descriptor,
        })
    }

    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    pub fn descriptor(&self) -> &VirtualRepoDescriptor {
        &self.descriptor
    }

    /// Whether the aggregation exposes `path` at all
    pub fn accepts(&self, path: &str) -> bool {
        self.patterns.accepts(path)
    }

    /// Flatten the member list against the configured repositories
    pub fn members(&self, repositories: &Repositories) -> Result<VirtualMembers> {
        let mut members = VirtualMembers::default();
        let mut visited = HashSet::new();
        visited.insert(self.key().to_string());
        self.collect(repositories, &mut members, &mut visited)?;
        Ok(members)
    }

    fn collect(
        &self,
        repositories: &Repositories,
        members: &mut VirtualMembers,
        visited: &mut HashSet<String>,
    ) -> Result<()> {
        for key in &self.descriptor.repositories {
            if let Some(local) = repositories.local(key) {
                if !members.locals.iter().any(|l| l.key() == key.as_str()) {
                    members.locals.push(local.clone());
                }
            } else if let Some(remote) = repositories.remote(key) {
                if !members.remotes.iter().any(|r| r.key() == key.as_str()) {
                    members.caches.push(remote.cache().clone());
                    members.remotes.push(remote.clone());
                }
            } else if let Some(nested) = repositories.virtual_repo(key) {
                if visited.insert(key.clone()) {
                    nested.collect(repositories, members, visited)?;
                } else {
                    tracing::debug!("Virtual repository {} already visited from {}", key, self.key());
                }
            } else {
                return Err(RepoError::RepositoryNotFound { name: key.clone() });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for VirtualRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualRepo")
            .field("key", &self.descriptor.key)
            .field("repositories", &self.descriptor.repositories)
            .finish()
    }
}
