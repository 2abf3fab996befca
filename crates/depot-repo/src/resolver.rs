//! Candidate repository selection
//!
//! The order is fixed for every request: local repositories, then cache
//! repositories, then remote repositories. Remotes are left out for requests
//! coming from a peer instance, so two instances proxying each other never
//! loop.

use depot_core::RequestContext;
use std::sync::Arc;

use crate::config::GLOBAL_REPO_KEY;
use crate::error::{RepoError, Result};
use crate::repo::{Repositories, Repository, VirtualMembers};

/// Ordered repositories to query for one request
pub struct Candidates {
    pub repos: Vec<Arc<dyn Repository>>,
    /// The request targeted an aggregation (virtual or global) rather than
    /// one repository
    pub aggregate: bool,
}

impl Candidates {
    pub fn keys(&self) -> Vec<&str> {
        self.repos.iter().map(|r| r.key()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    fn single(repo: Arc<dyn Repository>) -> Self {
        Self {
            repos: vec![repo],
            aggregate: false,
        }
    }

    fn from_members(members: VirtualMembers, include_remotes: bool) -> Self {
        let mut repos: Vec<Arc<dyn Repository>> = Vec::new();
        repos.extend(members.locals.into_iter().map(|r| r as Arc<dyn Repository>));
        repos.extend(members.caches.into_iter().map(|r| r as Arc<dyn Repository>));
        if include_remotes {
            repos.extend(members.remotes.into_iter().map(|r| r as Arc<dyn Repository>));
        }
        Self {
            repos,
            aggregate: true,
        }
    }
}

impl std::fmt::Debug for Candidates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidates")
            .field("repos", &self.keys())
            .field("aggregate", &self.aggregate)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RepositoryResolver {
    repositories: Arc<Repositories>,
}

impl RepositoryResolver {
    pub fn new(repositories: Arc<Repositories>) -> Self {
        Self { repositories }
    }

    pub fn repositories(&self) -> &Arc<Repositories> {
        &self.repositories
    }

    /// Repositories to query for `ctx`, in query order
    pub fn candidates(&self, ctx: &RequestContext) -> Result<Candidates> {
        let repo_path = ctx.repo_path();
        let key = repo_path.repo_key();
        let include_remotes = !ctx.request.is_from_peer();
        let repos = &self.repositories;

        if key == GLOBAL_REPO_KEY {
            let members = VirtualMembers {
                locals: repos.locals().cloned().collect(),
                caches: repos.caches().cloned().collect(),
                remotes: repos.remotes().cloned().collect(),
            };
            return Ok(Candidates::from_members(members, include_remotes));
        }

        if let Some(local) = repos.local(key) {
            return Ok(Candidates::single(local.clone()));
        }
        if let Some(cache) = repos.cache(key) {
            return Ok(Candidates::single(cache.clone()));
        }
        if let Some(remote) = repos.remote(key) {
            return Ok(if include_remotes {
                Candidates::single(remote.clone())
            } else {
                Candidates::single(remote.cache().clone())
            });
        }
        if let Some(virtual_repo) = repos.virtual_repo(key) {
            if !virtual_repo.accepts(repo_path.path()) {
                tracing::debug!("{} excluded by the patterns of {}", repo_path.path(), key);
                return Ok(Candidates {
                    repos: Vec::new(),
                    aggregate: true,
                });
            }
            let members = virtual_repo.members(repos)?;
            return Ok(Candidates::from_members(members, include_remotes));
        }

        Err(RepoError::RepositoryNotFound {
            name: key.to_string(),
        })
    }
}
