//! Repository resources
//!
//! A `RepoResource` is the answer of a repository to "do you have this path?".
//! Found resources carry their size, timestamps and checksums; unfound ones
//! carry a reason (and optionally a status code) and may be cached as
//! negative results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::{ChecksumType, ChecksumsInfo};
use crate::naming;
use crate::path::RepoPath;

/// Information about a found item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub checksums: ChecksumsInfo,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl ResourceInfo {
    pub fn new(size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            size,
            last_modified,
            checksums: ChecksumsInfo::new(),
            mime_type: None,
        }
    }

    pub fn with_checksums(mut self, checksums: ChecksumsInfo) -> Self {
        self.checksums = checksums;
        self
    }
}

/// Found or unfound state of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    Found {
        info: ResourceInfo,
        /// Present locally but past its retrieval TTL
        expired: bool,
    },
    Unfound {
        reason: String,
        status: Option<u16>,
    },
}

/// Result of looking a path up in a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoResource {
    repo_path: RepoPath,
    response_repo_path: Option<RepoPath>,
    metadata: bool,
    state: ResourceState,
}

impl RepoResource {
    /// A found resource
    pub fn found(repo_path: RepoPath, info: ResourceInfo) -> Self {
        Self {
            metadata: naming::is_metadata(repo_path.path()),
            repo_path,
            response_repo_path: None,
            state: ResourceState::Found { info, expired: false },
        }
    }

    /// An unfound resource with a reason
    pub fn unfound(repo_path: RepoPath, reason: impl Into<String>) -> Self {
        Self::unfound_with_status(repo_path, reason, None)
    }

    /// An unfound resource with a reason and a status code for the client
    pub fn unfound_with_status(
        repo_path: RepoPath,
        reason: impl Into<String>,
        status: impl Into<Option<u16>>,
    ) -> Self {
        Self {
            metadata: naming::is_metadata(repo_path.path()),
            repo_path,
            response_repo_path: None,
            state: ResourceState::Unfound {
                reason: reason.into(),
                status: status.into(),
            },
        }
    }

    /// Mark a found resource as expired; no effect on unfound resources
    pub fn with_expired(mut self, is_expired: bool) -> Self {
        if let ResourceState::Found { expired, .. } = &mut self.state {
            *expired = is_expired;
        }
        self
    }

    /// Rebind the path the response should report
    pub fn with_response_repo_path(mut self, response_repo_path: RepoPath) -> Self {
        self.set_response_repo_path(response_repo_path);
        self
    }

    pub fn set_response_repo_path(&mut self, response_repo_path: RepoPath) {
        self.response_repo_path = Some(response_repo_path);
    }

    pub fn repo_path(&self) -> &RepoPath {
        &self.repo_path
    }

    /// Path reported to the client, defaults to `repo_path`
    pub fn response_repo_path(&self) -> &RepoPath {
        self.response_repo_path.as_ref().unwrap_or(&self.repo_path)
    }

    pub fn state(&self) -> &ResourceState {
        &self.state
    }

    pub fn is_found(&self) -> bool {
        matches!(self.state, ResourceState::Found { .. })
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.state, ResourceState::Found { expired: true, .. })
    }

    pub fn is_metadata(&self) -> bool {
        self.metadata
    }

    pub fn info(&self) -> Option<&ResourceInfo> {
        match &self.state {
            ResourceState::Found { info, .. } => Some(info),
            ResourceState::Unfound { .. } => None,
        }
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.info().map(|i| i.last_modified)
    }

    /// Size in bytes, 0 when unfound
    pub fn size(&self) -> u64 {
        self.info().map(|i| i.size).unwrap_or(0)
    }

    pub fn checksums(&self) -> Option<&ChecksumsInfo> {
        self.info().map(|i| &i.checksums)
    }

    /// Computed SHA-1 of the content, if known
    pub fn sha1(&self) -> Option<&str> {
        self.checksums().and_then(|c| c.actual(ChecksumType::Sha1))
    }

    /// Why the resource was not found
    pub fn reason(&self) -> Option<&str> {
        match &self.state {
            ResourceState::Unfound { reason, .. } => Some(reason),
            ResourceState::Found { .. } => None,
        }
    }

    /// Status code of an unfound resource
    pub fn status_code(&self) -> Option<u16> {
        match &self.state {
            ResourceState::Unfound { status, .. } => *status,
            ResourceState::Found { .. } => None,
        }
    }

    /// Whether this resource is strictly newer than `other`
    ///
    /// An unfound `other` is always older.
    pub fn is_newer_than(&self, other: &RepoResource) -> bool {
        match (self.last_modified(), other.last_modified()) {
            (Some(mine), Some(theirs)) => mine > theirs,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}
