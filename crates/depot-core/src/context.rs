//! Per-request context
//!
//! Everything a request needs travels explicitly in a `RequestContext`: who
//! is asking, what they asked for, and the request flags. Nothing is kept in
//! ambient or thread-bound state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::RepoPath;
use crate::properties::Properties;

/// Name given to unauthenticated principals
pub const ANONYMOUS: &str = "anonymous";

/// Authenticated (or anonymous) caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub anonymous: bool,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            name: ANONYMOUS.to_string(),
            anonymous: true,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            anonymous: false,
        }
    }
}

impl Default for Principal {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// Where a request came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestOrigin {
    /// A regular client
    #[default]
    Client,
    /// Another instance of this system proxying to us; remotes are not
    /// consulted for such requests to prevent proxy loops
    Peer,
}

/// A download request, already parsed from whatever front end received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub repo_path: RepoPath,
    pub head_only: bool,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub origin: RequestOrigin,
    /// Matrix parameters / query properties supplied with the request
    pub properties: Properties,
}

impl DownloadRequest {
    pub fn new(repo_path: RepoPath) -> Self {
        Self {
            repo_path,
            head_only: false,
            if_modified_since: None,
            origin: RequestOrigin::Client,
            properties: Properties::new(),
        }
    }

    pub fn head_only(mut self, head_only: bool) -> Self {
        self.head_only = head_only;
        self
    }

    pub fn if_modified_since(mut self, since: DateTime<Utc>) -> Self {
        self.if_modified_since = Some(since);
        self
    }

    pub fn from_peer(mut self) -> Self {
        self.origin = RequestOrigin::Peer;
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn is_from_peer(&self) -> bool {
        self.origin == RequestOrigin::Peer
    }
}

/// Request-scoped state handed to every engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub principal: Principal,
    pub request: DownloadRequest,
}

impl RequestContext {
    pub fn new(principal: Principal, request: DownloadRequest) -> Self {
        Self { principal, request }
    }

    /// Anonymous client download of `repo_path`
    pub fn anonymous(repo_path: RepoPath) -> Self {
        Self::new(Principal::anonymous(), DownloadRequest::new(repo_path))
    }

    pub fn repo_path(&self) -> &RepoPath {
        &self.request.repo_path
    }

    /// Same principal and flags, different target path
    pub fn for_path(&self, repo_path: RepoPath) -> Self {
        Self {
            principal: self.principal.clone(),
            request: DownloadRequest {
                repo_path,
                ..self.request.clone()
            },
        }
    }
}
