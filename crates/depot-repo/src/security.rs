//! Permission gate
//!
//! The engine asks a yes/no question before serving or storing anything. The
//! answer carries a reason and the status code to report when denied.

use depot_core::{RepoPath, RequestContext};

/// Answer of the permission gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessStatus {
    pub allowed: bool,
    pub reason: String,
    pub status: u16,
}

impl AccessStatus {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
            status: 200,
        }
    }

    pub fn denied(reason: impl Into<String>, status: u16) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            status,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Access control consulted before resolution and before storing
pub trait PermissionGate: Send + Sync {
    fn check_download_allowed(&self, ctx: &RequestContext, path: &RepoPath) -> AccessStatus;

    fn check_deploy_allowed(&self, ctx: &RequestContext, path: &RepoPath, size: u64) -> AccessStatus;
}

/// Everyone may do everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionGate for AllowAll {
    fn check_download_allowed(&self, _ctx: &RequestContext, _path: &RepoPath) -> AccessStatus {
        AccessStatus::allowed()
    }

    fn check_deploy_allowed(&self, _ctx: &RequestContext, _path: &RepoPath, _size: u64) -> AccessStatus {
        AccessStatus::allowed()
    }
}

/// Anonymous principals may download but not deploy
///
/// Caching a remote artifact is performed on behalf of the engine and is not
/// a client deploy, so the gate only restricts direct deploys.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousReadOnly;

impl PermissionGate for AnonymousReadOnly {
    fn check_download_allowed(&self, _ctx: &RequestContext, _path: &RepoPath) -> AccessStatus {
        AccessStatus::allowed()
    }

    fn check_deploy_allowed(&self, ctx: &RequestContext, path: &RepoPath, _size: u64) -> AccessStatus {
        if ctx.principal.anonymous {
            AccessStatus::denied(format!("Anonymous users may not deploy to {}", path), 401)
        } else {
            AccessStatus::allowed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{DownloadRequest, Principal};

    #[test]
    fn test_anonymous_read_only() {
        let path = RepoPath::new("libs", "a.jar");
        let gate = AnonymousReadOnly;

        let anon = RequestContext::anonymous(path.clone());
        assert!(gate.check_download_allowed(&anon, &path).is_allowed());
        let denied = gate.check_deploy_allowed(&anon, &path, 10);
        assert!(!denied.is_allowed());
        assert_eq!(denied.status, 401);

        let user = RequestContext::new(Principal::user("alice"), DownloadRequest::new(path.clone()));
        assert!(gate.check_deploy_allowed(&user, &path, 10).is_allowed());
    }

    #[test]
    fn test_allow_all() {
        let path = RepoPath::new("libs", "a.jar");
        let anon = RequestContext::anonymous(path.clone());
        assert!(AllowAll.check_deploy_allowed(&anon, &path, 0).is_allowed());
    }
}
