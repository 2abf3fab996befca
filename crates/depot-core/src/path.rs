//! Repository paths
//!
//! A `RepoPath` names an item (file or folder) inside the namespace of one
//! repository. It is the lookup key for every cache in the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Separator between the repository key and the path in the textual form
pub const REPO_PATH_SEPARATOR: char = ':';

/// Immutable `(repo_key, path)` identifier
///
/// Paths are normalized on construction: leading and trailing slashes are
/// stripped and repeated slashes collapsed, so `"/org//foo/"` and `"org/foo"`
/// name the same item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoPath {
    repo_key: String,
    path: String,
}

impl RepoPath {
    /// Create a repo path, normalizing the path component
    pub fn new(repo_key: impl Into<String>, path: impl AsRef<str>) -> Self {
        Self {
            repo_key: repo_key.into(),
            path: normalize(path.as_ref()),
        }
    }

    /// Root of a repository
    pub fn root(repo_key: impl Into<String>) -> Self {
        Self::new(repo_key, "")
    }

    /// Parse `repo:path` or `repo/path`
    pub fn parse(id: &str) -> Result<Self> {
        let id = id.trim().trim_start_matches('/');
        let split = id
            .find(|c| c == REPO_PATH_SEPARATOR || c == '/')
            .map(|idx| (&id[..idx], &id[idx + 1..]));

        let (key, path) = match split {
            Some((key, path)) => (key, path),
            None => (id, ""),
        };

        if key.is_empty() {
            return Err(CoreError::InvalidPath {
                path: id.to_string(),
                reason: "missing repository key".to_string(),
            });
        }

        Ok(Self::new(key, path))
    }

    /// Repository key
    pub fn repo_key(&self) -> &str {
        &self.repo_key
    }

    /// Path inside the repository (no leading slash)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Parent folder, `None` for the repository root
    pub fn parent(&self) -> Option<RepoPath> {
        if self.is_root() {
            return None;
        }
        let parent = match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => "",
        };
        Some(Self::new(self.repo_key.clone(), parent))
    }

    /// Child item of this folder
    pub fn child(&self, name: &str) -> RepoPath {
        if self.is_root() {
            Self::new(self.repo_key.clone(), name)
        } else {
            Self::new(self.repo_key.clone(), format!("{}/{}", self.path, name))
        }
    }

    /// Same path in another repository
    pub fn with_repo_key(&self, repo_key: impl Into<String>) -> RepoPath {
        Self {
            repo_key: repo_key.into(),
            path: self.path.clone(),
        }
    }

    /// Same repository, different path
    pub fn with_path(&self, path: impl AsRef<str>) -> RepoPath {
        Self::new(self.repo_key.clone(), path)
    }

    /// Whether `self` is `other` or lies underneath it (same repository)
    pub fn is_within(&self, other: &RepoPath) -> bool {
        if self.repo_key != other.repo_key {
            return false;
        }
        other.is_root()
            || self.path == other.path
            || (self.path.starts_with(&other.path)
                && self.path.as_bytes().get(other.path.len()) == Some(&b'/'))
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.repo_key, REPO_PATH_SEPARATOR, self.path)
    }
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let a = RepoPath::new("libs", "/org//acme/lib/1.0/");
        let b = RepoPath::new("libs", "org/acme/lib/1.0");
        assert_eq!(a, b);
        assert_eq!(a.path(), "org/acme/lib/1.0");
    }

    #[test]
    fn test_parse() {
        let p = RepoPath::parse("libs-release:org/acme/lib-1.0.jar").unwrap();
        assert_eq!(p.repo_key(), "libs-release");
        assert_eq!(p.path(), "org/acme/lib-1.0.jar");

        let p = RepoPath::parse("/central/junit/junit/4.12/junit-4.12.pom").unwrap();
        assert_eq!(p.repo_key(), "central");
        assert_eq!(p.name(), "junit-4.12.pom");

        let root = RepoPath::parse("central").unwrap();
        assert!(root.is_root());

        assert!(RepoPath::parse(":foo").is_err());
    }

    #[test]
    fn test_parent_and_child() {
        let p = RepoPath::new("libs", "org/acme/lib");
        assert_eq!(p.parent().unwrap().path(), "org/acme");
        assert_eq!(p.child("1.0").path(), "org/acme/lib/1.0");
        assert_eq!(RepoPath::new("libs", "org").parent().unwrap(), RepoPath::root("libs"));
        assert!(RepoPath::root("libs").parent().is_none());
        assert_eq!(RepoPath::root("libs").child("org").path(), "org");
    }

    #[test]
    fn test_is_within() {
        let folder = RepoPath::new("libs", "org/acme");
        assert!(RepoPath::new("libs", "org/acme/lib/1.0").is_within(&folder));
        assert!(folder.is_within(&folder));
        assert!(!RepoPath::new("libs", "org/acmeco").is_within(&folder));
        assert!(!RepoPath::new("other", "org/acme/x").is_within(&folder));
        assert!(RepoPath::new("libs", "x").is_within(&RepoPath::root("libs")));
    }

    #[test]
    fn test_display() {
        let p = RepoPath::new("central", "a/b.jar");
        assert_eq!(p.to_string(), "central:a/b.jar");
        assert_eq!(p.with_repo_key("central-cache").to_string(), "central-cache:a/b.jar");
    }
}
