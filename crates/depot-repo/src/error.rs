//! Error types for repository operations

use depot_core::{ChecksumMismatch, CoreError};
use thiserror::Error;

/// Repository operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Configuration Errors ============
    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    #[error("Repository already exists: {name}")]
    RepositoryAlreadyExists { name: String },

    #[error("Invalid repository URL: {url} - {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    #[error("Invalid repository configuration: {message}")]
    InvalidConfig { message: String },

    // ============ Resolution Errors ============
    #[error("Not found: {path} ({reason})")]
    NotFound { path: String, reason: String },

    #[error("Forbidden: {path} ({reason})")]
    Forbidden {
        path: String,
        reason: String,
        status: u16,
    },

    #[error("Conflicting descriptors for {path}: {message}")]
    ConflictingDescriptor { path: String, message: String },

    #[error(transparent)]
    ChecksumMismatch(#[from] ChecksumMismatch),

    // ============ Remote Errors ============
    #[error("Remote repository {repo} unavailable: {message}")]
    RemoteUnavailable { repo: String, message: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Request timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    // ============ Storage Errors ============
    #[error("Binary not found: {sha1}")]
    BinaryNotFound { sha1: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error(transparent)]
    Metadata(#[from] CoreError),

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ============ Other ============
    #[error("{0}")]
    Other(String),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Status code a client should see for this error
    pub fn status_code(&self) -> u16 {
        match self {
            RepoError::NotFound { .. }
            | RepoError::RepositoryNotFound { .. }
            | RepoError::BinaryNotFound { .. } => 404,
            RepoError::Forbidden { status, .. } => *status,
            RepoError::AuthFailed { .. } => 401,
            RepoError::ConflictingDescriptor { .. } | RepoError::RepositoryAlreadyExists { .. } => {
                409
            }
            RepoError::ChecksumMismatch(_) => 409,
            RepoError::Metadata(CoreError::ConflictingMetadata { .. }) => 409,
            RepoError::InvalidRepositoryUrl { .. } | RepoError::InvalidConfig { .. } => 400,
            RepoError::RemoteUnavailable { .. }
            | RepoError::NetworkError { .. }
            | RepoError::Timeout { .. } => 503,
            RepoError::HttpError { status, .. } if *status >= 500 => 502,
            RepoError::HttpError { status, .. } => *status,
            _ => 500,
        }
    }

    /// Whether the error is a transient remote failure
    ///
    /// Transient failures flip a remote repository to assumed-offline instead
    /// of propagating (unless the repository is configured to hard-fail).
    pub fn is_transient(&self) -> bool {
        match self {
            RepoError::RemoteUnavailable { .. }
            | RepoError::NetworkError { .. }
            | RepoError::Timeout { .. } => true,
            RepoError::HttpError { status, .. } => *status >= 500 || *status == 429,
            RepoError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    pub fn storage(message: impl std::fmt::Display) -> Self {
        RepoError::StorageError {
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RepoError::Timeout { seconds: 30 }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidRepositoryUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(e: rusqlite::Error) -> Self {
        RepoError::StorageError {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::ChecksumType;

    #[test]
    fn test_status_codes() {
        let not_found = RepoError::NotFound {
            path: "libs:a.jar".into(),
            reason: "no candidate".into(),
        };
        assert_eq!(not_found.status_code(), 404);

        let forbidden = RepoError::Forbidden {
            path: "libs:a.jar".into(),
            reason: "blacked out".into(),
            status: 403,
        };
        assert_eq!(forbidden.status_code(), 403);

        let mismatch = RepoError::from(ChecksumMismatch {
            path: "a".into(),
            checksum_type: ChecksumType::Sha1,
            expected: "1".into(),
            actual: "2".into(),
        });
        assert_eq!(mismatch.status_code(), 409);

        let conflict = RepoError::from(CoreError::ConflictingMetadata {
            coordinates: "g:a".into(),
            message: "x".into(),
        });
        assert_eq!(conflict.status_code(), 409);

        assert_eq!(
            RepoError::HttpError {
                status: 503,
                message: String::new()
            }
            .status_code(),
            502
        );
    }

    #[test]
    fn test_transient() {
        assert!(RepoError::Timeout { seconds: 5 }.is_transient());
        assert!(RepoError::HttpError { status: 500, message: String::new() }.is_transient());
        assert!(!RepoError::HttpError { status: 404, message: String::new() }.is_transient());
        assert!(!RepoError::Other("x".into()).is_transient());
        assert!(
            RepoError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow")).is_transient()
        );
    }
}
