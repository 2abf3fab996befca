//! CLI error types with exit code handling
//!
//! Engine errors are folded into a handful of user-facing kinds, each with
//! its own exit code.

use depot_repo::RepoError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI error type carrying exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    #[diagnostic(code(depot::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Not found: {message}")]
    #[diagnostic(code(depot::cli::not_found))]
    NotFound { message: String },

    /// Refused by the permission gate
    #[error("Forbidden: {message}")]
    #[diagnostic(code(depot::cli::forbidden))]
    Forbidden { message: String },

    /// Conflicting metadata or checksum mismatch
    #[error("Conflict: {message}")]
    #[diagnostic(code(depot::cli::conflict))]
    Conflict { message: String },

    #[error("Remote error: {message}")]
    #[diagnostic(code(depot::cli::remote))]
    Remote { message: String },

    /// Invalid user input
    #[error("Invalid input: {message}")]
    #[diagnostic(code(depot::cli::input))]
    Input { message: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(depot::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(depot::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::NotFound { .. } => exit_codes::NOT_FOUND,
            CliError::Forbidden { .. } => exit_codes::FORBIDDEN,
            CliError::Conflict { .. } => exit_codes::CONFLICT,
            CliError::Remote { .. } => exit_codes::REMOTE_ERROR,
            CliError::Input { .. } => exit_codes::USAGE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an input error (user provided invalid input)
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error for a response status the engine reported without a `RepoError`
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Forbidden { message },
            404 => Self::NotFound { message },
            409 => Self::Conflict { message },
            500..=599 => Self::Remote { message },
            _ => Self::Internal { message },
        }
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        let message = err.to_string();
        match err {
            RepoError::InvalidConfig { .. }
            | RepoError::InvalidRepositoryUrl { .. }
            | RepoError::RepositoryAlreadyExists { .. } => Self::config(message),
            RepoError::RepositoryNotFound { .. } => Self::config_with_help(
                message,
                "Run 'depot repo list' to see the configured repositories",
            ),
            RepoError::Io(_) => Self::Io { message },
            RepoError::Serialization(_) => Self::config(message),
            other => Self::from_status(other.status_code(), message),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_errors_map_to_exit_codes() {
        let not_found: CliError = RepoError::NotFound {
            path: "libs:a.jar".to_string(),
            reason: "missing".to_string(),
        }
        .into();
        assert_eq!(not_found.exit_code(), exit_codes::NOT_FOUND);

        let forbidden: CliError = RepoError::Forbidden {
            path: "libs:a.jar".to_string(),
            reason: "anonymous".to_string(),
            status: 401,
        }
        .into();
        assert_eq!(forbidden.exit_code(), exit_codes::FORBIDDEN);

        let unknown: CliError = RepoError::RepositoryNotFound {
            name: "nope".to_string(),
        }
        .into();
        assert_eq!(unknown.exit_code(), exit_codes::CONFIG_ERROR);

        let offline: CliError = RepoError::RemoteUnavailable {
            repo: "central".to_string(),
            message: "connection refused".to_string(),
        }
        .into();
        assert_eq!(offline.exit_code(), exit_codes::REMOTE_ERROR);
    }

    #[test]
    fn test_conflict_status() {
        let err = CliError::from_status(409, "two artifacts");
        assert!(matches!(err, CliError::Conflict { .. }));
        assert_eq!(err.exit_code(), exit_codes::CONFLICT);
    }
}
