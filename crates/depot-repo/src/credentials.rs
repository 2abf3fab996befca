//! Remote repository credentials
//!
//! Credentials are declared per remote repository and scoped to its URL.
//! The HTTP transport only attaches them to requests that stay on the
//! origin they were configured for; after a cross-origin redirect they are
//! dropped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::error::{RepoError, Result};

/// Credential types supported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Credentials {
    /// Basic authentication (username/password)
    Basic { username: String, password: String },

    /// Bearer token authentication
    Bearer { token: String },

    /// Environment variable references, resolved when the transport is built
    Env {
        username_var: String,
        password_var: String,
    },
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Credentials::Bearer {
            token: token.into(),
        }
    }

    pub fn from_env(username_var: impl Into<String>, password_var: impl Into<String>) -> Self {
        Credentials::Env {
            username_var: username_var.into(),
            password_var: password_var.into(),
        }
    }

    /// Resolve credentials to actual values
    pub fn resolve(&self) -> Result<ResolvedCredentials> {
        match self {
            Credentials::Basic { username, password } => Ok(ResolvedCredentials::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            Credentials::Bearer { token } => Ok(ResolvedCredentials::Bearer {
                token: token.clone(),
            }),
            Credentials::Env {
                username_var,
                password_var,
            } => {
                let username = std::env::var(username_var).map_err(|_| RepoError::AuthFailed {
                    message: format!("Environment variable {} not set", username_var),
                })?;
                let password = std::env::var(password_var).map_err(|_| RepoError::AuthFailed {
                    message: format!("Environment variable {} not set", password_var),
                })?;
                Ok(ResolvedCredentials::Basic { username, password })
            }
        }
    }
}

/// Resolved credentials ready for use
#[derive(Clone)]
pub enum ResolvedCredentials {
    Basic { username: String, password: String },
    Bearer { token: String },
}

impl ResolvedCredentials {
    /// `Authorization` header value
    pub fn auth_header(&self) -> String {
        match self {
            ResolvedCredentials::Basic { username, password } => {
                let encoded = base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    format!("{}:{}", username, password),
                );
                format!("Basic {}", encoded)
            }
            ResolvedCredentials::Bearer { token } => format!("Bearer {}", token),
        }
    }
}

// Never print secrets
impl std::fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedCredentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            ResolvedCredentials::Bearer { .. } => {
                f.debug_struct("Bearer").field("token", &"***").finish()
            }
        }
    }
}

/// Scoped credentials - maps URL prefixes to credentials
///
/// Credentials are never returned for URLs outside their scope.
#[derive(Debug, Clone, Default)]
pub struct ScopedCredentials {
    scopes: HashMap<String, ResolvedCredentials>,
}

impl ScopedCredentials {
    /// Credentials scoped to a single URL prefix
    pub fn single(url_prefix: &str, credentials: ResolvedCredentials) -> Self {
        let mut scoped = Self::default();
        scoped.add(url_prefix, credentials);
        scoped
    }

    /// Add credentials for a URL scope
    pub fn add(&mut self, url_prefix: &str, credentials: ResolvedCredentials) {
        let prefix = url_prefix.trim_end_matches('/').to_string();
        self.scopes.insert(prefix, credentials);
    }

    /// Get credentials for a URL (by longest matching prefix)
    pub fn for_url(&self, url: &str) -> Option<&ResolvedCredentials> {
        self.scopes
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, creds)| creds)
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Check if two URLs are same-origin (for redirect safety)
    pub fn same_origin(url1: &str, url2: &str) -> bool {
        match (Url::parse(url1), Url::parse(url2)) {
            (Ok(u1), Ok(u2)) => {
                u1.scheme() == u2.scheme()
                    && u1.host() == u2.host()
                    && u1.port_or_known_default() == u2.port_or_known_default()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_origin() {
        assert!(ScopedCredentials::same_origin(
            "https://repo.example.com/maven2/a.jar",
            "https://repo.example.com/cdn/a.jar"
        ));
        assert!(ScopedCredentials::same_origin(
            "https://repo.example.com:443/a",
            "https://repo.example.com/b"
        ));
        assert!(!ScopedCredentials::same_origin(
            "https://repo.example.com/a",
            "https://cdn.example.net/a"
        ));
        assert!(!ScopedCredentials::same_origin(
            "https://repo.example.com/a",
            "http://repo.example.com/a"
        ));
    }

    #[test]
    fn test_scoped_credentials() {
        let scoped = ScopedCredentials::single(
            "https://private.example.com/maven2/",
            ResolvedCredentials::Bearer {
                token: "secret".to_string(),
            },
        );

        assert!(scoped.for_url("https://private.example.com/maven2/org/a.pom").is_some());
        assert!(scoped.for_url("https://private.example.com/other/a.pom").is_none());
        assert!(scoped.for_url("https://public.example.com/maven2/a.pom").is_none());
    }

    #[test]
    fn test_auth_header() {
        let basic = Credentials::basic("user", "pass").resolve().unwrap();
        assert_eq!(basic.auth_header(), "Basic dXNlcjpwYXNz");
        let bearer = Credentials::bearer("tok").resolve().unwrap();
        assert_eq!(bearer.auth_header(), "Bearer tok");
        assert!(!format!("{:?}", basic).contains("pass\""));
    }

    #[test]
    fn test_env_credentials() {
        // SAFETY: variables are unique to this test
        unsafe {
            std::env::set_var("DEPOT_TEST_USER_VAR", "ci");
            std::env::set_var("DEPOT_TEST_PASS_VAR", "hunter2");
        }

        let resolved = Credentials::from_env("DEPOT_TEST_USER_VAR", "DEPOT_TEST_PASS_VAR")
            .resolve()
            .unwrap();
        match resolved {
            ResolvedCredentials::Basic { username, password } => {
                assert_eq!(username, "ci");
                assert_eq!(password, "hunter2");
            }
            _ => panic!("Expected Basic credentials"),
        }

        assert!(Credentials::from_env("DEPOT_TEST_MISSING_U", "DEPOT_TEST_MISSING_P")
            .resolve()
            .is_err());

        // SAFETY: variables are unique to this test
        unsafe {
            std::env::remove_var("DEPOT_TEST_USER_VAR");
            std::env::remove_var("DEPOT_TEST_PASS_VAR");
        }
    }

    #[test]
    fn test_yaml_shape() {
        let creds: Credentials =
            serde_yaml::from_str("type: env\nusernameVar: U\npasswordVar: P\n").unwrap();
        assert_eq!(creds, Credentials::from_env("U", "P"));
    }
}
