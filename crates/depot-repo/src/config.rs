//! Repository configuration
//!
//! Stored as YAML in `~/.config/depot/depot.yaml` (or an explicit path).
//!
//! ```yaml
//! apiVersion: depot.io/v1
//! offline: false
//! download:
//!   waitTimeout: 60s
//! localRepositories:
//!   - key: libs-release
//! remoteRepositories:
//!   - key: central
//!     url: https://repo1.maven.org/maven2
//!     fetchJarsEagerly: true
//! virtualRepositories:
//!   - key: public
//!     repositories: [libs-release, central]
//! ```

use depot_core::ChecksumPolicyType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credentials::Credentials;
use crate::error::{RepoError, Result};

/// Key of the aggregate of every repository
pub const GLOBAL_REPO_KEY: &str = "repo";

/// Suffix appended to a remote key to name its cache repository
pub const CACHE_KEY_SUFFIX: &str = "-cache";

/// Configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepotConfig {
    /// API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Global offline mode: no remote repository is contacted
    #[serde(default)]
    pub offline: bool,

    #[serde(default)]
    pub download: DownloadSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub local_repositories: Vec<RepoDescriptor>,

    #[serde(default)]
    pub remote_repositories: Vec<RemoteRepoDescriptor>,

    #[serde(default)]
    pub virtual_repositories: Vec<VirtualRepoDescriptor>,
}

fn default_api_version() -> String {
    "depot.io/v1".to_string()
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            offline: false,
            download: DownloadSettings::default(),
            storage: StorageSettings::default(),
            local_repositories: Vec::new(),
            remote_repositories: Vec::new(),
            virtual_repositories: Vec::new(),
        }
    }
}

impl DepotConfig {
    /// Load configuration from default location
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| RepoError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("depot").join("depot.yaml"))
    }

    /// Storage root: the configured path or the platform data directory
    pub fn storage_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir().ok_or_else(|| RepoError::InvalidConfig {
            message: "Could not determine data directory".to_string(),
        })?;
        Ok(data_dir.join("depot"))
    }

    pub fn local(&self, key: &str) -> Option<&RepoDescriptor> {
        self.local_repositories.iter().find(|r| r.key == key)
    }

    pub fn remote(&self, key: &str) -> Option<&RemoteRepoDescriptor> {
        self.remote_repositories.iter().find(|r| r.base.key == key)
    }

    pub fn virtual_repo(&self, key: &str) -> Option<&VirtualRepoDescriptor> {
        self.virtual_repositories.iter().find(|r| r.key == key)
    }

    /// Every key a request may target, in declaration order
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.local_repositories.iter().map(|r| r.key.clone()).collect();
        for remote in &self.remote_repositories {
            keys.push(remote.base.key.clone());
            keys.push(remote.cache_key());
        }
        keys.extend(self.virtual_repositories.iter().map(|r| r.key.clone()));
        keys
    }

    /// Add a local repository
    pub fn add_local(&mut self, repo: RepoDescriptor) -> Result<()> {
        self.ensure_free(&repo.key)?;
        self.local_repositories.push(repo);
        Ok(())
    }

    /// Add a remote repository
    pub fn add_remote(&mut self, repo: RemoteRepoDescriptor) -> Result<()> {
        self.ensure_free(&repo.base.key)?;
        self.ensure_free(&repo.cache_key())?;
        self.remote_repositories.push(repo);
        Ok(())
    }

    /// Add a virtual repository
    pub fn add_virtual(&mut self, repo: VirtualRepoDescriptor) -> Result<()> {
        self.ensure_free(&repo.key)?;
        self.virtual_repositories.push(repo);
        Ok(())
    }

    fn ensure_free(&self, key: &str) -> Result<()> {
        if self.keys().iter().any(|k| k == key) {
            return Err(RepoError::RepositoryAlreadyExists {
                name: key.to_string(),
            });
        }
        Ok(())
    }

    /// Check keys, virtual members, URLs and patterns
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for key in self.keys() {
            if key.is_empty() {
                return Err(RepoError::InvalidConfig {
                    message: "Repository key must not be empty".to_string(),
                });
            }
            if key == GLOBAL_REPO_KEY {
                return Err(RepoError::InvalidConfig {
                    message: format!("Repository key '{}' is reserved", GLOBAL_REPO_KEY),
                });
            }
            if key.contains(['/', ':']) {
                return Err(RepoError::InvalidConfig {
                    message: format!("Repository key '{}' must not contain '/' or ':'", key),
                });
            }
            if !seen.insert(key.clone()) {
                return Err(RepoError::RepositoryAlreadyExists { name: key });
            }
        }

        for local in &self.local_repositories {
            local.patterns()?;
        }

        for remote in &self.remote_repositories {
            remote.base.patterns()?;
            TransportKind::detect(&remote.url)?;
        }

        for virt in &self.virtual_repositories {
            RepoPatterns::new(&virt.includes_pattern, &virt.excludes_pattern)?;
            for member in &virt.repositories {
                if !seen.contains(member) {
                    return Err(RepoError::InvalidConfig {
                        message: format!(
                            "Virtual repository '{}' references unknown repository '{}'",
                            virt.key, member
                        ),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Download coordination settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSettings {
    /// How long a request waits for a concurrent download of the same path
    #[serde(with = "humantime_serde", default = "default_wait_timeout")]
    pub wait_timeout: Duration,

    /// Prepared stream handles unclaimed for this long are closed
    #[serde(with = "humantime_serde", default = "default_handle_max_idle")]
    pub handle_max_idle: Duration,

    /// Interval of the prepared-handle reaper
    #[serde(with = "humantime_serde", default = "default_reaper_interval")]
    pub reaper_interval: Duration,

    /// Maximum time a single read of a response body may block
    #[serde(with = "humantime_serde", default = "default_stream_timeout")]
    pub stream_timeout: Duration,
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_handle_max_idle() -> Duration {
    Duration::from_secs(300)
}

fn default_reaper_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_stream_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            wait_timeout: default_wait_timeout(),
            handle_max_idle: default_handle_max_idle(),
            reaper_interval: default_reaper_interval(),
            stream_timeout: default_stream_timeout(),
        }
    }
}

/// Where binaries and item records live
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Settings shared by local and remote repositories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoDescriptor {
    /// Unique key of the repository
    pub key: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_true")]
    pub handle_releases: bool,

    #[serde(default = "default_true")]
    pub handle_snapshots: bool,

    /// Comma separated globs of accepted paths (empty accepts everything)
    #[serde(default)]
    pub includes_pattern: String,

    /// Comma separated globs of rejected paths
    #[serde(default)]
    pub excludes_pattern: String,

    /// A blacked out repository serves and accepts nothing
    #[serde(default)]
    pub blacked_out: bool,

    #[serde(default)]
    pub checksum_policy: ChecksumPolicyType,
}

fn default_true() -> bool {
    true
}

impl RepoDescriptor {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: None,
            handle_releases: true,
            handle_snapshots: true,
            includes_pattern: String::new(),
            excludes_pattern: String::new(),
            blacked_out: false,
            checksum_policy: ChecksumPolicyType::default(),
        }
    }

    pub fn patterns(&self) -> Result<RepoPatterns> {
        RepoPatterns::new(&self.includes_pattern, &self.excludes_pattern)
    }
}

/// Remote repository definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRepoDescriptor {
    #[serde(flatten)]
    pub base: RepoDescriptor,

    /// Origin URL (HTTP(S) or file)
    pub url: String,

    /// Transport (auto-detected from the URL if not specified)
    #[serde(default)]
    pub transport: Option<TransportKind>,

    /// Administratively disabled
    #[serde(default)]
    pub offline: bool,

    /// Propagate remote failures instead of degrading to the cache
    #[serde(default)]
    pub hard_fail: bool,

    /// Cached expirable items are revalidated after this many seconds
    #[serde(default = "default_retrieval_cache_period")]
    pub retrieval_cache_period_secs: i64,

    /// Remote misses are remembered for this many seconds
    #[serde(default = "default_missed_retrieval_cache_period")]
    pub missed_retrieval_cache_period_secs: i64,

    /// Remote folder listings are remembered for this many seconds
    #[serde(default = "default_remote_listing_cache_period")]
    pub remote_listing_cache_period_secs: i64,

    /// Cooldown after a remote failure before the origin is tried again
    #[serde(default = "default_assumed_offline_period")]
    pub assumed_offline_period_secs: i64,

    #[serde(default = "default_true")]
    pub list_remote_folder_items: bool,

    /// Pre-fetch the jar after its POM was downloaded
    #[serde(default)]
    pub fetch_jars_eagerly: bool,

    /// Pre-fetch the sources jar after a jar was downloaded
    #[serde(default)]
    pub fetch_sources_eagerly: bool,

    /// Copy remote item properties into the cache
    #[serde(default)]
    pub synchronize_properties: bool,

    #[serde(with = "humantime_serde", default = "default_socket_timeout")]
    pub socket_timeout: Duration,

    #[serde(default)]
    pub credentials: Option<Credentials>,
}

fn default_retrieval_cache_period() -> i64 {
    7200
}

fn default_missed_retrieval_cache_period() -> i64 {
    1800
}

fn default_remote_listing_cache_period() -> i64 {
    300
}

fn default_assumed_offline_period() -> i64 {
    300
}

fn default_socket_timeout() -> Duration {
    Duration::from_secs(15)
}

impl RemoteRepoDescriptor {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            base: RepoDescriptor::new(key),
            url: url.into(),
            transport: None,
            offline: false,
            hard_fail: false,
            retrieval_cache_period_secs: default_retrieval_cache_period(),
            missed_retrieval_cache_period_secs: default_missed_retrieval_cache_period(),
            remote_listing_cache_period_secs: default_remote_listing_cache_period(),
            assumed_offline_period_secs: default_assumed_offline_period(),
            list_remote_folder_items: true,
            fetch_jars_eagerly: false,
            fetch_sources_eagerly: false,
            synchronize_properties: false,
            socket_timeout: default_socket_timeout(),
            credentials: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.base.key
    }

    /// Key of the cache repository owned by this remote
    pub fn cache_key(&self) -> String {
        format!("{}{}", self.base.key, CACHE_KEY_SUFFIX)
    }

    /// Configured or detected transport
    pub fn transport_kind(&self) -> Result<TransportKind> {
        match self.transport {
            Some(kind) => Ok(kind),
            None => TransportKind::detect(&self.url),
        }
    }
}

/// Virtual repository definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualRepoDescriptor {
    pub key: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Ordered member keys (local, remote or virtual)
    #[serde(default)]
    pub repositories: Vec<String>,

    #[serde(default)]
    pub includes_pattern: String,

    #[serde(default)]
    pub excludes_pattern: String,
}

impl VirtualRepoDescriptor {
    pub fn new(key: impl Into<String>, repositories: Vec<String>) -> Self {
        Self {
            key: key.into(),
            description: None,
            repositories,
            includes_pattern: String::new(),
            excludes_pattern: String::new(),
        }
    }
}

/// Remote transport type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// HTTP(S) origin
    Http,

    /// Directory on the local filesystem acting as origin
    File,
}

impl TransportKind {
    /// Auto-detect transport type from URL
    pub fn detect(url: &str) -> Result<Self> {
        if url.starts_with("file://") || url.starts_with('/') {
            Ok(TransportKind::File)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            url::Url::parse(url).map_err(|e| RepoError::InvalidRepositoryUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            Ok(TransportKind::Http)
        } else {
            Err(RepoError::InvalidRepositoryUrl {
                url: url.to_string(),
                reason: "URL must start with http://, https://, file://, or /".to_string(),
            })
        }
    }
}

/// Compiled includes/excludes globs of a repository
#[derive(Debug, Clone, Default)]
pub struct RepoPatterns {
    includes: Vec<glob::Pattern>,
    excludes: Vec<glob::Pattern>,
}

impl RepoPatterns {
    pub fn new(includes: &str, excludes: &str) -> Result<Self> {
        Ok(Self {
            includes: compile_patterns(includes)?,
            excludes: compile_patterns(excludes)?,
        })
    }

    /// Accept-all patterns
    pub fn any() -> Self {
        Self::default()
    }

    /// Whether `path` is included and not excluded
    pub fn accepts(&self, path: &str) -> bool {
        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let included = self.includes.is_empty()
            || self.includes.iter().any(|p| p.matches_with(path, options));
        included && !self.excludes.iter().any(|p| p.matches_with(path, options))
    }
}

fn compile_patterns(patterns: &str) -> Result<Vec<glob::Pattern>> {
    patterns
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| RepoError::InvalidConfig {
                message: format!("Invalid pattern '{}': {}", p, e),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
apiVersion: depot.io/v1
download:
  waitTimeout: 5s
  handleMaxIdle: 2m
localRepositories:
  - key: libs-release
    handleSnapshots: false
    excludesPattern: "com/internal/**"
remoteRepositories:
  - key: central
    url: https://repo1.maven.org/maven2
    fetchJarsEagerly: true
    missedRetrievalCachePeriodSecs: 60
    credentials:
      type: basic
      username: deployer
      password: s3cret
virtualRepositories:
  - key: public
    repositories: [libs-release, central]
"#;

    #[test]
    fn test_parse_sample() {
        let config = DepotConfig::from_yaml(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.download.wait_timeout, Duration::from_secs(5));
        assert_eq!(config.download.handle_max_idle, Duration::from_secs(120));
        assert_eq!(config.download.stream_timeout, Duration::from_secs(30));

        let local = config.local("libs-release").unwrap();
        assert!(local.handle_releases);
        assert!(!local.handle_snapshots);

        let central = config.remote("central").unwrap();
        assert_eq!(central.cache_key(), "central-cache");
        assert_eq!(central.transport_kind().unwrap(), TransportKind::Http);
        assert_eq!(central.missed_retrieval_cache_period_secs, 60);
        assert_eq!(central.retrieval_cache_period_secs, 7200);
        assert!(central.fetch_jars_eagerly);
        assert!(matches!(central.credentials, Some(Credentials::Basic { .. })));

        assert_eq!(
            config.keys(),
            vec!["libs-release", "central", "central-cache", "public"]
        );
    }

    #[test]
    fn test_transport_detection() {
        assert_eq!(
            TransportKind::detect("https://repo1.maven.org/maven2").unwrap(),
            TransportKind::Http
        );
        assert_eq!(
            TransportKind::detect("file:///srv/maven").unwrap(),
            TransportKind::File
        );
        assert_eq!(TransportKind::detect("/srv/maven").unwrap(), TransportKind::File);
        assert!(TransportKind::detect("ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = DepotConfig::default();
        config.add_local(RepoDescriptor::new("libs")).unwrap();
        assert!(matches!(
            config.add_local(RepoDescriptor::new("libs")),
            Err(RepoError::RepositoryAlreadyExists { .. })
        ));

        // A local named like a remote's cache collides
        config.local_repositories.push(RepoDescriptor::new("central-cache"));
        config
            .remote_repositories
            .push(RemoteRepoDescriptor::new("central", "https://example.com"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_reserved_and_unknown() {
        let mut config = DepotConfig::default();
        config.local_repositories.push(RepoDescriptor::new(GLOBAL_REPO_KEY));
        assert!(config.validate().is_err());

        let mut config = DepotConfig::default();
        config
            .virtual_repositories
            .push(VirtualRepoDescriptor::new("public", vec!["missing".into()]));
        assert!(config.validate().is_err());

        let mut config = DepotConfig::default();
        config
            .remote_repositories
            .push(RemoteRepoDescriptor::new("bad", "gopher://example.com"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_patterns() {
        let patterns = RepoPatterns::new("org/acme/**, com/acme/**", "org/acme/secret/**").unwrap();
        assert!(patterns.accepts("org/acme/lib/1.0/lib-1.0.jar"));
        assert!(patterns.accepts("com/acme/x.pom"));
        assert!(!patterns.accepts("org/acme/secret/key.jar"));
        assert!(!patterns.accepts("net/other/x.jar"));

        assert!(RepoPatterns::any().accepts("anything/at/all.jar"));
        assert!(RepoPatterns::new("[", "").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("depot.yaml");

        let mut config = DepotConfig::default();
        config.add_local(RepoDescriptor::new("libs")).unwrap();
        config
            .add_remote(RemoteRepoDescriptor::new("central", "file:///srv/maven"))
            .unwrap();
        config.save_to(&path).unwrap();

        let loaded = DepotConfig::load_from(&path).unwrap();
        assert_eq!(loaded.local_repositories, config.local_repositories);
        assert_eq!(loaded.remote_repositories, config.remote_repositories);
    }
}
