//! Remote transports
//!
//! A transport is how a remote repository talks to its origin. It answers
//! metadata queries (HEAD-equivalent), streams content, fetches small text
//! documents such as checksum files, lists folders and reads remote item
//! properties. Implementations:
//!
//! - [`HttpTransport`]: HTTP(S) origins, with redirect-safe credentials
//! - [`FileTransport`]: a local directory acting as origin
//! - [`MockTransport`]: in-memory origin with call counters for tests

mod http;
mod file;
mod mock;

pub use http::HttpTransport;
pub use file::FileTransport;
pub use mock::{MockTransport, TransportCounts};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::{ChecksumType, Properties};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{RemoteRepoDescriptor, TransportKind};
use crate::error::Result;
use crate::stream::ByteStream;

/// Metadata of a remote item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteInfo {
    pub found: bool,
    /// Origin status code when not found
    pub status: Option<u16>,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: Option<u64>,
    /// Checksums the origin declared alongside the item
    pub checksums: BTreeMap<ChecksumType, String>,
}

impl RemoteInfo {
    pub fn found(size: Option<u64>, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            found: true,
            status: None,
            last_modified,
            size,
            checksums: BTreeMap::new(),
        }
    }

    pub fn not_found(status: u16) -> Self {
        Self {
            found: false,
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Streaming download of a remote item
pub struct RemoteDownload {
    pub info: RemoteInfo,
    pub content: ByteStream,
}

impl std::fmt::Debug for RemoteDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDownload").field("info", &self.info).finish()
    }
}

/// Entry of a remote folder listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub name: String,
    pub folder: bool,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Access to a remote origin
///
/// Paths are relative to the origin's base URL. "Not there" is an `Ok`
/// answer (`found == false` or `None`); errors are reserved for failures to
/// talk to the origin.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Base URL of the origin
    fn base_url(&self) -> &str;

    /// Metadata of a remote item without its content
    async fn head_info(&self, path: &str) -> Result<RemoteInfo>;

    /// Stream the content of a remote item; `NotFound` if absent
    async fn get_stream(&self, path: &str) -> Result<RemoteDownload>;

    /// Small text document (e.g. a checksum file)
    async fn get_text(&self, path: &str) -> Result<Option<String>>;

    /// Children of a remote folder
    async fn list(&self, path: &str) -> Result<Option<Vec<RemoteItem>>>;

    /// Custom properties of a remote item, if the origin exposes them
    async fn get_properties(&self, path: &str) -> Result<Option<Properties>>;
}

/// Create a transport from a remote repository descriptor
pub fn create_transport(descriptor: &RemoteRepoDescriptor) -> Result<Arc<dyn RemoteTransport>> {
    match descriptor.transport_kind()? {
        TransportKind::Http => {
            let credentials = descriptor
                .credentials
                .as_ref()
                .map(|c| c.resolve())
                .transpose()?;
            Ok(Arc::new(HttpTransport::new(
                &descriptor.url,
                credentials,
                descriptor.socket_timeout,
            )?))
        }
        TransportKind::File => Ok(Arc::new(FileTransport::from_url(&descriptor.url)?)),
    }
}

/// Join an origin base URL and a relative path
pub(crate) fn join_url(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        format!("{}/", base.trim_end_matches('/'))
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://repo/maven2/", "/a/b.jar"), "https://repo/maven2/a/b.jar");
        assert_eq!(join_url("https://repo/maven2", "a/b.jar"), "https://repo/maven2/a/b.jar");
        assert_eq!(join_url("https://repo/maven2", ""), "https://repo/maven2/");
    }

    #[test]
    fn test_create_transport() {
        let dir = tempfile::tempdir().unwrap();
        let file = RemoteRepoDescriptor::new("local-origin", dir.path().to_string_lossy());
        let transport = create_transport(&file).unwrap();
        assert!(transport.base_url().ends_with(&*dir.path().to_string_lossy()));

        let http = RemoteRepoDescriptor::new("central", "https://repo1.maven.org/maven2");
        let transport = create_transport(&http).unwrap();
        assert_eq!(transport.base_url(), "https://repo1.maven.org/maven2");

        let bad = RemoteRepoDescriptor::new("bad", "gopher://x");
        assert!(create_transport(&bad).is_err());
    }
}
