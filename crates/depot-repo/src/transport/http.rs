//! HTTP(S) transport
//!
//! Redirects are followed manually so credentials are only ever sent to the
//! origin the repository was configured with.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::{ChecksumType, Properties};
use futures::TryStreamExt;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, HeaderMap, LAST_MODIFIED, LOCATION};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

use super::{RemoteDownload, RemoteInfo, RemoteItem, RemoteTransport, join_url};
use crate::credentials::{ResolvedCredentials, ScopedCredentials};
use crate::error::{RepoError, Result};

const MAX_REDIRECTS: u32 = 10;

static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\s+[^>]*href\s*=\s*"([^"]+)""#).expect("valid href regex")
});

/// Answer of the origin once redirects are resolved
enum Fetched {
    Ok(reqwest::Response),
    Missing(u16),
}

/// `?properties` document as served by artifact repositories
#[derive(Debug, Deserialize)]
struct PropertiesDocument {
    #[serde(default)]
    properties: BTreeMap<String, Vec<String>>,
}

/// Transport over HTTP(S)
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    credentials: ScopedCredentials,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        credentials: Option<ResolvedCredentials>,
        timeout: Duration,
    ) -> Result<Self> {
        Url::parse(base_url).map_err(|e| RepoError::InvalidRepositoryUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .user_agent(concat!("depot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RepoError::NetworkError {
                message: e.to_string(),
            })?;

        let credentials = match credentials {
            Some(creds) => ScopedCredentials::single(base_url, creds),
            None => ScopedCredentials::default(),
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            credentials,
            timeout,
        })
    }

    /// Send a request, following redirects without leaking credentials
    async fn send(&self, method: Method, url: &str) -> Result<reqwest::Response> {
        let mut current_url = url.to_string();
        let mut redirects = 0;

        loop {
            let mut request = self.client.request(method.clone(), &current_url);

            if ScopedCredentials::same_origin(url, &current_url) {
                if let Some(creds) = self.credentials.for_url(&current_url) {
                    request = request.header(AUTHORIZATION, creds.auth_header());
                }
            } else if !self.credentials.is_empty() {
                tracing::warn!(
                    "Cross-origin redirect from {} to {} - credentials not forwarded",
                    url,
                    current_url
                );
            }

            let response = request.send().await.map_err(|e| self.map_error(e))?;

            if response.status().is_redirection() {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(RepoError::NetworkError {
                        message: format!("Too many redirects (max {})", MAX_REDIRECTS),
                    });
                }

                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| RepoError::NetworkError {
                        message: "Redirect without Location header".to_string(),
                    })?;

                let base = Url::parse(&current_url)?;
                current_url = base.join(location)?.to_string();
                continue;
            }

            return Ok(response);
        }
    }

    /// Classify the final response
    ///
    /// Client errors mean "not there" and carry the status; server errors
    /// and throttling are failures of the origin.
    async fn fetch(&self, method: Method, url: &str) -> Result<Fetched> {
        let response = self.send(method, url).await?;
        let status = response.status();

        if status.is_success() {
            return Ok(Fetched::Ok(response));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RepoError::HttpError {
                status: status.as_u16(),
                message: format!("Request to {} failed", url),
            });
        }

        tracing::debug!("{} answered {} for {}", self.base_url, status, url);
        Ok(Fetched::Missing(status.as_u16()))
    }

    fn map_error(&self, e: reqwest::Error) -> RepoError {
        if e.is_timeout() {
            RepoError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else {
            e.into()
        }
    }
}

/// Remote metadata carried by response headers
fn remote_info(headers: &HeaderMap) -> RemoteInfo {
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let last_modified = headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|t| t.with_timezone(&Utc));

    let mut info = RemoteInfo::found(size, last_modified);
    for checksum_type in ChecksumType::ALL {
        if let Some(value) = headers
            .get(checksum_type.header_name())
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| checksum_type.is_valid(v))
        {
            info.checksums.insert(checksum_type, value);
        }
    }
    info
}

/// Children of an HTML directory listing
fn parse_listing(html: &str) -> Vec<RemoteItem> {
    let mut items = Vec::new();
    for capture in HREF.captures_iter(html) {
        let href = &capture[1];
        if href.starts_with("..")
            || href.starts_with('/')
            || href.starts_with('?')
            || href.starts_with('#')
            || href.contains("://")
        {
            continue;
        }
        let href = href.trim_start_matches("./");
        let folder = href.ends_with('/');
        let name = href.trim_end_matches('/');
        if name.is_empty() || name.contains('/') {
            continue;
        }
        if items.iter().any(|i: &RemoteItem| i.name == name) {
            continue;
        }
        items.push(RemoteItem {
            name: name.to_string(),
            folder,
            size: None,
            last_modified: None,
        });
    }
    items
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn head_info(&self, path: &str) -> Result<RemoteInfo> {
        let url = join_url(&self.base_url, path);
        match self.fetch(Method::HEAD, &url).await? {
            Fetched::Ok(response) => Ok(remote_info(response.headers())),
            Fetched::Missing(status) => Ok(RemoteInfo::not_found(status)),
        }
    }

    async fn get_stream(&self, path: &str) -> Result<RemoteDownload> {
        let url = join_url(&self.base_url, path);
        match self.fetch(Method::GET, &url).await? {
            Fetched::Ok(response) => {
                let info = remote_info(response.headers());
                let content = response.bytes_stream().map_err(std::io::Error::other);
                Ok(RemoteDownload {
                    info,
                    content: Box::pin(content),
                })
            }
            Fetched::Missing(status) => Err(RepoError::NotFound {
                path: url,
                reason: format!("Remote answered {}", status),
            }),
        }
    }

    async fn get_text(&self, path: &str) -> Result<Option<String>> {
        let url = join_url(&self.base_url, path);
        match self.fetch(Method::GET, &url).await? {
            Fetched::Ok(response) => Ok(Some(response.text().await.map_err(|e| self.map_error(e))?)),
            Fetched::Missing(_) => Ok(None),
        }
    }

    async fn list(&self, path: &str) -> Result<Option<Vec<RemoteItem>>> {
        let mut url = join_url(&self.base_url, path);
        if !url.ends_with('/') {
            url.push('/');
        }
        match self.fetch(Method::GET, &url).await? {
            Fetched::Ok(response) => {
                let html = response.text().await.map_err(|e| self.map_error(e))?;
                Ok(Some(parse_listing(&html)))
            }
            Fetched::Missing(_) => Ok(None),
        }
    }

    async fn get_properties(&self, path: &str) -> Result<Option<Properties>> {
        let url = format!("{}?properties", join_url(&self.base_url, path));
        match self.fetch(Method::GET, &url).await? {
            Fetched::Ok(response) => {
                let body = response.bytes().await.map_err(|e| self.map_error(e))?;
                let document: PropertiesDocument = serde_json::from_slice(&body)?;
                let mut properties = Properties::new();
                for (key, values) in document.properties {
                    properties.put(key, values);
                }
                Ok(Some(properties))
            }
            Fetched::Missing(_) => Ok(None),
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(&server.uri(), None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_parse_listing() {
        let html = r#"<html><body>
            <a href="../">../</a>
            <a href="1.0/">1.0/</a>
            <a href="maven-metadata.xml">maven-metadata.xml</a>
            <a href="https://elsewhere/x.jar">x.jar</a>
            <a href="?C=M;O=A">sort</a>
            <A HREF="1.0/">dup</A>
        </body></html>"#;
        let items = parse_listing(html);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "1.0");
        assert!(items[0].folder);
        assert_eq!(items[1].name, "maven-metadata.xml");
        assert!(!items[1].folder);
    }

    #[tokio::test]
    async fn test_head_info_headers() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/org/acme/lib/1.0/lib-1.0.jar"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Length", "11")
                    .insert_header("Last-Modified", "Tue, 15 Nov 1994 08:12:31 GMT")
                    .insert_header("X-Checksum-Sha1", "2AAE6C35C94FCFB415DBE95F408B9CE91EE846ED"),
            )
            .mount(&server)
            .await;

        let info = transport(&server)
            .head_info("org/acme/lib/1.0/lib-1.0.jar")
            .await
            .unwrap();
        assert!(info.found);
        assert_eq!(info.size, Some(11));
        assert_eq!(info.last_modified.unwrap().timestamp(), 784887151);
        assert_eq!(
            info.checksums.get(&ChecksumType::Sha1).map(String::as_str),
            Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
        );
    }

    #[tokio::test]
    async fn test_missing_and_server_error() {
        let server = MockServer::start().await;
        Mock::given(path("/gone.jar"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/broken.jar"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = transport(&server);
        let info = transport.head_info("gone.jar").await.unwrap();
        assert!(!info.found);
        assert_eq!(info.status, Some(404));

        assert!(transport.get_text("gone.jar").await.unwrap().is_none());
        assert!(matches!(
            transport.get_stream("gone.jar").await,
            Err(RepoError::NotFound { .. })
        ));

        let err = transport.head_info("broken.jar").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_get_stream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
            .mount(&server)
            .await;

        let download = transport(&server).get_stream("a.jar").await.unwrap();
        let chunks: Vec<_> = download.content.collect().await;
        let body: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(body, b"hello world");
    }

    #[tokio::test]
    async fn test_credentials_not_forwarded_cross_origin() {
        let origin = MockServer::start().await;
        let mirror = MockServer::start().await;

        Mock::given(path("/a.jar"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", format!("{}/a.jar", mirror.uri())),
            )
            .mount(&origin)
            .await;
        // Mirror rejects anything carrying credentials
        Mock::given(path("/a.jar"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(500))
            .with_priority(1)
            .mount(&mirror)
            .await;
        Mock::given(path("/a.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_string("content"))
            .mount(&mirror)
            .await;

        let transport = HttpTransport::new(
            &origin.uri(),
            Some(ResolvedCredentials::Bearer {
                token: "secret".into(),
            }),
            Duration::from_secs(5),
        )
        .unwrap();

        let text = transport.get_text("a.jar").await.unwrap();
        assert_eq!(text.as_deref(), Some("content"));
    }

    #[tokio::test]
    async fn test_properties() {
        let server = MockServer::start().await;
        Mock::given(path("/a.jar"))
            .and(query_param("properties", ""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "uri": "http://x/a.jar",
                "properties": { "build.number": ["42"], "vcs": ["git", "svn"] }
            })))
            .mount(&server)
            .await;

        let props = transport(&server).get_properties("a.jar").await.unwrap().unwrap();
        assert_eq!(props.first("build.number"), Some("42"));
        assert_eq!(props.get("vcs").unwrap().len(), 2);
    }
}
