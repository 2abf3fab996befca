//! Directory transport
//!
//! A local directory laid out like a Maven repository serves as the origin.
//! Declared checksums come from sidecar `.sha1`/`.md5`/`.sha256` files and
//! properties from a `<file>.properties.json` sidecar.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::{ChecksumType, Properties};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio_util::io::ReaderStream;
use url::Url;

use super::{RemoteDownload, RemoteInfo, RemoteItem, RemoteTransport};
use crate::error::{RepoError, Result};

const PROPERTIES_SUFFIX: &str = ".properties.json";

pub struct FileTransport {
    base_url: String,
    root: PathBuf,
}

impl FileTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            base_url: root.to_string_lossy().trim_end_matches('/').to_string(),
            root,
        }
    }

    /// From a `file://` URL or a plain path
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("file:") {
            let parsed = Url::parse(url)?;
            let root = parsed.to_file_path().map_err(|_| RepoError::InvalidRepositoryUrl {
                url: url.to_string(),
                reason: "not a local file URL".to_string(),
            })?;
            Ok(Self {
                base_url: url.trim_end_matches('/').to_string(),
                root,
            })
        } else {
            Ok(Self::new(url))
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path, refusing anything escaping the root
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }

    async fn declared_checksums(&self, file: &Path) -> BTreeMap<ChecksumType, String> {
        let mut checksums = BTreeMap::new();
        for checksum_type in ChecksumType::ALL {
            let mut sidecar = file.as_os_str().to_owned();
            sidecar.push(checksum_type.ext());
            if let Ok(content) = tokio::fs::read_to_string(PathBuf::from(sidecar)).await {
                if let Some(value) = checksum_type.parse_file_content(&content) {
                    checksums.insert(checksum_type, value);
                }
            }
        }
        checksums
    }

    async fn file_info(&self, path: &str) -> Result<Option<(PathBuf, RemoteInfo)>> {
        let Some(file) = self.resolve(path) else {
            return Ok(None);
        };
        let metadata = match tokio::fs::metadata(&file).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        let mut info = RemoteInfo::found(Some(metadata.len()), last_modified);
        info.checksums = self.declared_checksums(&file).await;
        Ok(Some((file, info)))
    }
}

#[async_trait]
impl RemoteTransport for FileTransport {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn head_info(&self, path: &str) -> Result<RemoteInfo> {
        Ok(self
            .file_info(path)
            .await?
            .map(|(_, info)| info)
            .unwrap_or_else(|| RemoteInfo::not_found(404)))
    }

    async fn get_stream(&self, path: &str) -> Result<RemoteDownload> {
        let Some((file, info)) = self.file_info(path).await? else {
            return Err(RepoError::NotFound {
                path: format!("{}/{}", self.base_url, path),
                reason: "No such file".to_string(),
            });
        };
        let reader = tokio::fs::File::open(&file).await?;
        Ok(RemoteDownload {
            info,
            content: Box::pin(ReaderStream::new(reader)),
        })
    }

    async fn get_text(&self, path: &str) -> Result<Option<String>> {
        let Some(file) = self.resolve(path) else {
            return Ok(None);
        };
        match tokio::fs::read_to_string(&file).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, path: &str) -> Result<Option<Vec<RemoteItem>>> {
        let Some(dir) = self.resolve(path) else {
            return Ok(None);
        };
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(PROPERTIES_SUFFIX) {
                continue;
            }
            let metadata = entry.metadata().await?;
            items.push(RemoteItem {
                name,
                folder: metadata.is_dir(),
                size: metadata.is_file().then(|| metadata.len()),
                last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Some(items))
    }

    async fn get_properties(&self, path: &str) -> Result<Option<Properties>> {
        let Some(text) = self.get_text(&format!("{}{}", path, PROPERTIES_SUFFIX)).await? else {
            return Ok(None);
        };
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(&text)?;
        let mut properties = Properties::new();
        for (key, values) in raw {
            properties.put(key, values);
        }
        Ok(Some(properties))
    }
}

impl std::fmt::Debug for FileTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTransport").field("root", &self.root).finish()
    }
}
