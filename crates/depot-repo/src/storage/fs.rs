//! Filesystem binary store
//!
//! Binaries are stored by SHA-1 under `<root>/ab/cd/<sha1>` with a JSON
//! sidecar holding all checksums. Writes go to `<root>/tmp` first and are
//! renamed into place, so a partially written binary is never visible.

use async_trait::async_trait;
use depot_core::{Checksummer, ComputedChecksums};
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;

use super::BinaryStore;
use crate::error::{RepoError, Result};
use crate::stream::{BinaryReader, ByteStream};

const TMP_DIR: &str = "tmp";

pub struct FsBinaryStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FsBinaryStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self {
            root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a binary
    pub fn blob_path(&self, sha1: &str) -> Result<PathBuf> {
        if sha1.len() < 4 || !sha1.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RepoError::BinaryNotFound {
                sha1: sha1.to_string(),
            });
        }
        Ok(self.root.join(&sha1[..2]).join(&sha1[2..4]).join(sha1))
    }

    fn sidecar_path(blob: &Path) -> PathBuf {
        blob.with_extension("json")
    }

    fn temp_path(&self) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(TMP_DIR)
            .join(format!("{}-{}.part", std::process::id(), n))
    }
}

#[async_trait]
impl BinaryStore for FsBinaryStore {
    async fn get(&self, sha1: &str) -> Result<BinaryReader> {
        let path = self.blob_path(sha1)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RepoError::BinaryNotFound {
                sha1: sha1.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, mut content: ByteStream) -> Result<ComputedChecksums> {
        let temp = self.temp_path();
        let mut file = tokio::fs::File::create(&temp).await?;
        let mut checksummer = Checksummer::new();

        let written: Result<()> = async {
            while let Some(chunk) = content.try_next().await? {
                checksummer.update(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;
        drop(file);

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }

        let computed = checksummer.finish();
        let blob = self.blob_path(&computed.sha1)?;

        if tokio::fs::try_exists(&blob).await? {
            tokio::fs::remove_file(&temp).await?;
        } else {
            if let Some(parent) = blob.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::rename(&temp, &blob).await?;
            let sidecar = serde_json::to_vec(&computed)?;
            tokio::fs::write(Self::sidecar_path(&blob), sidecar).await?;
        }

        Ok(computed)
    }

    async fn exists(&self, sha1: &str) -> Result<bool> {
        match self.blob_path(sha1) {
            Ok(path) => Ok(tokio::fs::try_exists(path).await?),
            Err(_) => Ok(false),
        }
    }

    async fn describe(&self, sha1: &str) -> Result<Option<ComputedChecksums>> {
        let Ok(blob) = self.blob_path(sha1) else {
            return Ok(None);
        };
        match tokio::fs::read(Self::sidecar_path(&blob)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for FsBinaryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsBinaryStore").field("root", &self.root).finish()
    }
}
