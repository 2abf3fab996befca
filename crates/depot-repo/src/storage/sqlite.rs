//! SQLite item and property store
//!
//! Features:
//! - WAL mode for better concurrency
//! - Items and properties in one database file
//! - Auto-recovery on corruption

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::{ChecksumsInfo, Properties, RepoPath};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use std::path::Path;

use super::{ItemStore, PropertiesStore, StoredItem};
use crate::error::{RepoError, Result};

/// SQLite-backed [`ItemStore`] and [`PropertiesStore`]
pub struct SqliteItemStore {
    conn: Mutex<Connection>,
}

impl SqliteItemStore {
    /// Open or create a store at a specific path
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let result = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        );

        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Item store corrupted, recreating: {}", e);
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                Connection::open(path)?
            }
        };

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Open in-memory store (for testing)
    pub fn open_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn.lock();
        // In-memory databases answer "memory" here, which is fine
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                repo_key TEXT NOT NULL,
                path TEXT NOT NULL,
                sha1 TEXT NOT NULL,
                size INTEGER NOT NULL,
                created INTEGER NOT NULL,
                last_modified INTEGER NOT NULL,
                last_updated INTEGER NOT NULL,
                checksums TEXT NOT NULL,
                mime_type TEXT,
                PRIMARY KEY (repo_key, path)
            );

            CREATE TABLE IF NOT EXISTS properties (
                repo_key TEXT NOT NULL,
                path TEXT NOT NULL,
                props TEXT NOT NULL,
                PRIMARY KEY (repo_key, path)
            );

            CREATE INDEX IF NOT EXISTS idx_items_sha1 ON items(sha1);
            "#,
        )?;
        Ok(())
    }

    fn row_to_item(row: &Row<'_>) -> rusqlite::Result<(StoredItemRow, String)> {
        Ok((
            StoredItemRow {
                repo_key: row.get(0)?,
                path: row.get(1)?,
                sha1: row.get(2)?,
                size: row.get(3)?,
                created: row.get(4)?,
                last_modified: row.get(5)?,
                last_updated: row.get(6)?,
                mime_type: row.get(8)?,
            },
            row.get(7)?,
        ))
    }
}

/// Raw column values of an item row
struct StoredItemRow {
    repo_key: String,
    path: String,
    sha1: String,
    size: i64,
    created: i64,
    last_modified: i64,
    last_updated: i64,
    mime_type: Option<String>,
}

impl StoredItemRow {
    fn into_item(self, checksums_json: &str) -> Result<StoredItem> {
        let checksums: ChecksumsInfo = serde_json::from_str(checksums_json)?;
        Ok(StoredItem {
            repo_path: RepoPath::new(self.repo_key, &self.path),
            sha1: self.sha1,
            size: self.size.max(0) as u64,
            created: from_millis(self.created)?,
            last_modified: from_millis(self.last_modified)?,
            last_updated: from_millis(self.last_updated)?,
            checksums,
            mime_type: self.mime_type,
        })
    }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| RepoError::StorageError {
        message: format!("Invalid timestamp {}", millis),
    })
}

const SELECT_ITEM: &str = "SELECT repo_key, path, sha1, size, created, last_modified, last_updated, checksums, mime_type FROM items";

#[async_trait]
impl ItemStore for SqliteItemStore {
    async fn get(&self, path: &RepoPath) -> Result<Option<StoredItem>> {
        let row = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!("{} WHERE repo_key = ?1 AND path = ?2", SELECT_ITEM))?;
            stmt.query_row(params![path.repo_key(), path.path()], Self::row_to_item)
                .optional()?
        };
        row.map(|(row, checksums)| row.into_item(&checksums)).transpose()
    }

    async fn save(&self, item: StoredItem) -> Result<()> {
        let checksums = serde_json::to_string(&item.checksums)?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO items (repo_key, path, sha1, size, created, last_modified, last_updated, checksums, mime_type)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(repo_key, path) DO UPDATE SET
                sha1 = excluded.sha1,
                size = excluded.size,
                last_modified = excluded.last_modified,
                last_updated = excluded.last_updated,
                checksums = excluded.checksums,
                mime_type = excluded.mime_type
            "#,
            params![
                item.repo_path.repo_key(),
                item.repo_path.path(),
                item.sha1,
                item.size as i64,
                item.created.timestamp_millis(),
                item.last_modified.timestamp_millis(),
                item.last_updated.timestamp_millis(),
                checksums,
                item.mime_type,
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, path: &RepoPath) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM items WHERE repo_key = ?1 AND path = ?2",
            params![path.repo_key(), path.path()],
        )?;
        Ok(deleted > 0)
    }

    async fn list(&self, path: &RepoPath) -> Result<Vec<StoredItem>> {
        let rows = {
            let conn = self.conn.lock();
            if path.is_root() {
                let mut stmt = conn.prepare(&format!("{} WHERE repo_key = ?1 ORDER BY path", SELECT_ITEM))?;
                let rows = stmt
                    .query_map(params![path.repo_key()], Self::row_to_item)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            } else {
                let prefix = format!("{}/", path.path());
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE repo_key = ?1 AND (path = ?2 OR substr(path, 1, length(?3)) = ?3) ORDER BY path",
                    SELECT_ITEM
                ))?;
                let rows = stmt
                    .query_map(params![path.repo_key(), path.path(), prefix], Self::row_to_item)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        rows.into_iter()
            .map(|(row, checksums)| row.into_item(&checksums))
            .collect()
    }

    async fn touch(&self, path: &RepoPath, last_updated: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE items SET last_updated = ?3 WHERE repo_key = ?1 AND path = ?2",
            params![path.repo_key(), path.path(), last_updated.timestamp_millis()],
        )?;
        Ok(updated > 0)
    }
}

#[async_trait]
impl PropertiesStore for SqliteItemStore {
    async fn properties(&self, path: &RepoPath) -> Result<Properties> {
        let json: Option<String> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT props FROM properties WHERE repo_key = ?1 AND path = ?2",
                params![path.repo_key(), path.path()],
                |row| row.get(0),
            )
            .optional()?
        };
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Properties::new()),
        }
    }

    async fn set_properties(&self, path: &RepoPath, properties: &Properties) -> Result<()> {
        let conn = self.conn.lock();
        if properties.is_empty() {
            conn.execute(
                "DELETE FROM properties WHERE repo_key = ?1 AND path = ?2",
                params![path.repo_key(), path.path()],
            )?;
        } else {
            conn.execute(
                r#"
                INSERT INTO properties (repo_key, path, props) VALUES (?1, ?2, ?3)
                ON CONFLICT(repo_key, path) DO UPDATE SET props = excluded.props
                "#,
                params![path.repo_key(), path.path(), serde_json::to_string(properties)?],
            )?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqliteItemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteItemStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{ChecksumInfo, ChecksumType, ComputedChecksums};

    fn item(repo: &str, path: &str) -> StoredItem {
        let computed = ComputedChecksums::of(path.as_bytes());
        let mut checksums = ChecksumsInfo::new();
        checksums.insert(ChecksumInfo::new(
            ChecksumType::Sha1,
            Some(computed.sha1.clone()),
            Some(computed.sha1.clone()),
        ));
        let last_modified = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        StoredItem::new(RepoPath::new(repo, path), &computed, checksums, last_modified)
    }

    #[tokio::test]
    async fn test_save_get_roundtrip() {
        let store = SqliteItemStore::open_memory().unwrap();
        let original = item("libs", "org/acme/a.jar");
        store.save(original.clone()).await.unwrap();

        let loaded = store.get(&original.repo_path).await.unwrap().unwrap();
        assert_eq!(loaded.sha1, original.sha1);
        assert_eq!(loaded.last_modified, original.last_modified);
        assert_eq!(loaded.checksums, original.checksums);
        assert_eq!(loaded.mime_type.as_deref(), Some("application/java-archive"));

        assert!(store.get(&RepoPath::new("libs", "missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let store = SqliteItemStore::open_memory().unwrap();
        for path in ["org/acme/a.jar", "org/acme/b/c.jar", "org/acmeco/d.jar"] {
            store.save(item("libs", path)).await.unwrap();
        }
        store.save(item("other", "org/acme/a.jar")).await.unwrap();

        let listed = store.list(&RepoPath::new("libs", "org/acme")).await.unwrap();
        let paths: Vec<_> = listed.iter().map(|i| i.repo_path.path().to_string()).collect();
        assert_eq!(paths, vec!["org/acme/a.jar", "org/acme/b/c.jar"]);

        assert_eq!(store.list(&RepoPath::root("libs")).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_touch_and_delete() {
        let store = SqliteItemStore::open_memory().unwrap();
        let saved = item("libs", "a.pom");
        store.save(saved.clone()).await.unwrap();

        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        assert!(store.touch(&saved.repo_path, epoch).await.unwrap());
        assert_eq!(
            store.get(&saved.repo_path).await.unwrap().unwrap().last_updated,
            epoch
        );

        assert!(store.delete(&saved.repo_path).await.unwrap());
        assert!(!store.delete(&saved.repo_path).await.unwrap());
        assert!(!store.touch(&saved.repo_path, epoch).await.unwrap());
    }

    #[tokio::test]
    async fn test_properties() {
        let store = SqliteItemStore::open_memory().unwrap();
        let path = RepoPath::new("libs", "a.jar");

        let mut props = Properties::new();
        props.add("vcs.revision", "abc123");
        props.add("vcs.revision", "def456");
        store.set_properties(&path, &props).await.unwrap();
        assert_eq!(store.properties(&path).await.unwrap(), props);

        store.set_properties(&path, &Properties::new()).await.unwrap();
        assert!(store.properties(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_at_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("state").join("items.db");
        {
            let store = SqliteItemStore::open_at(&db).unwrap();
            store.save(item("libs", "a.jar")).await.unwrap();
        }
        let reopened = SqliteItemStore::open_at(&db).unwrap();
        assert!(reopened.get(&RepoPath::new("libs", "a.jar")).await.unwrap().is_some());
    }
}
