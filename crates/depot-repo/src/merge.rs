//! Metadata merging across repositories
//!
//! An aggregate request for `maven-metadata.xml` merges every document found
//! among the candidates. A single contributor is served as its original
//! bytes; re-serializing would change formatting and with it the checksum
//! clients already hold. Merged documents get derived checksums, cached per
//! path and recomputed only when the merged length or the newest contributing
//! timestamp changes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use depot_core::{
    ChecksumType, ComputedChecksums, CoreError, MavenMetadata, RepoPath, RepoResource,
};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{RepoError, Result};

#[derive(Debug, Clone)]
struct MergedEntry {
    length: u64,
    last_modified: DateTime<Utc>,
    checksums: ComputedChecksums,
}

/// Derived checksums of merged metadata documents
#[derive(Debug, Default)]
pub struct MergedChecksumCache {
    entries: DashMap<RepoPath, MergedEntry>,
    computations: AtomicU64,
}

impl MergedChecksumCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checksums of the merged document at `path`
    ///
    /// Reuses the cached values while length and timestamp are unchanged.
    pub fn checksums_for(
        &self,
        path: &RepoPath,
        content: &[u8],
        last_modified: DateTime<Utc>,
    ) -> ComputedChecksums {
        let length = content.len() as u64;
        if let Some(entry) = self.entries.get(path) {
            if entry.length == length && entry.last_modified == last_modified {
                return entry.checksums.clone();
            }
        }

        let checksums = ComputedChecksums::of(content);
        self.computations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Computed merged checksums of {} (sha1 {})", path, checksums.sha1);
        self.entries.insert(
            path.clone(),
            MergedEntry {
                length,
                last_modified,
                checksums: checksums.clone(),
            },
        );
        checksums
    }

    /// Cached checksum of the merged document at `path`
    pub fn get(&self, path: &RepoPath, checksum_type: ChecksumType) -> Option<String> {
        self.entries
            .get(path)
            .map(|entry| entry.checksums.get(checksum_type).to_string())
    }

    pub fn invalidate(&self, path: &RepoPath) {
        self.entries.remove(path);
    }

    /// Forget merged documents at (or below, if `recursive`) `path` in any
    /// repository
    pub fn invalidate_path(&self, path: &str, recursive: bool) -> usize {
        let before = self.entries.len();
        let prefix = format!("{}/", path);
        self.entries.retain(|key, _| {
            let matched = key.path() == path
                || (recursive && (path.is_empty() || key.path().starts_with(&prefix)));
            !matched
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many times checksums were (re)computed
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }
}

/// Result of merging the contributors of one path
#[derive(Debug)]
pub enum Merged {
    /// Exactly one document was found; serve it untouched
    Single { resource: RepoResource, content: Bytes },

    /// Several documents were merged
    Combined {
        content: Bytes,
        last_modified: DateTime<Utc>,
        contributors: usize,
    },
}

/// Accumulates metadata documents for one path
pub struct MetadataMerger {
    path: RepoPath,
    merged: Option<MavenMetadata>,
    first: Option<(RepoResource, Bytes)>,
    contributors: usize,
    last_modified: Option<DateTime<Utc>>,
}

impl MetadataMerger {
    pub fn new(path: RepoPath) -> Self {
        Self {
            path,
            merged: None,
            first: None,
            contributors: 0,
            last_modified: None,
        }
    }

    pub fn contributors(&self) -> usize {
        self.contributors
    }

    /// Add the document found in `resource`
    ///
    /// Unparsable documents are skipped. Documents describing another
    /// artifact abort the merge.
    pub fn add(&mut self, resource: RepoResource, content: Bytes) -> Result<()> {
        let document = match MavenMetadata::from_bytes(&content) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!("Skipping unparsable metadata {}: {}", resource.repo_path(), e);
                return Ok(());
            }
        };

        match &mut self.merged {
            None => self.merged = Some(document),
            Some(merged) => {
                merged.merge(&document).map_err(|e| match e {
                    CoreError::ConflictingMetadata { coordinates, message } => {
                        RepoError::ConflictingDescriptor {
                            path: self.path.to_string(),
                            message: format!("{} {}", coordinates, message),
                        }
                    }
                    other => other.into(),
                })?;
            }
        }

        if let Some(last_modified) = resource.last_modified() {
            self.last_modified = Some(match self.last_modified {
                Some(current) if current >= last_modified => current,
                _ => last_modified,
            });
        }
        self.contributors += 1;
        if self.first.is_none() {
            self.first = Some((resource, content));
        }
        Ok(())
    }

    /// Final document, `None` when nothing was found
    pub fn finish(self) -> Result<Option<Merged>> {
        match (self.contributors, self.first, self.merged) {
            (0, _, _) | (_, None, _) | (_, _, None) => Ok(None),
            (1, Some((resource, content)), _) => Ok(Some(Merged::Single { resource, content })),
            (contributors, Some(_), Some(merged)) => Ok(Some(Merged::Combined {
                content: Bytes::from(merged.to_xml()?),
                last_modified: self.last_modified.unwrap_or_else(Utc::now),
                contributors,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use depot_core::ResourceInfo;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn doc(versions: &[&str], last_updated: &str) -> String {
        let latest = versions.last().copied().unwrap_or_default();
        let versions: String = versions
            .iter()
            .map(|v| format!("      <version>{}</version>\n", v))
            .collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata>\n  <groupId>org.acme</groupId>\n  <artifactId>lib</artifactId>\n  <versioning>\n    <latest>{latest}</latest>\n    <versions>\n{versions}    </versions>\n    <lastUpdated>{last_updated}</lastUpdated>\n  </versioning>\n</metadata>\n"
        )
    }

    fn resource(key: &str, secs: i64, size: usize) -> RepoResource {
        RepoResource::found(
            RepoPath::new(key, "org/acme/lib/maven-metadata.xml"),
            ResourceInfo::new(size as u64, ts(secs)),
        )
    }

    fn path() -> RepoPath {
        RepoPath::new("public", "org/acme/lib/maven-metadata.xml")
    }

    #[test]
    fn test_single_contributor_is_untouched() {
        // Odd formatting that a re-serialization would not reproduce
        let original = "<metadata><groupId>org.acme</groupId>  <artifactId>lib</artifactId></metadata>";
        let mut merger = MetadataMerger::new(path());
        merger
            .add(resource("libs", 100, original.len()), Bytes::from(original))
            .unwrap();

        match merger.finish().unwrap().unwrap() {
            Merged::Single { content, .. } => assert_eq!(&content[..], original.as_bytes()),
            other => panic!("expected single contributor, got {:?}", other),
        }
    }

    #[test]
    fn test_combined_takes_latest_timestamp() {
        let older = doc(&["1.0"], "20240101000000");
        let newer = doc(&["1.1"], "20240601000000");

        let mut merger = MetadataMerger::new(path());
        merger.add(resource("libs", 200, newer.len()), Bytes::from(newer)).unwrap();
        merger.add(resource("central-cache", 100, older.len()), Bytes::from(older)).unwrap();

        let Merged::Combined {
            content,
            last_modified,
            contributors,
        } = merger.finish().unwrap().unwrap()
        else {
            panic!("expected merged document");
        };
        assert_eq!(contributors, 2);
        assert_eq!(last_modified, ts(200));

        let merged = MavenMetadata::from_bytes(&content).unwrap();
        assert!(merged.versions().contains(&"1.0".to_string()));
        assert!(merged.versions().contains(&"1.1".to_string()));
        assert_eq!(merged.last_updated(), Some("20240601000000"));
    }

    #[test]
    fn test_conflicting_artifacts() {
        let a = "<metadata><groupId>org.acme</groupId><artifactId>lib</artifactId></metadata>";
        let b = "<metadata><groupId>org.other</groupId><artifactId>lib</artifactId></metadata>";
        let mut merger = MetadataMerger::new(path());
        merger.add(resource("libs", 1, a.len()), Bytes::from(a)).unwrap();
        let err = merger.add(resource("central-cache", 2, b.len()), Bytes::from(b)).unwrap_err();
        assert!(matches!(err, RepoError::ConflictingDescriptor { .. }));
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn test_unparsable_contributor_is_skipped() {
        let mut merger = MetadataMerger::new(path());
        merger.add(resource("libs", 1, 3), Bytes::from_static(b"<x")).unwrap();
        assert_eq!(merger.contributors(), 0);
        assert!(merger.finish().unwrap().is_none());
    }

    #[test]
    fn test_checksum_cache_invalidation() {
        let cache = MergedChecksumCache::new();
        let path = path();

        let first = cache.checksums_for(&path, b"<metadata/>", ts(100));
        let again = cache.checksums_for(&path, b"<metadata/>", ts(100));
        assert_eq!(first, again);
        assert_eq!(cache.computations(), 1);

        // Newer contributor: recomputed even with identical length
        cache.checksums_for(&path, b"<metadata/>", ts(200));
        assert_eq!(cache.computations(), 2);

        let changed = cache.checksums_for(&path, b"<metadata></metadata>", ts(200));
        assert_eq!(cache.computations(), 3);
        assert_eq!(cache.get(&path, ChecksumType::Sha1), Some(changed.sha1));
    }
}
