//! Checksum types and digest computation
//!
//! Every stored binary carries SHA-1, MD5 and SHA-256 values. For each type a
//! resource tracks two values:
//! - **original**: what the origin (remote server or deploying client) declared
//! - **actual**: what we computed over the bytes we received

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Sha1,
    Md5,
    Sha256,
}

impl ChecksumType {
    pub const ALL: [ChecksumType; 3] = [ChecksumType::Sha1, ChecksumType::Md5, ChecksumType::Sha256];

    /// File extension of the companion checksum file (with the dot)
    pub fn ext(self) -> &'static str {
        match self {
            ChecksumType::Sha1 => ".sha1",
            ChecksumType::Md5 => ".md5",
            ChecksumType::Sha256 => ".sha256",
        }
    }

    /// HTTP header carrying this checksum on remote responses
    pub fn header_name(self) -> &'static str {
        match self {
            ChecksumType::Sha1 => "X-Checksum-Sha1",
            ChecksumType::Md5 => "X-Checksum-Md5",
            ChecksumType::Sha256 => "X-Checksum-Sha256",
        }
    }

    /// Length of the hex representation
    pub fn hex_len(self) -> usize {
        match self {
            ChecksumType::Sha1 => 40,
            ChecksumType::Md5 => 32,
            ChecksumType::Sha256 => 64,
        }
    }

    /// Detect the checksum type from a checksum file path
    pub fn from_path(path: &str) -> Option<ChecksumType> {
        Self::ALL.into_iter().find(|t| path.ends_with(t.ext()))
    }

    /// Whether `value` is a well-formed hex digest of this type
    pub fn is_valid(self, value: &str) -> bool {
        value.len() == self.hex_len() && value.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Extract the digest from the body of a checksum file
    ///
    /// Checksum files in the wild contain either the bare digest or
    /// `"<digest>  <filename>"`; some also prefix the filename.
    pub fn parse_file_content(self, content: &str) -> Option<String> {
        content
            .split_whitespace()
            .map(|token| token.to_ascii_lowercase())
            .find(|token| self.is_valid(token))
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha256 => "sha256",
        };
        f.write_str(name)
    }
}

/// Original and actual value of one checksum type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    pub checksum_type: ChecksumType,
    /// Value declared by the origin, if any
    pub original: Option<String>,
    /// Value computed over the stored bytes
    pub actual: Option<String>,
}

impl ChecksumInfo {
    pub fn new(checksum_type: ChecksumType, original: Option<String>, actual: Option<String>) -> Self {
        Self {
            checksum_type,
            original: original.map(|v| v.trim().to_ascii_lowercase()),
            actual: actual.map(|v| v.trim().to_ascii_lowercase()),
        }
    }

    /// Both values present and equal
    pub fn is_identical(&self) -> bool {
        matches!((&self.original, &self.actual), (Some(o), Some(a)) if o == a)
    }
}

/// Checksums of a resource, one entry per type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChecksumsInfo {
    entries: BTreeMap<ChecksumType, ChecksumInfo>,
}

impl ChecksumsInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from declared originals and computed actuals
    pub fn from_parts(
        originals: &BTreeMap<ChecksumType, String>,
        computed: Option<&ComputedChecksums>,
    ) -> Self {
        let mut info = Self::new();
        for checksum_type in ChecksumType::ALL {
            let original = originals.get(&checksum_type).cloned();
            let actual = computed.map(|c| c.get(checksum_type).to_string());
            if original.is_some() || actual.is_some() {
                info.insert(ChecksumInfo::new(checksum_type, original, actual));
            }
        }
        info
    }

    pub fn insert(&mut self, info: ChecksumInfo) {
        self.entries.insert(info.checksum_type, info);
    }

    pub fn get(&self, checksum_type: ChecksumType) -> Option<&ChecksumInfo> {
        self.entries.get(&checksum_type)
    }

    /// Declared value of a type
    pub fn original(&self, checksum_type: ChecksumType) -> Option<&str> {
        self.get(checksum_type).and_then(|c| c.original.as_deref())
    }

    /// Computed value of a type
    pub fn actual(&self, checksum_type: ChecksumType) -> Option<&str> {
        self.get(checksum_type).and_then(|c| c.actual.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChecksumInfo> {
        self.entries.values()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Digests computed over a byte stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedChecksums {
    pub sha1: String,
    pub md5: String,
    pub sha256: String,
    pub size: u64,
}

impl ComputedChecksums {
    pub fn get(&self, checksum_type: ChecksumType) -> &str {
        match checksum_type {
            ChecksumType::Sha1 => &self.sha1,
            ChecksumType::Md5 => &self.md5,
            ChecksumType::Sha256 => &self.sha256,
        }
    }

    /// Compute all digests over an in-memory buffer
    pub fn of(data: &[u8]) -> Self {
        let mut checksummer = Checksummer::new();
        checksummer.update(data);
        checksummer.finish()
    }
}

/// Incremental digest of all supported checksum types
#[derive(Clone, Default)]
pub struct Checksummer {
    sha1: Sha1,
    md5: Md5,
    sha256: Sha256,
    size: u64,
}

impl Checksummer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.sha1.update(chunk);
        self.md5.update(chunk);
        self.sha256.update(chunk);
        self.size += chunk.len() as u64;
    }

    pub fn finish(self) -> ComputedChecksums {
        ComputedChecksums {
            sha1: hex::encode(self.sha1.finalize()),
            md5: hex::encode(self.md5.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
            size: self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let c = ComputedChecksums::of(b"hello world");
        assert_eq!(c.sha1, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert_eq!(c.md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(
            c.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(c.size, 11);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut checksummer = Checksummer::new();
        checksummer.update(b"hello ");
        checksummer.update(b"world");
        assert_eq!(checksummer.finish(), ComputedChecksums::of(b"hello world"));
    }

    #[test]
    fn test_from_path() {
        assert_eq!(ChecksumType::from_path("a/b.jar.sha1"), Some(ChecksumType::Sha1));
        assert_eq!(ChecksumType::from_path("a/b.pom.md5"), Some(ChecksumType::Md5));
        assert_eq!(ChecksumType::from_path("a/b.pom.sha256"), Some(ChecksumType::Sha256));
        assert_eq!(ChecksumType::from_path("a/b.jar"), None);
    }

    #[test]
    fn test_parse_file_content() {
        let sha1 = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";
        assert_eq!(ChecksumType::Sha1.parse_file_content(sha1), Some(sha1.to_string()));
        assert_eq!(
            ChecksumType::Sha1.parse_file_content(&format!("{}  lib-1.0.jar\n", sha1.to_uppercase())),
            Some(sha1.to_string())
        );
        assert_eq!(ChecksumType::Sha1.parse_file_content("<html>not found</html>"), None);
    }

    #[test]
    fn test_checksums_info_from_parts() {
        let computed = ComputedChecksums::of(b"x");
        let mut originals = BTreeMap::new();
        originals.insert(ChecksumType::Sha1, computed.sha1.to_uppercase());

        let info = ChecksumsInfo::from_parts(&originals, Some(&computed));
        assert!(info.get(ChecksumType::Sha1).unwrap().is_identical());
        assert_eq!(info.original(ChecksumType::Md5), None);
        assert_eq!(info.actual(ChecksumType::Md5), Some(computed.md5.as_str()));
    }
}
