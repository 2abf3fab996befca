//! Maven metadata documents (`maven-metadata.xml`)
//!
//! The model mirrors the Maven repository metadata format closely enough to
//! merge documents coming from several repositories: versions and plugins are
//! unioned, and the "current" pointers (`latest`, `release`, `snapshot`,
//! `lastUpdated`) follow whichever document was updated last.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Format of `lastUpdated` and snapshot `updated` stamps
pub const LAST_UPDATED_FORMAT: &str = "%Y%m%d%H%M%S";

/// Root `<metadata>` element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "metadata", rename_all = "camelCase")]
pub struct MavenMetadata {
    #[serde(rename = "@modelVersion", default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versioning: Option<Versioning>,

    #[serde(default, skip_serializing_if = "Plugins::is_empty")]
    pub plugins: Plugins,
}

/// `<versioning>` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versioning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,

    #[serde(default, skip_serializing_if = "Versions::is_empty")]
    pub versions: Versions,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,

    #[serde(default, skip_serializing_if = "SnapshotVersions::is_empty")]
    pub snapshot_versions: SnapshotVersions,
}

/// `<versions>` list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versions {
    #[serde(default)]
    pub version: Vec<String>,
}

impl Versions {
    pub fn is_empty(&self) -> bool {
        self.version.is_empty()
    }
}

/// `<snapshot>` pointer of a snapshot version folder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_number: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_copy: Option<bool>,
}

/// `<snapshotVersions>` list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotVersions {
    #[serde(default)]
    pub snapshot_version: Vec<SnapshotVersion>,
}

impl SnapshotVersions {
    pub fn is_empty(&self) -> bool {
        self.snapshot_version.is_empty()
    }
}

/// One deployed file of a snapshot build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

impl SnapshotVersion {
    fn key(&self) -> (&str, &str) {
        (
            self.classifier.as_deref().unwrap_or(""),
            self.extension.as_deref().unwrap_or(""),
        )
    }
}

/// `<plugins>` list of a group-level document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugins {
    #[serde(default)]
    pub plugin: Vec<Plugin>,
}

impl Plugins {
    pub fn is_empty(&self) -> bool {
        self.plugin.is_empty()
    }
}

/// Maven plugin prefix mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plugin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub prefix: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
}

impl MavenMetadata {
    /// Parse a metadata document
    pub fn parse(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(xml).map_err(|e| CoreError::InvalidMetadata {
            message: e.to_string(),
        })
    }

    /// Parse a metadata document from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let xml = std::str::from_utf8(bytes).map_err(|e| CoreError::InvalidMetadata {
            message: e.to_string(),
        })?;
        Self::parse(xml.trim_start_matches('\u{feff}'))
    }

    /// Serialize with an XML declaration and two-space indentation
    pub fn to_xml(&self) -> Result<String> {
        let mut body = String::new();
        let mut serializer = quick_xml::se::Serializer::with_root(&mut body, Some("metadata"))
            .map_err(|e| CoreError::MetadataSerialization {
                message: e.to_string(),
            })?;
        serializer.indent(' ', 2);
        self.serialize(serializer)
            .map_err(|e| CoreError::MetadataSerialization {
                message: e.to_string(),
            })?;

        let mut xml = String::with_capacity(XML_DECLARATION.len() + body.len() + 1);
        xml.push_str(XML_DECLARATION);
        xml.push_str(&body);
        xml.push('\n');
        Ok(xml)
    }

    /// `groupId:artifactId[:version]` for log and error messages
    pub fn coordinates(&self) -> String {
        let mut coords = format!(
            "{}:{}",
            self.group_id.as_deref().unwrap_or("?"),
            self.artifact_id.as_deref().unwrap_or("?")
        );
        if let Some(version) = &self.version {
            coords.push(':');
            coords.push_str(version);
        }
        coords
    }

    pub fn versions(&self) -> &[String] {
        self.versioning
            .as_ref()
            .map(|v| v.versions.version.as_slice())
            .unwrap_or(&[])
    }

    pub fn last_updated(&self) -> Option<&str> {
        self.versioning.as_ref()?.last_updated.as_deref()
    }

    /// `lastUpdated` as a timestamp
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        let stamp = self.last_updated()?;
        NaiveDateTime::parse_from_str(stamp, LAST_UPDATED_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Merge `other` into `self`
    ///
    /// Versions, plugins and snapshot versions are unioned. When `other` was
    /// updated more recently, its `latest`, `release`, `snapshot` and
    /// `lastUpdated` replace ours. Returns whether anything changed.
    ///
    /// Documents describing different artifacts cannot be merged.
    pub fn merge(&mut self, other: &MavenMetadata) -> Result<bool> {
        self.check_same_artifact(other)?;

        let mut changed = false;

        if self.group_id.is_none() && other.group_id.is_some() {
            self.group_id = other.group_id.clone();
            changed = true;
        }
        if self.artifact_id.is_none() && other.artifact_id.is_some() {
            self.artifact_id = other.artifact_id.clone();
            changed = true;
        }
        if self.version.is_none() && other.version.is_some() {
            self.version = other.version.clone();
            changed = true;
        }

        for plugin in &other.plugins.plugin {
            if !self.plugins.plugin.iter().any(|p| p.prefix == plugin.prefix) {
                self.plugins.plugin.push(plugin.clone());
                changed = true;
            }
        }

        if let Some(theirs) = &other.versioning {
            let ours = self.versioning.get_or_insert_with(Versioning::default);
            changed |= ours.merge(theirs);
        }

        Ok(changed)
    }

    fn check_same_artifact(&self, other: &MavenMetadata) -> Result<()> {
        let differs = |a: &Option<String>, b: &Option<String>| {
            matches!((a, b), (Some(a), Some(b)) if a != b)
        };
        if differs(&self.group_id, &other.group_id) || differs(&self.artifact_id, &other.artifact_id) {
            return Err(CoreError::ConflictingMetadata {
                coordinates: self.coordinates(),
                message: format!("cannot merge with {}", other.coordinates()),
            });
        }
        Ok(())
    }
}

impl Versioning {
    fn merge(&mut self, other: &Versioning) -> bool {
        let mut changed = false;

        for version in &other.versions.version {
            if !self.versions.version.contains(version) {
                self.versions.version.push(version.clone());
                changed = true;
            }
        }

        let other_is_newer = match (&self.last_updated, &other.last_updated) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(ours), Some(theirs)) => stamp_value(theirs) > stamp_value(ours),
        };

        if other_is_newer {
            if other.latest.is_some() {
                self.latest = other.latest.clone();
            }
            if other.release.is_some() {
                self.release = other.release.clone();
            }
            if other.snapshot.is_some() {
                self.snapshot = other.snapshot.clone();
            }
            self.last_updated = other.last_updated.clone();
            changed = true;
        }

        for theirs in &other.snapshot_versions.snapshot_version {
            match self
                .snapshot_versions
                .snapshot_version
                .iter_mut()
                .find(|ours| ours.key() == theirs.key())
            {
                Some(ours) => {
                    let newer = match (&ours.updated, &theirs.updated) {
                        (_, None) => false,
                        (None, Some(_)) => true,
                        (Some(a), Some(b)) => stamp_value(b) > stamp_value(a),
                    };
                    if newer {
                        *ours = theirs.clone();
                        changed = true;
                    }
                }
                None => {
                    self.snapshot_versions.snapshot_version.push(theirs.clone());
                    changed = true;
                }
            }
        }

        changed
    }
}

// Stamps are fixed-width digits; anything unparsable sorts first
fn stamp_value(stamp: &str) -> u64 {
    stamp.trim().parse().unwrap_or(0)
}
