//! Maven layout naming rules
//!
//! Helpers that classify repository paths by what they name: checksum
//! companion files, `maven-metadata.xml` documents, snapshot artifacts, and
//! POM/JAR siblings used by eager fetching.

use crate::checksum::ChecksumType;

/// File name of Maven metadata documents
pub const METADATA_FILE_NAME: &str = "maven-metadata.xml";

const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// Whether the path names a checksum companion file
pub fn is_checksum(path: &str) -> bool {
    ChecksumType::from_path(path).is_some()
}

/// Target artifact of a checksum file, e.g. `a.jar.sha1` -> `(a.jar, Sha1)`
pub fn checksum_target(path: &str) -> Option<(&str, ChecksumType)> {
    let checksum_type = ChecksumType::from_path(path)?;
    let target = &path[..path.len() - checksum_type.ext().len()];
    if target.is_empty() || target.ends_with('/') {
        return None;
    }
    Some((target, checksum_type))
}

/// Checksum file path of an artifact
pub fn checksum_path(path: &str, checksum_type: ChecksumType) -> String {
    format!("{}{}", path, checksum_type.ext())
}

/// Whether the path names a Maven metadata document
pub fn is_metadata(path: &str) -> bool {
    file_name(path) == METADATA_FILE_NAME
}

/// Whether the path lies in a snapshot version folder
///
/// `org/acme/lib/1.0-SNAPSHOT/lib-1.0-20240102.101010-3.jar` and
/// `org/acme/lib/1.0-SNAPSHOT/maven-metadata.xml` both qualify.
pub fn is_snapshot(path: &str) -> bool {
    parent_name(path).is_some_and(|dir| dir.ends_with(SNAPSHOT_SUFFIX))
}

/// Whether the path is a snapshot artifact with a non-unique
/// (`-SNAPSHOT` literal) file name
///
/// Such files are overwritten in place by their origin and therefore have to
/// be revalidated.
pub fn is_non_unique_snapshot(path: &str) -> bool {
    if !is_snapshot(path) || is_metadata(path) {
        return false;
    }
    let name = file_name(path);
    let base = strip_extension(name);
    base.contains(SNAPSHOT_SUFFIX)
}

/// Whether a cached copy of this path may go stale
///
/// Releases are immutable once published; only metadata documents and
/// non-unique snapshots are re-checked against the origin.
pub fn is_expirable(path: &str) -> bool {
    let path = checksum_target(path).map(|(target, _)| target).unwrap_or(path);
    is_metadata(path) || is_non_unique_snapshot(path)
}

pub fn is_pom(path: &str) -> bool {
    path.ends_with(".pom")
}

/// Whether the path is a primary jar (not sources or javadoc)
pub fn is_jar(path: &str) -> bool {
    path.ends_with(".jar") && !path.ends_with("-sources.jar") && !path.ends_with("-javadoc.jar")
}

/// Sibling artifact worth pre-fetching after `path` was downloaded
///
/// The jar for a POM, the sources jar for a jar. `None` otherwise.
pub fn companion(path: &str, fetch_jars: bool, fetch_sources: bool) -> Option<String> {
    if fetch_jars && is_pom(path) {
        return Some(format!("{}.jar", path.trim_end_matches(".pom")));
    }
    if fetch_sources && is_jar(path) {
        return Some(format!("{}-sources.jar", path.trim_end_matches(".jar")));
    }
    None
}

/// Guess a content type from the file extension
pub fn mime_type(path: &str) -> &'static str {
    let name = file_name(path);
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("pom") | Some("xml") => "application/xml",
        Some("jar") | Some("war") | Some("ear") => "application/java-archive",
        Some("zip") => "application/zip",
        Some("json") => "application/json",
        Some("sha1") | Some("md5") | Some("sha256") | Some("txt") => "text/plain",
        Some("gz") | Some("tgz") => "application/gzip",
        _ => "application/octet-stream",
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parent_name(path: &str) -> Option<&str> {
    let (parent, _) = path.rsplit_once('/')?;
    Some(file_name(parent))
}

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((base, _)) => base,
        None => name,
    }
}
