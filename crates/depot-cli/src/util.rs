//! Shared helpers for CLI commands

use chrono::{DateTime, Utc};
use depot_core::{ChecksumType, Principal, RepoPath};
use depot_repo::{AnonymousReadOnly, DepotConfig, RepositoryService};
use std::path::Path;
use std::sync::Arc;

use crate::error::{CliError, Result};

/// Load the configuration from `path`, or from the default location
pub fn load_config(path: Option<&Path>) -> Result<DepotConfig> {
    match path {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::config_with_help(
                    format!("{} does not exist", path.display()),
                    "Pass an existing file with --config or set DEPOT_CONFIG",
                ));
            }
            tracing::debug!("Loading configuration from {}", path.display());
            Ok(DepotConfig::load_from(path)?)
        }
        None => Ok(DepotConfig::load()?),
    }
}

/// Build the engine for `config`
///
/// Anonymous callers may read but not deploy.
pub fn open_service(config: DepotConfig, offline: bool) -> Result<RepositoryService> {
    let service = RepositoryService::builder(config)
        .gate(Arc::new(AnonymousReadOnly))
        .build()?;
    if offline {
        service.set_global_offline(true);
    }
    Ok(service)
}

/// Parse `repo:path` (or `repo/path`)
pub fn parse_repo_path(id: &str) -> Result<RepoPath> {
    RepoPath::parse(id).map_err(|e| CliError::input(e.to_string()))
}

pub fn principal(user: Option<&str>) -> Principal {
    match user {
        Some(name) if !name.trim().is_empty() => Principal::user(name.trim()),
        _ => Principal::anonymous(),
    }
}

/// Split `key=value`
pub fn parse_key_value(arg: &str) -> Result<(String, String)> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| CliError::input(format!("Expected key=value, got '{}'", arg)))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(CliError::input(format!("Missing key in '{}'", arg)));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

pub fn parse_checksum_type(name: &str) -> Result<ChecksumType> {
    match name.trim().to_ascii_lowercase().as_str() {
        "sha1" | "sha-1" => Ok(ChecksumType::Sha1),
        "md5" => Ok(ChecksumType::Md5),
        "sha256" | "sha-256" => Ok(ChecksumType::Sha256),
        other => Err(CliError::input(format!(
            "Unknown checksum type '{}' (expected sha1, md5 or sha256)",
            other
        ))),
    }
}

/// `value_parser` for RFC 3339 timestamps
pub fn parse_datetime(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{}': {}", value, e))
}

/// Human-readable byte count
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[must_use]
pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("build.number = 42").unwrap(),
            ("build.number".to_string(), "42".to_string())
        );
        assert_eq!(parse_key_value("empty=").unwrap().1, "");
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_parse_checksum_type() {
        assert_eq!(parse_checksum_type("SHA1").unwrap(), ChecksumType::Sha1);
        assert_eq!(parse_checksum_type("sha-256").unwrap(), ChecksumType::Sha256);
        assert!(parse_checksum_type("crc32").is_err());
    }

    #[test]
    fn test_principal() {
        assert_eq!(principal(None), Principal::anonymous());
        assert_eq!(principal(Some("  ")), Principal::anonymous());
        assert_eq!(principal(Some("deployer")), Principal::user("deployer"));
    }

    #[test]
    fn test_parse_datetime() {
        let parsed = parse_datetime("2024-06-01T12:00:00+02:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-06-01T10:00:00+00:00");
        assert!(parse_datetime("yesterday").is_err());
    }
}
