//! Deploy command - upload a file into a local repository

use bytes::Bytes;
use console::style;
use depot_core::{ChecksumType, DownloadRequest, Properties, RequestContext};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{CliError, Result};
use crate::util;

pub async fn run(
    config_path: Option<&Path>,
    id: &str,
    file: &Path,
    checksums: &[String],
    properties: &[String],
    user: Option<&str>,
) -> Result<()> {
    let repo_path = util::parse_repo_path(id)?;
    if repo_path.is_root() {
        return Err(CliError::input(format!(
            "'{}' names a repository, not a file",
            id
        )));
    }

    let mut declared: BTreeMap<ChecksumType, String> = BTreeMap::new();
    for arg in checksums {
        let (name, value) = util::parse_key_value(arg)?;
        let checksum_type = util::parse_checksum_type(&name)?;
        if !checksum_type.is_valid(&value) {
            return Err(CliError::input(format!(
                "'{}' is not a valid {} checksum",
                value, checksum_type
            )));
        }
        declared.insert(checksum_type, value.to_ascii_lowercase());
    }

    let mut props = Properties::new();
    for arg in properties {
        let (key, value) = util::parse_key_value(arg)?;
        props.add(key, value);
    }

    let content = tokio::fs::read(file).await.map_err(|e| CliError::Io {
        message: format!("Cannot read {}: {}", file.display(), e),
    })?;

    let config = util::load_config(config_path)?;
    // Deployments never reach out to remotes
    let service = util::open_service(config, true)?;

    let request = DownloadRequest::new(repo_path.clone()).with_properties(props);
    let ctx = RequestContext::new(util::principal(user), request);
    let resource = service.deploy(&ctx, Bytes::from(content), declared).await?;

    println!(
        "{} Deployed {} ({})",
        style("✓").green(),
        resource.repo_path(),
        util::format_size(resource.size())
    );
    if let Some(sha1) = resource.sha1() {
        println!("  {} {}", style("sha1:").dim(), sha1);
    }

    Ok(())
}
