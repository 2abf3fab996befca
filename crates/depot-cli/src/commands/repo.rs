//! Repository inspection commands

use console::style;
use depot_repo::{DepotConfig, TransportKind};
use serde::Serialize;
use std::path::Path;

use crate::error::{CliError, Result};
use crate::util;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RepoSummary {
    key: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_key: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    members: Vec<String>,
    offline: bool,
    blacked_out: bool,
}

fn summarize(config: &DepotConfig) -> Vec<RepoSummary> {
    let mut summaries = Vec::new();

    for local in &config.local_repositories {
        summaries.push(RepoSummary {
            key: local.key.clone(),
            kind: "local",
            url: None,
            cache_key: None,
            members: Vec::new(),
            offline: false,
            blacked_out: local.blacked_out,
        });
    }

    for remote in &config.remote_repositories {
        let kind = match remote.transport_kind() {
            Ok(TransportKind::File) => "remote (file)",
            Ok(TransportKind::Http) => "remote (http)",
            Err(_) => "remote (?)",
        };
        summaries.push(RepoSummary {
            key: remote.key().to_string(),
            kind,
            url: Some(remote.url.clone()),
            cache_key: Some(remote.cache_key()),
            members: Vec::new(),
            offline: config.offline || remote.offline,
            blacked_out: remote.base.blacked_out,
        });
    }

    for virtual_repo in &config.virtual_repositories {
        summaries.push(RepoSummary {
            key: virtual_repo.key.clone(),
            kind: "virtual",
            url: None,
            cache_key: None,
            members: virtual_repo.repositories.clone(),
            offline: false,
            blacked_out: false,
        });
    }

    summaries
}

/// List configured repositories
pub fn list(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = util::load_config(config_path)?;
    let summaries = summarize(&config);

    if json {
        let rendered = serde_json::to_string_pretty(&summaries)
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", rendered);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No repositories configured.");
        println!();
        println!("Add localRepositories, remoteRepositories or virtualRepositories to your configuration");
        return Ok(());
    }

    println!("{:<24} {:<16} {}", "KEY", "TYPE", "TARGET");
    println!("{}", "-".repeat(80));

    for summary in &summaries {
        let target = match (&summary.url, summary.members.is_empty()) {
            (Some(url), _) => url.clone(),
            (None, false) => summary.members.join(", "),
            (None, true) => String::new(),
        };
        let mut flags = String::new();
        if summary.offline {
            flags.push_str(&format!(" {}", style("(offline)").yellow()));
        }
        if summary.blacked_out {
            flags.push_str(&format!(" {}", style("(blacked out)").red()));
        }
        println!("{:<24} {:<16} {}{}", summary.key, summary.kind, target, flags);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_repo::{RemoteRepoDescriptor, RepoDescriptor, VirtualRepoDescriptor};

    #[test]
    fn test_summarize_orders_by_kind() {
        let mut config = DepotConfig::default();
        config.add_local(RepoDescriptor::new("libs")).unwrap();
        config
            .add_remote(RemoteRepoDescriptor::new("central", "https://repo1.maven.org/maven2"))
            .unwrap();
        config
            .add_virtual(VirtualRepoDescriptor::new(
                "public",
                vec!["libs".to_string(), "central".to_string()],
            ))
            .unwrap();

        let summaries = summarize(&config);
        let keys: Vec<_> = summaries.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["libs", "central", "public"]);
        assert_eq!(summaries[1].kind, "remote (http)");
        assert_eq!(summaries[1].cache_key.as_deref(), Some("central-cache"));
        assert_eq!(summaries[2].members, ["libs", "central"]);
    }

    #[test]
    fn test_global_offline_marks_remotes() {
        let mut config = DepotConfig::default();
        config.offline = true;
        config
            .add_remote(RemoteRepoDescriptor::new("central", "file:///srv/maven"))
            .unwrap();

        let summaries = summarize(&config);
        assert!(summaries[0].offline);
        assert_eq!(summaries[0].kind, "remote (file)");
    }
}
