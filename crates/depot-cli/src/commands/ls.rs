//! Ls command - list a folder of a remote repository

use console::style;
use serde::Serialize;
use std::path::Path;

use crate::error::{CliError, Result};
use crate::util;

#[derive(Serialize)]
struct Entry<'a> {
    name: &'a str,
    folder: bool,
    size: Option<u64>,
    last_modified: Option<String>,
}

pub async fn run(
    config_path: Option<&Path>,
    offline: bool,
    key: &str,
    path: &str,
    json: bool,
) -> Result<()> {
    let config = util::load_config(config_path)?;
    let service = util::open_service(config, offline)?;

    let items = service.list_remote(key, path).await?;

    if json {
        let entries: Vec<Entry<'_>> = items
            .iter()
            .map(|item| Entry {
                name: &item.name,
                folder: item.folder,
                size: item.size,
                last_modified: item.last_modified.map(|t| t.to_rfc3339()),
            })
            .collect();
        let rendered = serde_json::to_string_pretty(&entries)
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", rendered);
        return Ok(());
    }

    if items.is_empty() {
        println!("No items under {}:{}", key, path);
        return Ok(());
    }

    println!("{:<40} {:>10} {:<20}", "NAME", "SIZE", "MODIFIED");
    println!("{}", "-".repeat(72));
    for item in &items {
        let name = if item.folder {
            style(format!("{}/", item.name)).blue().to_string()
        } else {
            item.name.clone()
        };
        let size = item
            .size
            .map(util::format_size)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:>10} {:<20}",
            name,
            size,
            util::format_time(item.last_modified)
        );
    }

    Ok(())
}
