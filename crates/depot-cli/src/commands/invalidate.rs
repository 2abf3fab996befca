//! Invalidate command - expire cached copies so the next request refetches

use console::style;
use std::path::Path;

use crate::error::Result;
use crate::util;

pub async fn run(config_path: Option<&Path>, id: &str, recursive: bool) -> Result<()> {
    let repo_path = util::parse_repo_path(id)?;
    let config = util::load_config(config_path)?;
    let service = util::open_service(config, true)?;

    let expired = service.invalidate(&repo_path, recursive).await?;

    if expired == 0 {
        println!("{} Nothing cached under {}", style("→").blue(), repo_path);
    } else {
        println!(
            "{} Expired {} cached item(s) under {}",
            style("✓").green(),
            expired,
            repo_path
        );
    }

    Ok(())
}
