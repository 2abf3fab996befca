//! Configuration inspection commands

use console::style;
use depot_repo::DepotConfig;
use std::path::Path;

use crate::error::{CliError, Result};
use crate::util;

/// Validate the configuration and summarize it
pub fn check(config_path: Option<&Path>) -> Result<()> {
    let config = util::load_config(config_path)?;
    config.validate()?;

    println!(
        "{} Configuration valid: {} local, {} remote, {} virtual",
        style("✓").green(),
        config.local_repositories.len(),
        config.remote_repositories.len(),
        config.virtual_repositories.len()
    );
    println!("  {} {}", style("storage:").dim(), config.storage_path()?.display());
    if config.offline {
        println!("  {} global offline mode is on", style("⚠").yellow());
    }
    for remote in config.remote_repositories.iter().filter(|r| r.offline) {
        println!("  {} {} is offline", style("⚠").yellow(), remote.key());
    }

    Ok(())
}

/// Print the effective configuration as YAML
pub fn show(config_path: Option<&Path>) -> Result<()> {
    let config = util::load_config(config_path)?;
    let rendered =
        serde_yaml::to_string(&config).map_err(|e| CliError::internal(e.to_string()))?;
    print!("{}", rendered);
    Ok(())
}

pub fn path() -> Result<()> {
    println!("{}", DepotConfig::default_path()?.display());
    Ok(())
}
