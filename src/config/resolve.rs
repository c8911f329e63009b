use super::cli::Args;
use super::structs::{Config, PartialConfig};
use anyhow::{Context, Result, anyhow};
use log::trace;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_SCRATCH_DIR: &str = "/tmp";

/// Resolve the effective configuration: defaults <- config files <-
/// environment variables <- command line flags.
pub fn resolve_config(cli: &Args) -> Result<Config> {
    let mut partial = load_partial(cli.no_config)?;

    if let Ok(log_level) = env::var("ISOBOX_LOG_LEVEL") {
        let log_level = log::LevelFilter::from_str(&log_level)
            .map_err(|_| anyhow!("Invalid log level: {}", log_level))?;
        partial.log_level = Some(log_level);
    }
    if let Ok(hostname) = env::var("ISOBOX_HOSTNAME") {
        if !hostname.is_empty() {
            partial.hostname = Some(hostname);
        }
    }
    if let Ok(domainname) = env::var("ISOBOX_DOMAINNAME") {
        if !domainname.is_empty() {
            partial.domainname = Some(domainname);
        }
    }
    if let Ok(scratch_dir) = env::var("ISOBOX_SCRATCH_DIR") {
        if !scratch_dir.is_empty() {
            partial.scratch_dir = Some(scratch_dir);
        }
    }

    if let Some(log_level) = cli.log_level {
        partial.log_level = Some(log_level);
    }

    Ok(Config {
        log_level: partial.log_level.unwrap_or(log::LevelFilter::Info),
        hostname: partial.hostname,
        domainname: partial.domainname,
        scratch_dir: PathBuf::from(
            partial
                .scratch_dir
                .unwrap_or_else(|| DEFAULT_SCRATCH_DIR.to_string()),
        ),
    })
}

fn load_partial(no_config: bool) -> Result<PartialConfig> {
    let mut merged = PartialConfig::default();
    if no_config {
        return Ok(merged);
    }

    for path in find_config_files() {
        if !path.exists() {
            continue;
        }
        let config_str = std::fs::read_to_string(&path).context(format!(
            "Failed to read config file {}",
            path.display()
        ))?;
        let partial: PartialConfig = toml::from_str(&config_str).context(
            format!("Failed to parse config file {}", path.display()),
        )?;
        merged.merge_missing_from(partial);
        trace!("Loaded config file: {}", path.display());
    }

    Ok(merged)
}

/* Candidate config files, highest priority first. */
fn find_config_files() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(explicit) = env::var("ISOBOX_CONFIG") {
        if !explicit.is_empty() {
            paths.push(PathBuf::from(explicit));
        }
    }
    if let Ok(home) = env::var("HOME") {
        paths.push(PathBuf::from(home).join(".config/isobox/config.toml"));
    }
    paths.push(PathBuf::from("/etc/isobox.toml"));
    paths
}
