//! Locating and loading the coordinator's RON configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use relay_common::internal;
use relay_coordinator::CoordinatorConfig;

pub const CONFIG_ENV: &str = "RELAY_CONFIG";

pub const DEFAULT_PATHS: [&str; 2] = ["./relay.config.ron", "/etc/relay/relay.config.ron"];

/// Finds the configuration file using the following precedence:
/// 1. `RELAY_CONFIG` environment variable, which must name an existing file
/// 2. ./relay.config.ron (current working directory)
/// 3. /etc/relay/relay.config.ron (system-wide config)
///
/// # Errors
///
/// If `RELAY_CONFIG` is set to a path that does not exist.
pub fn find_config_file() -> anyhow::Result<Option<PathBuf>> {
    let candidates: Vec<PathBuf> = DEFAULT_PATHS.iter().map(PathBuf::from).collect();
    find_in(std::env::var(CONFIG_ENV).ok(), &candidates)
}

fn find_in(env_path: Option<String>, candidates: &[PathBuf]) -> anyhow::Result<Option<PathBuf>> {
    if let Some(env_path) = env_path {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    Ok(candidates.iter().find(|path| path.exists()).cloned())
}

/// # Errors
///
/// If the file cannot be read or is not a valid coordinator configuration.
pub fn load(path: &Path) -> anyhow::Result<CoordinatorConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    ron::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
}

/// Loads the discovered configuration, or the built-in defaults when there
/// is none.
///
/// # Errors
///
/// If a configuration file was found but could not be loaded.
pub fn discover() -> anyhow::Result<CoordinatorConfig> {
    match find_config_file()? {
        Some(path) => {
            internal!(level = INFO, path = %path.display(), "Loading configuration");
            load(&path)
        }
        None => {
            internal!(level = INFO, "No configuration file found, using defaults");
            Ok(CoordinatorConfig::default())
        }
    }
}
