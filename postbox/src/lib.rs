//! The postbox process
//!
//! Finds and parses the configuration file, then either drains the queue
//! once ([`Postbox::send`]) or keeps draining it until interrupted
//! ([`Postbox::run`]).

pub mod controller;

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

pub use controller::Postbox;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "POSTBOX_CONFIG";

fn default_config_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./postbox.config.ron"),
        PathBuf::from("/etc/postbox/postbox.config.ron"),
    ]
}

/// Find the configuration file using the following precedence:
/// 1. `explicit`, usually from `--config`
/// 2. `POSTBOX_CONFIG` environment variable
/// 3. ./postbox.config.ron (current working directory)
/// 4. /etc/postbox/postbox.config.ron (system-wide config)
///
/// # Errors
/// If the explicit or environment path does not exist, or none of the
/// default paths do
pub fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    locate(
        explicit,
        std::env::var_os(CONFIG_ENV),
        &default_config_paths(),
    )
}

fn locate(
    explicit: Option<PathBuf>,
    env: Option<OsString>,
    defaults: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Some(env_path) = env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Read and parse the configuration file at `path`
///
/// # Errors
/// If the file cannot be read or is not a valid configuration
pub fn load_config(path: &Path) -> anyhow::Result<Postbox> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    Postbox::from_ron(&content).with_context(|| format!("Invalid config in {}", path.display()))
}
