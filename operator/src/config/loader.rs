//! Configuration loading utilities.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use eyre::{WrapErr as _, eyre};
use tracing::info;

use crate::config::Config;

/// Directory below `$HOME` holding the default config file.
pub const CONFIG_DIR: &str = ".fleetshift";
pub const CONFIG_FILE: &str = "config.toml";

/// `$HOME/.fleetshift/config.toml`.
///
/// # Errors
///
/// Returns an error if `$HOME` is not set.
pub fn default_path() -> eyre::Result<PathBuf> {
    let home = env::var_os("HOME").ok_or_else(|| eyre!("HOME is not set, pass --config"))?;
    Ok(PathBuf::from(home).join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Reads and parses the config from a TOML file.
///
/// A missing file (or missing parent directory) is created empty instead of failing,
/// which yields an empty configuration.
///
/// # Errors
///
/// Returns an error if the file cannot be created, read or parsed.
pub fn load<P: AsRef<Path>>(path: P) -> eyre::Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).wrap_err(format!(
                "Failed to create config directory at: {}",
                dir.display()
            ))?;
        }
        fs::write(path, "").wrap_err(format!(
            "Failed to create config file at: {}",
            path.display()
        ))?;
        info!(path = %path.display(), "created empty config file");
    }

    let content = fs::read_to_string(path).wrap_err(format!(
        "Failed to read config file at: {}",
        path.display()
    ))?;
    let config: Config = toml::from_str(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path.display()
    ))?;
    Ok(config)
}
