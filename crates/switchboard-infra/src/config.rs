//! Global configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.switchboard/` unless
//! `SWITCHBOARD_DATA_DIR` says otherwise) into [`GlobalConfig`]. A missing
//! or malformed file falls back to defaults.

use std::path::{Path, PathBuf};

use switchboard_types::config::GlobalConfig;

pub const DATA_DIR_ENV: &str = "SWITCHBOARD_DATA_DIR";
pub const CONFIG_FILE: &str = "config.toml";

/// Resolve the data directory.
///
/// Priority:
/// 1. `SWITCHBOARD_DATA_DIR` environment variable
/// 2. `~/.switchboard`
/// 3. `.switchboard` in the working directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".switchboard"))
        .unwrap_or_else(|| PathBuf::from(".switchboard"))
}

/// Load `{data_dir}/config.toml`, or defaults if it is missing or invalid.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to read config, using defaults");
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to parse config, using defaults");
            GlobalConfig::default()
        }
    }
}
