//! Configuration management for the Walls command hub

mod hub;
pub mod serde_utils;
mod store;

pub use hub::{AppEntry, HubConfig, LoggingSettings, ServerSettings, ToolServerEntry};
pub use store::ConfigStore;

use crate::error::ConfigError;
use crate::fsutil::write_atomic;
use std::path::{Path, PathBuf};

/// Environment variable that relocates the shared state directory
pub const STATE_DIR_ENV: &str = "WALLS_STATE_DIR";

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("walls")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.json")
}

/// Directory shared by every process of the ecosystem for reservation
/// tokens and the hub pid file
///
/// Defaults to `<tmp>/walls_shared_server`; `WALLS_STATE_DIR` overrides it.
pub fn default_state_dir() -> PathBuf {
    match std::env::var_os(STATE_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::temp_dir().join("walls_shared_server"),
    }
}

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<HubConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(ConfigError::io(path, e)),
    };

    serde_json::from_str(&content).map_err(|e| ConfigError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Save configuration to a file, replacing it atomically
pub fn save_config(path: &Path, config: &HubConfig) -> Result<(), ConfigError> {
    let mut content = serde_json::to_vec_pretty(config)?;
    content.push(b'\n');

    write_atomic(path, &content).map_err(|e| ConfigError::io(path, e))
}
