//! CLI command implementations

mod app_commands;
mod config;
mod mcp;
mod reserve;
mod send;
mod serve;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use walls_core::ConfigStore;
use walls_hub::{OutputMode, ProcessSupervisor};

use crate::client::ClientConnector;

pub use app_commands::{commands_command, known_commands};
pub use config::{config_remove, config_reset, config_set, config_show};
pub use mcp::{mcp_disable, mcp_enable, mcp_list, mcp_restart, mcp_start, mcp_status, mcp_stop};
pub use reserve::{release_command, reserve_command};
pub use send::{parse_pairs, send_command};
pub use serve::{serve_command, stop_command};
pub use status::status_command;

/// Target name that addresses every configured tool server
pub const ALL: &str = "all";

/// Paths every command works against
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
}

impl CliContext {
    pub fn new(config_path: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            config_path,
            state_dir,
        }
    }

    /// Open the config document, creating a default one if missing
    pub fn store(&self) -> Result<Arc<ConfigStore>> {
        let store = ConfigStore::open(&self.config_path)
            .with_context(|| format!("Failed to open config {:?}", self.config_path))?;
        Ok(Arc::new(store))
    }

    pub fn connector(&self) -> ClientConnector {
        ClientConnector::new(&self.config_path, &self.state_dir)
    }

    /// Supervisor whose children outlive this process
    ///
    /// Child output is appended to `<state_dir>/logs/<name>.log`.
    pub fn supervisor(&self) -> Result<ProcessSupervisor> {
        Ok(ProcessSupervisor::with_output(
            self.store()?,
            OutputMode::File(self.logs_dir()),
        ))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }
}
