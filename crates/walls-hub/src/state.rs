//! Shared hub state

use std::path::{Path, PathBuf};
use std::sync::Arc;

use walls_core::{ConfigStore, PortAllocator, WallsError};

use crate::supervisor::{OutputMode, ProcessSupervisor};

/// State shared by the command server, the supervisor and the control app
pub struct HubState {
    /// Persisted configuration document
    pub config: Arc<ConfigStore>,
    /// Port allocator over the shared state directory
    pub ports: PortAllocator,
    /// Tool-server supervisor
    pub supervisor: ProcessSupervisor,
    state_dir: PathBuf,
}

impl HubState {
    /// Open the config document and set up the allocator and supervisor
    ///
    /// Fails if the config document exists but cannot be parsed.
    pub fn initialize(config_path: &Path, state_dir: &Path) -> Result<Arc<Self>, WallsError> {
        Self::with_output(config_path, state_dir, OutputMode::Log)
    }

    /// Like [`initialize`](Self::initialize) with an explicit output mode
    /// for supervised children
    pub fn with_output(
        config_path: &Path,
        state_dir: &Path,
        output: OutputMode,
    ) -> Result<Arc<Self>, WallsError> {
        let config = Arc::new(ConfigStore::open(config_path)?);
        let settings = config.load()?.server;

        tracing::debug!(
            "Hub state: config {:?}, state dir {:?}, ports {}..{}",
            config.path(),
            state_dir,
            settings.base_port,
            u32::from(settings.base_port) + u32::from(settings.port_range)
        );

        Ok(Arc::new(Self {
            ports: PortAllocator::from_settings(state_dir, &settings),
            supervisor: ProcessSupervisor::with_output(Arc::clone(&config), output),
            config,
            state_dir: state_dir.to_path_buf(),
        }))
    }

    /// Directory holding reservation tokens and the pid file
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Stop every tool server this process spawned
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
