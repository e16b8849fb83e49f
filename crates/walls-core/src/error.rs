//! Core error types for the Walls command hub

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use walls_protocol::ProtocolError;

/// Top-level error type for the Walls ecosystem
#[derive(Error, Debug)]
pub enum WallsError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Port allocation error
    #[error("Port error: {0}")]
    Port(#[from] PortError),

    /// Application registration error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Command dispatch error
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Client connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Tool-server supervision error
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Port allocation errors
#[derive(Error, Debug)]
pub enum PortError {
    /// No free port left in the configured range
    #[error("No free port in range {base}..{end}")]
    Exhausted { base: u16, end: u32 },

    /// The OS reports the port is already in use
    #[error("Port {0} is already in use")]
    Conflict(u16),

    /// App name cannot be used as a reservation key
    #[error("Invalid app name: {0:?}")]
    InvalidAppName(String),

    /// Reservation token exists but does not hold a port number
    #[error("Invalid reservation token for '{app}': {reason}")]
    InvalidToken { app: String, reason: String },

    /// I/O error on the reservation directory
    #[error("Reservation I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application registration errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Name already has an active listener in this process
    #[error("Application '{0}' is already registered")]
    AlreadyRegistered(String),

    /// No port could be resolved for the name
    #[error("Application '{0}' is not registered")]
    NotRegistered(String),

    /// Registration would exceed `server.max_apps`
    #[error("Maximum number of applications ({0}) reached")]
    LimitReached(usize),
}

/// Errors raised while dispatching a single command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Failure inside an application's command handler
    #[error("{0}")]
    Handler(String),

    /// Request could not be parsed
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Handler does not know the command
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A required argument is absent or has the wrong type
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },
}

impl CommandError {
    /// Shorthand for a handler failure
    pub fn handler(message: impl Into<String>) -> Self {
        CommandError::Handler(message.into())
    }
}

/// Client-side connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// No response arrived in time
    #[error("Timed out after {timeout:?} waiting for '{app}'")]
    Timeout { app: String, timeout: Duration },

    /// Connection refused or reset
    #[error("Failed to reach '{app}' on port {port}: {reason}")]
    Failed {
        app: String,
        port: u16,
        reason: String,
    },

    /// Server closed the connection without answering
    #[error("'{app}' closed the connection without a response")]
    ClosedWithoutResponse { app: String },

    /// Server answered with something that is not a response
    #[error("Invalid response from '{app}': {reason}")]
    InvalidResponse { app: String, reason: String },
}

/// Tool-server supervision errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// No entry with this name in the configuration
    #[error("No configuration found for tool server '{0}'")]
    NotConfigured(String),

    /// Entry already has a live process
    #[error("Tool server '{name}' is already running (pid {pid})")]
    AlreadyRunning { name: String, pid: u32 },

    /// Child process could not be started
    #[error("Failed to start tool server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// Entry has no live process to stop
    #[error("Tool server '{0}' is not running")]
    NotRunning(String),

    /// Process could not be signalled or reaped
    #[error("Failed to stop tool server '{name}': {reason}")]
    StopFailed { name: String, reason: String },

    /// Configuration could not be read or updated
    #[error("Configuration error for '{name}': {reason}")]
    Config { name: String, reason: String },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Config file exists but is not a valid document
    #[error("Config file {path:?} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Reading, writing or locking the config file failed
    #[error("Config I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialize error
    #[error("JSON serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
