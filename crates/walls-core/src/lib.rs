//! walls-core: Core abstractions and configuration for the Walls command hub
//!
//! This crate provides the error taxonomy, the persisted configuration
//! document and its store, port allocation with cross-process reservations,
//! and OS process helpers shared by the hub and the CLI.

pub mod config;
pub mod error;
pub mod fsutil;
pub mod pidfile;
pub mod ports;
pub mod process;

pub use config::{ConfigStore, HubConfig};
pub use error::{
    CommandError, ConfigError, ConnectionError, PortError, ProcessError, RegistryError,
    WallsError,
};
pub use ports::PortAllocator;
