//! walls: Command-line interface for the Walls command hub
//!
//! Provides the `walls` CLI for running the hub daemon, sending commands
//! to registered applications and managing tool servers.

pub mod client;
pub mod commands;
pub mod logging;
pub mod output;

pub use client::{ClientConnector, PortSource, LEGACY_PORTS};
