//! walls-hub: Shared command hub for local applications
//!
//! Applications register a command handler under a name and get their own
//! TCP listener on 127.0.0.1. Clients find the port through the shared
//! config document or a reservation token and exchange one JSON request and
//! one JSON response per connection. The hub also supervises auxiliary tool
//! servers described in the config.

pub mod control;
pub mod handler;
pub mod server;
pub mod state;
pub mod supervisor;

pub use handler::{CommandHandler, CommandRouter, HandlerResult};
pub use server::{AppInfo, CommandServer};
pub use state::HubState;
pub use supervisor::{
    BatchReport, OutputMode, ProcessOutcome, ProcessState, ProcessSupervisor, ToolServerStatus,
};
