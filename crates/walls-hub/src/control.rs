//! Built-in `hub` application served by the daemon
//!
//! Lets any client inspect registrations and drive the daemon's tool-server
//! supervisor over the same protocol applications use.

use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::runtime::Handle;
use walls_core::{CommandError, ProcessError};
use walls_protocol::{CommandArgs, CommandResponse};

use crate::handler::{str_arg, CommandRouter, HandlerResult};
use crate::state::HubState;

/// Name the control app registers under
pub const HUB_APP: &str = "hub";

/// Description recorded for the control app
pub const HUB_DESCRIPTION: &str = "Walls hub control";

/// Build the router for the control app
///
/// Must be called from within a tokio runtime; handlers run on its
/// blocking pool and drive async supervisor calls through `handle`.
pub fn control_router(state: Arc<HubState>) -> CommandRouter {
    let handle = Handle::current();

    let apps_state = Arc::clone(&state);
    let status_state = Arc::clone(&state);
    let start_state = Arc::clone(&state);
    let stop_state = Arc::clone(&state);
    let restart_state = Arc::clone(&state);
    let (h1, h2, h3, h4) = (handle.clone(), handle.clone(), handle.clone(), handle);

    CommandRouter::new()
        .route("apps", "List configured apps and port reservations", move |_| {
            list_apps(&apps_state)
        })
        .route("mcp_status", "Status of one tool server or all of them", move |args| {
            tool_status(&h1, &status_state, args)
        })
        .route("mcp_start", "Start a tool server (args: name)", move |args| {
            let name = str_arg(args, "name")?;
            let pid = block_on(&h2, start_state.supervisor.start(name))?;
            Ok(CommandResponse::with_data(json!({ "pid": pid }))
                .message(format!("started {} (pid {})", name, pid)))
        })
        .route("mcp_stop", "Stop a tool server (args: name)", move |args| {
            let name = str_arg(args, "name")?;
            block_on(&h3, stop_state.supervisor.stop(name))?;
            Ok(CommandResponse::ok(format!("stopped {}", name)))
        })
        .route("mcp_restart", "Restart a tool server (args: name)", move |args| {
            let name = str_arg(args, "name")?;
            let pid = block_on(&h4, restart_state.supervisor.restart(name))?;
            Ok(CommandResponse::with_data(json!({ "pid": pid }))
                .message(format!("restarted {} (pid {})", name, pid)))
        })
}

fn block_on<F, T>(handle: &Handle, future: F) -> Result<T, CommandError>
where
    F: Future<Output = Result<T, ProcessError>>,
{
    handle
        .block_on(future)
        .map_err(|e| CommandError::handler(e.to_string()))
}

fn list_apps(state: &HubState) -> HandlerResult {
    let config = state
        .config
        .load()
        .map_err(|e| CommandError::handler(e.to_string()))?;
    let reservations = state
        .ports
        .reservations()
        .map_err(|e| CommandError::handler(e.to_string()))?;

    Ok(CommandResponse::with_data(json!({
        "apps": config.apps,
        "reservations": reservations,
    })))
}

fn tool_status(handle: &Handle, state: &HubState, args: &CommandArgs) -> HandlerResult {
    let data = match args.get("name") {
        None | Some(Value::Null) => {
            let statuses = handle
                .block_on(state.supervisor.status_all())
                .map_err(|e| CommandError::handler(e.to_string()))?;
            serde_json::to_value(statuses)
        }
        Some(_) => {
            let name = str_arg(args, "name")?;
            let status = block_on(handle, state.supervisor.status(name))?;
            serde_json::to_value(status)
        }
    }
    .map_err(|e| CommandError::handler(e.to_string()))?;

    Ok(CommandResponse::with_data(data))
}
