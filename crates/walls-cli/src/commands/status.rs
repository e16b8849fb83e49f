//! Status command implementation

use std::collections::BTreeSet;

use anyhow::{Context, Result};

use walls_core::pidfile::{pid_path_in, running_pid};
use walls_core::PortAllocator;

use super::CliContext;
use crate::client::LEGACY_PORTS;
use crate::output::{format_apps, format_tool_servers, print_info, print_warning, AppRow};

/// Execute the status command
///
/// Lists the hub daemon, every known app with a live connect probe, and
/// every configured tool server.
pub async fn status_command(ctx: &CliContext) -> Result<()> {
    match running_pid(&pid_path_in(&ctx.state_dir)) {
        Some(pid) => print_info(&format!("Hub daemon running (PID: {})", pid)),
        None => print_warning("Hub daemon is not running"),
    }

    let connector = ctx.connector();
    let config = connector.config().context("Failed to read config")?;
    let reservations = PortAllocator::from_settings(&ctx.state_dir, &config.server)
        .reservations()
        .unwrap_or_default();

    let mut names: BTreeSet<String> = config.apps.keys().cloned().collect();
    names.extend(LEGACY_PORTS.iter().map(|(name, _)| name.to_string()));
    names.extend(reservations.keys().cloned());

    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        let entry = config.apps.get(&name);
        let enabled = entry.map_or(true, |e| e.enabled);
        let description = entry.map(|e| e.description.clone()).unwrap_or_default();

        let row = if enabled {
            match connector.resolve_port(&name) {
                Ok((port, source)) => AppRow {
                    running: Some(connector.is_app_running(&name).await),
                    port: Some(port),
                    source: source.to_string(),
                    name,
                    enabled,
                    description,
                },
                Err(e) => {
                    tracing::debug!("Cannot resolve '{}': {}", name, e);
                    AppRow {
                        name,
                        enabled,
                        running: Some(false),
                        port: None,
                        source: "-".to_string(),
                        description,
                    }
                }
            }
        } else {
            AppRow {
                port: entry.and_then(|e| e.port),
                name,
                enabled,
                running: None,
                source: "config".to_string(),
                description,
            }
        };
        rows.push(row);
    }

    println!("Apps:");
    println!("{}", format_apps(&rows));

    let statuses = ctx
        .supervisor()?
        .status_all()
        .await
        .context("Failed to read tool servers")?;
    println!();
    println!("Tool servers:");
    println!("{}", format_tool_servers(&statuses));

    Ok(())
}
