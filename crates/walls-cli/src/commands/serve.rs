//! Hub daemon

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use walls_core::pidfile::{pid_path_in, running_pid, PidFileGuard};
use walls_core::process::{is_process_alive, terminate_process};
use walls_hub::control::{control_router, HUB_APP, HUB_DESCRIPTION};
use walls_hub::{CommandServer, HubState};

use super::CliContext;
use crate::output::{print_batch, print_info, print_success, print_warning};

/// How long `stop` waits for the daemon to exit
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the hub daemon in the foreground until Ctrl+C or SIGTERM
///
/// Registers the built-in `hub` control app, optionally starts every enabled
/// tool server, and on shutdown stops every child it spawned.
pub async fn serve_command(ctx: &CliContext) -> Result<()> {
    let pid_path = pid_path_in(&ctx.state_dir);
    if let Some(pid) = running_pid(&pid_path) {
        bail!("Hub daemon already running (PID: {})", pid);
    }
    let _pid_guard = PidFileGuard::new(pid_path, std::process::id())
        .with_context(|| format!("Failed to write PID file in {:?}", ctx.state_dir))?;

    tracing::info!("Walls hub starting...");
    let state = HubState::initialize(&ctx.config_path, &ctx.state_dir)
        .context("Failed to initialize hub state")?;
    let settings = state.config.load()?.server;

    let server = CommandServer::new(Arc::clone(&state));
    let port = server
        .register_app(HUB_APP, control_router(Arc::clone(&state)), HUB_DESCRIPTION)
        .await
        .context("Failed to register the hub control app")?;
    server.start();

    print_success(&format!(
        "Hub running (PID: {}), control app '{}' on 127.0.0.1:{}",
        std::process::id(),
        HUB_APP,
        port
    ));
    print_info(&format!("Config: {}", state.config.path().display()));

    if settings.auto_start_mcp {
        match state.supervisor.start_all().await {
            Ok(report) => print_batch(&report),
            Err(e) => tracing::error!("Failed to auto-start tool servers: {}", e),
        }
    }

    wait_for_shutdown_signal().await;

    server.shutdown().await;
    state.shutdown().await;
    tracing::info!("Walls hub shutdown complete");
    Ok(())
}

/// Ask a running hub daemon to shut down and wait for it to exit
pub async fn stop_command(ctx: &CliContext) -> Result<()> {
    let Some(pid) = running_pid(&pid_path_in(&ctx.state_dir)) else {
        print_warning("Hub daemon is not running");
        return Ok(());
    };

    print_info(&format!("Stopping hub daemon (PID: {})...", pid));
    terminate_process(pid).with_context(|| format!("Failed to signal PID {}", pid))?;

    let deadline = Instant::now() + STOP_TIMEOUT;
    while is_process_alive(pid) {
        if Instant::now() >= deadline {
            bail!("Hub daemon (PID: {}) did not exit within {:?}", pid, STOP_TIMEOUT);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    print_success("Hub daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
