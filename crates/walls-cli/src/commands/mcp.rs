//! Tool-server (`mcp`) command implementations
//!
//! Every command acts on the config document directly, so it works whether
//! or not the hub daemon is running. Servers started here keep running after
//! the CLI exits.

use anyhow::{bail, Context, Result};

use walls_core::ProcessError;
use walls_hub::BatchReport;

use super::{CliContext, ALL};
use crate::output::{format_tool_servers, print_batch, print_info, print_success, print_warning};

/// List configured tool servers and how they would be launched
pub fn mcp_list(ctx: &CliContext) -> Result<()> {
    let config = ctx.store()?.load().context("Failed to read config")?;
    if config.mcp_servers.is_empty() {
        print_info("No tool servers configured");
        return Ok(());
    }

    println!("Configured tool servers:");
    for (name, entry) in &config.mcp_servers {
        let launcher = match &entry.interpreter {
            Some(interpreter) => format!("{} {}", interpreter, entry.script_path.display()),
            None => entry.script_path.display().to_string(),
        };
        println!(
            "  {} [{}] {}",
            name,
            if entry.enabled { "enabled" } else { "disabled" },
            launcher
        );
        if !entry.description.is_empty() {
            println!("      {}", entry.description);
        }
        if !entry.capabilities.is_empty() {
            println!("      capabilities: {}", entry.capabilities.join(", "));
        }
    }
    Ok(())
}

/// Show live status of one tool server, or all of them
pub async fn mcp_status(ctx: &CliContext, name: Option<&str>) -> Result<()> {
    let supervisor = ctx.supervisor()?;
    let statuses = match name.filter(|n| *n != ALL) {
        Some(name) => vec![supervisor.status(name).await?],
        None => supervisor
            .status_all()
            .await
            .context("Failed to read tool servers")?,
    };
    println!("{}", format_tool_servers(&statuses));
    Ok(())
}

/// Start one tool server, or every enabled one
pub async fn mcp_start(ctx: &CliContext, target: &str) -> Result<()> {
    let supervisor = ctx.supervisor()?;
    if target == ALL {
        let report = supervisor.start_all().await?;
        return finish_batch(&report);
    }

    match supervisor.start(target).await {
        Ok(pid) => {
            print_success(&format!("Started {} (PID: {})", target, pid));
            print_info(&format!(
                "Output: {}",
                ctx.logs_dir().join(format!("{}.log", target)).display()
            ));
            Ok(())
        }
        Err(e @ ProcessError::AlreadyRunning { .. }) => {
            print_warning(&e.to_string());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Stop one tool server, or every enabled one
pub async fn mcp_stop(ctx: &CliContext, target: &str) -> Result<()> {
    let supervisor = ctx.supervisor()?;
    if target == ALL {
        let report = supervisor.stop_all().await?;
        return finish_batch(&report);
    }

    match supervisor.stop(target).await {
        Ok(()) => {
            print_success(&format!("Stopped {}", target));
            Ok(())
        }
        Err(e @ ProcessError::NotRunning(_)) => {
            print_warning(&e.to_string());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Restart one tool server, or every enabled one
pub async fn mcp_restart(ctx: &CliContext, target: &str) -> Result<()> {
    let supervisor = ctx.supervisor()?;
    if target == ALL {
        let stopped = supervisor.stop_all().await?;
        print_batch(&stopped);
        let started = supervisor.start_all().await?;
        print_batch(&started);
        let failures = stopped.failures() + started.failures();
        if failures > 0 {
            bail!("{} tool server operation(s) failed", failures);
        }
        return Ok(());
    }

    let pid = supervisor.restart(target).await?;
    print_success(&format!("Restarted {} (PID: {})", target, pid));
    Ok(())
}

/// Include a tool server (or all of them) in batch operations
pub fn mcp_enable(ctx: &CliContext, target: &str) -> Result<()> {
    set_enabled(ctx, target, true)
}

/// Exclude a tool server (or all of them) from batch operations
///
/// A running server keeps running.
pub fn mcp_disable(ctx: &CliContext, target: &str) -> Result<()> {
    set_enabled(ctx, target, false)
}

fn set_enabled(ctx: &CliContext, target: &str, enabled: bool) -> Result<()> {
    let supervisor = ctx.supervisor()?;
    let names: Vec<String> = if target == ALL {
        ctx.store()?.load()?.mcp_servers.into_keys().collect()
    } else {
        vec![target.to_string()]
    };

    if names.is_empty() {
        print_info("No tool servers configured");
        return Ok(());
    }

    for name in names {
        if enabled {
            supervisor.enable(&name)?;
            print_success(&format!("Enabled {}", name));
        } else {
            supervisor.disable(&name)?;
            print_success(&format!("Disabled {}", name));
        }
    }
    Ok(())
}

fn finish_batch(report: &BatchReport) -> Result<()> {
    print_batch(report);
    if !report.is_success() {
        bail!("{} tool server(s) failed", report.failures());
    }
    Ok(())
}
