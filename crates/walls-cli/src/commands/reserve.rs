//! Reserve and release commands
//!
//! Used by launch scripts to hand out ports before the apps start, so an app
//! that registers later binds the port its peers were already told about.

use anyhow::{Context, Result};

use walls_core::PortAllocator;

use super::CliContext;
use crate::output::print_success;

fn allocator(ctx: &CliContext) -> Result<PortAllocator> {
    let config = ctx.connector().config().context("Failed to read config")?;
    Ok(PortAllocator::from_settings(&ctx.state_dir, &config.server))
}

/// Reserve a port for `app`; reserving again returns the same port
pub fn reserve_command(ctx: &CliContext, app: &str) -> Result<()> {
    let port = allocator(ctx)?
        .reserve(app)
        .with_context(|| format!("Failed to reserve a port for '{}'", app))?;
    print_success(&format!("Reserved port {} for {}", port, app));
    Ok(())
}

/// Drop the reservation for `app`, if any
pub fn release_command(ctx: &CliContext, app: &str) -> Result<()> {
    allocator(ctx)?
        .release(app)
        .with_context(|| format!("Failed to release the port for '{}'", app))?;
    print_success(&format!("Released port reservation for {}", app));
    Ok(())
}
