//! Config command implementations

use anyhow::{bail, Context, Result};

use super::CliContext;
use crate::output::{print_info, print_success};

/// Print the whole document, or one app entry
pub fn config_show(ctx: &CliContext, app: Option<&str>) -> Result<()> {
    let store = ctx.store()?;
    let config = store.load().context("Failed to read config")?;

    match app {
        Some(name) => {
            let Some(entry) = config.apps.get(name) else {
                bail!("App '{}' is not in the config", name);
            };
            println!("{}", serde_json::to_string_pretty(entry)?);
        }
        None => {
            print_info(&format!("Config file: {}", store.path().display()));
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

/// Update an app entry's port and/or enabled flag, creating it if needed
pub fn config_set(
    ctx: &CliContext,
    app: &str,
    port: Option<u16>,
    enabled: Option<bool>,
) -> Result<()> {
    if port.is_none() && enabled.is_none() {
        bail!("Nothing to set: pass --port and/or --enabled");
    }
    if port == Some(0) {
        bail!("Port must be between 1 and 65535");
    }

    let store = ctx.store()?;
    if let Some(port) = port {
        store
            .set_app_port(app, port)
            .with_context(|| format!("Failed to set port for '{}'", app))?;
        print_success(&format!("Set {} port to {}", app, port));
    }
    if let Some(enabled) = enabled {
        store
            .set_app_enabled(app, enabled)
            .with_context(|| format!("Failed to update '{}'", app))?;
        print_success(&format!(
            "{} {}",
            if enabled { "Enabled" } else { "Disabled" },
            app
        ));
    }
    Ok(())
}

/// Drop an app entry from the document
pub fn config_remove(ctx: &CliContext, app: &str) -> Result<()> {
    match ctx.store()?.remove_app(app)? {
        Some(_) => {
            print_success(&format!("Removed {}", app));
            Ok(())
        }
        None => bail!("App '{}' is not in the config", app),
    }
}

/// Reset the document to defaults
pub fn config_reset(ctx: &CliContext) -> Result<()> {
    ctx.store()?.reset().context("Failed to reset config")?;
    print_success("Configuration reset to defaults");
    Ok(())
}
