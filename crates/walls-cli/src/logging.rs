//! Log subscriber setup for the `walls` binary

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use walls_core::config::LoggingSettings;

/// Pick the filter directive: `RUST_LOG`, then the flags, then the config
pub fn filter_directive(
    rust_log: Option<&str>,
    quiet: bool,
    verbose: u8,
    settings: &LoggingSettings,
) -> String {
    if let Some(directive) = rust_log.filter(|s| !s.trim().is_empty()) {
        return directive.to_string();
    }

    match (quiet, verbose) {
        (true, _) => "error".to_string(),
        (false, 0) => settings.level.clone(),
        (false, 1) => "debug".to_string(),
        (false, _) => "trace".to_string(),
    }
}

/// Install the global subscriber
///
/// Logs go to stderr, or are appended to `settings.file` without ANSI
/// colors when one is configured.
pub fn init(quiet: bool, verbose: u8, settings: &LoggingSettings) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let directive = filter_directive(rust_log.as_deref(), quiet, verbose, settings);
    let filter = EnvFilter::try_new(&directive)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Failed to build log filter")?;

    let (file_layer, stderr_layer) = match &settings.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {:?}", parent))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (Some(layer), None)
        }
        None => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr);
            (None, Some(layer))
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(())
}
