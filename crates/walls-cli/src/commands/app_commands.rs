//! Commands command implementation

use std::time::Duration;

use anyhow::Result;

use walls_protocol::{CommandArgs, CommandInfo};

use super::CliContext;
use crate::output::{print_info, print_warning};

/// Budget for asking a running app for its command list
const HELP_TIMEOUT: Duration = Duration::from_secs(2);

/// Built-in command lists for apps that predate `help`
pub fn known_commands(app: &str) -> Option<Vec<CommandInfo>> {
    let list: &[(&str, &str)] = match app {
        "radio_player" => &[
            ("play", "Start/resume playback"),
            ("pause", "Pause playback"),
            ("stop", "Stop playback"),
            ("next", "Next station"),
            ("prev", "Previous station"),
            ("volume level=<0-100>", "Set volume"),
            ("status", "Get current status"),
            ("add url=<url> name=<name>", "Add custom station"),
            ("search name=<name>", "Search stations"),
        ],
        "words" => &[
            ("set_text text=<text>", "Set document text"),
            ("insert_text offset=<pos> text=<text>", "Insert text at position"),
            ("open path=<file>", "Open document"),
            ("save path=<file>", "Save document"),
        ],
        "browser" => &[
            ("open url=<url>", "Open URL"),
            ("back", "Navigate back"),
            ("forward", "Navigate forward"),
            ("reload", "Reload page"),
            ("bookmark_add [url=<url>] [name=<name>]", "Add bookmark"),
            ("click selector=<css>", "Click element by CSS selector"),
            ("click_text text=<text>", "Click link/button by text"),
            ("get_html_sync", "Get current page HTML"),
            ("summarize", "Summarize current page into JSON"),
        ],
        _ => return None,
    };

    Some(
        list.iter()
            .map(|(name, description)| CommandInfo::new(*name, *description))
            .collect(),
    )
}

/// Execute the commands command
///
/// Asks the running app via `help` first and falls back to the built-in
/// lists when it cannot answer.
pub async fn commands_command(ctx: &CliContext, app: &str) -> Result<()> {
    let live = match ctx
        .connector()
        .send_command(app, "help", CommandArgs::new(), HELP_TIMEOUT)
        .await
    {
        Ok(response) if response.is_success() => response
            .data
            .and_then(|data| serde_json::from_value::<Vec<CommandInfo>>(data).ok()),
        Ok(response) => {
            tracing::debug!("'{}' rejected help: {:?}", app, response.message);
            None
        }
        Err(e) => {
            tracing::debug!("'{}' did not answer help: {}", app, e);
            None
        }
    };

    let commands = match live.or_else(|| known_commands(app)) {
        Some(commands) => commands,
        None => {
            print_warning(&format!("No command list available for '{}'", app));
            print_info("Try sending 'help' to the app directly once it is running");
            return Ok(());
        }
    };

    println!("Available commands for {}:", app);
    for info in commands {
        if info.description.is_empty() {
            println!("  {}", info.name);
        } else {
            println!("  {} - {}", info.name, info.description);
        }
    }
    Ok(())
}
