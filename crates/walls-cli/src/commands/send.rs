//! Send command implementation

use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::Value;

use walls_protocol::CommandArgs;

use super::CliContext;
use crate::output::print_response;

/// Turn `key=value` words into command arguments
///
/// Values that parse as JSON (numbers, booleans, arrays, objects, null)
/// keep their type; anything else is a string. A word without `=` is
/// stored as `arg<N>` where N is the number of arguments collected so far.
pub fn parse_pairs(pairs: &[String]) -> CommandArgs {
    let mut args = CommandArgs::new();
    let mut position = 0usize;
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                args.insert(key.to_string(), parse_value(value));
            }
            _ => {
                // Explicit pairs keep their key
                let key = loop {
                    let key = format!("arg{}", position);
                    position += 1;
                    if !args.contains_key(&key) {
                        break key;
                    }
                };
                args.insert(key, Value::String(pair.clone()));
            }
        }
    }
    args
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Execute the send command
///
/// Fails when the app cannot be reached or answers with an error status.
pub async fn send_command(
    ctx: &CliContext,
    app: &str,
    command: &str,
    pairs: &[String],
    timeout: Option<Duration>,
    json: bool,
) -> Result<()> {
    let connector = ctx.connector();
    let timeout = timeout.unwrap_or_else(|| connector.default_timeout());
    let args = parse_pairs(pairs);

    tracing::debug!("Sending '{}' to '{}' with {} argument(s)", command, app, args.len());
    let response = connector.send_command(app, command, args, timeout).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }

    if !response.is_success() {
        bail!("'{}' rejected command '{}'", app, command);
    }
    Ok(())
}
