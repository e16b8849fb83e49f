//! Output formatting utilities for the CLI
//!
//! Tables for applications and tool servers, and colored status messages.

use serde_json::Value;
use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use walls_hub::{BatchReport, ToolServerStatus};
use walls_protocol::CommandResponse;

/// One row of the `status` application table
#[derive(Debug, Clone)]
pub struct AppRow {
    pub name: String,
    pub enabled: bool,
    pub running: Option<bool>,
    pub port: Option<u16>,
    pub source: String,
    pub description: String,
}

/// Format applications as a table
pub fn format_apps(apps: &[AppRow]) -> String {
    if apps.is_empty() {
        return "No apps configured".to_string();
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "APP")]
        name: String,
        #[tabled(rename = "ENABLED")]
        enabled: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "PORT")]
        port: String,
        #[tabled(rename = "SOURCE")]
        source: String,
        #[tabled(rename = "DESCRIPTION")]
        description: String,
    }

    let rows: Vec<Row> = apps
        .iter()
        .map(|a| Row {
            name: a.name.clone(),
            enabled: yes_no(a.enabled),
            status: match (a.enabled, a.running) {
                (false, _) => "DISABLED".to_string(),
                (true, Some(true)) => "RUNNING".to_string(),
                (true, Some(false)) => "STOPPED".to_string(),
                (true, None) => "-".to_string(),
            },
            port: opt(a.port),
            source: a.source.clone(),
            description: a.description.clone(),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

/// Format tool-server statuses as a table
pub fn format_tool_servers(servers: &[ToolServerStatus]) -> String {
    if servers.is_empty() {
        return "No tool servers configured".to_string();
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "SERVER")]
        name: String,
        #[tabled(rename = "ENABLED")]
        enabled: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "PORT")]
        port: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "DESCRIPTION")]
        description: String,
    }

    let rows: Vec<Row> = servers
        .iter()
        .map(|s| Row {
            name: s.name.clone(),
            enabled: yes_no(s.enabled),
            state: s.state.to_string(),
            port: opt(s.port),
            pid: opt(s.process_id),
            description: s.description.clone(),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

/// Print one line per entry of a batch operation
pub fn print_batch(report: &BatchReport) {
    if report.outcomes.is_empty() {
        print_info("No tool servers configured");
        return;
    }
    for (name, outcome) in &report.outcomes {
        match outcome {
            Ok(outcome) => print_success(&format!("{}: {}", name, outcome)),
            Err(e) => print_error(&format!("{}: {}", name, e)),
        }
    }
}

/// Print a command response: message first, then pretty-printed data
pub fn print_response(response: &CommandResponse) {
    if response.is_success() {
        print_success(
            response
                .message
                .as_deref()
                .unwrap_or("Command executed successfully"),
        );
    } else {
        print_error(response.message.as_deref().unwrap_or("Command failed"));
    }

    if let Some(data) = &response.data {
        println!("{}", format_value(data));
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn yes_no(flag: bool) -> String {
    let mark = if flag { "✓" } else { "✗" };
    mark.to_string()
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use walls_hub::ProcessState;

    #[test]
    fn test_format_apps_empty() {
        assert_eq!(format_apps(&[]), "No apps configured");
    }

    #[test]
    fn test_format_apps_statuses() {
        let table = format_apps(&[
            AppRow {
                name: "radio_player".to_string(),
                enabled: true,
                running: Some(true),
                port: Some(9999),
                source: "legacy".to_string(),
                description: "Radio".to_string(),
            },
            AppRow {
                name: "words".to_string(),
                enabled: false,
                running: None,
                port: None,
                source: "config".to_string(),
                description: String::new(),
            },
        ]);

        assert!(table.contains("radio_player"));
        assert!(table.contains("RUNNING"));
        assert!(table.contains("9999"));
        assert!(table.contains("DISABLED"));
    }

    #[test]
    fn test_format_tool_servers() {
        let table = format_tool_servers(&[ToolServerStatus {
            name: "rag".to_string(),
            state: ProcessState::Running,
            enabled: true,
            port: Some(8101),
            process_id: Some(4242),
            description: "Retrieval".to_string(),
            capabilities: vec![],
        }]);

        assert!(table.contains("rag"));
        assert!(table.contains("running"));
        assert!(table.contains("4242"));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::String("plain".into())), "plain");
        assert!(format_value(&serde_json::json!({"x": 1})).contains("\"x\": 1"));
    }
}
