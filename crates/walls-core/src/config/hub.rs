//! Hub configuration document

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// The whole persisted configuration document
///
/// ```json
/// {
///   "server": { "base_port": 9000, "max_apps": 10, "timeout": 5 },
///   "apps": { "radio_player": { "port": 9999, "description": "", "enabled": true } },
///   "mcp_servers": { "rag": { "enabled": true, "port": 8101, "script_path": "MCP/rag/server.py", "process_id": null } },
///   "logging": { "level": "info", "file": null }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Global settings
    pub server: ServerSettings,

    /// Registered applications by name
    pub apps: BTreeMap<String, AppEntry>,

    /// Supervised tool servers by name
    pub mcp_servers: BTreeMap<String, ToolServerEntry>,

    /// Logging settings
    pub logging: LoggingSettings,
}

impl HubConfig {
    /// Port of an enabled application entry, if one is assigned
    pub fn app_port(&self, name: &str) -> Option<u16> {
        self.apps
            .get(name)
            .filter(|app| app.enabled)
            .and_then(|app| app.port)
    }

    /// Tool-server entry by name
    pub fn tool_server(&self, name: &str) -> Option<&ToolServerEntry> {
        self.mcp_servers.get(name)
    }
}

/// Global hub settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// First port handed out to applications
    pub base_port: u16,

    /// Maximum number of concurrently registered applications per process
    pub max_apps: usize,

    /// Default request timeout
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Number of ports above `base_port` available for allocation
    pub port_range: u16,

    /// Start every enabled tool server when the hub daemon starts
    pub auto_start_mcp: bool,

    /// How long a tool server gets to exit after SIGTERM before it is killed
    #[serde(with = "duration_secs")]
    pub stop_grace: Duration,

    /// Directory relative tool-server script paths resolve against
    /// (defaults to the config file's directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_root: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_port: 9000,
            max_apps: 10,
            timeout: Duration::from_secs(5),
            port_range: 100,
            auto_start_mcp: false,
            stop_grace: Duration::from_secs(5),
            tool_root: None,
        }
    }
}

/// Persisted part of an application registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppEntry {
    /// Assigned port
    pub port: Option<u16>,

    /// Human-readable description
    pub description: String,

    /// Whether clients should route to this app
    pub enabled: bool,
}

impl Default for AppEntry {
    fn default() -> Self {
        Self {
            port: None,
            description: String::new(),
            enabled: true,
        }
    }
}

/// Definition of a supervised tool server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerEntry {
    /// Included in batch start/stop
    pub enabled: bool,

    /// Port the tool server listens on (informational)
    pub port: Option<u16>,

    /// Script or executable to run
    #[serde(alias = "path")]
    pub script_path: PathBuf,

    /// Program used to run the script; the script is executed directly
    /// when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    /// Extra arguments appended after the script path
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Human-readable description
    pub description: String,

    /// Capability names advertised by this tool server
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    /// Pid of the running process, if any
    pub process_id: Option<u32>,
}

impl ToolServerEntry {
    /// Absolute path of the script, resolving relative paths against `root`
    pub fn resolve_script(&self, root: &Path) -> PathBuf {
        if self.script_path.is_absolute() {
            self.script_path.clone()
        } else {
            root.join(&self.script_path)
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,

    /// Append logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: HubConfig = serde_json::from_str(
            r#"{"apps": {"browser": {"port": 9002}}, "server": {"base_port": 9100}}"#,
        )
        .unwrap();

        assert_eq!(config.server.base_port, 9100);
        assert_eq!(config.server.max_apps, 10);
        assert_eq!(config.server.timeout, Duration::from_secs(5));
        assert!(config.apps["browser"].enabled);
        assert_eq!(config.app_port("browser"), Some(9002));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_disabled_app_has_no_port() {
        let mut config = HubConfig::default();
        config.apps.insert(
            "words".to_string(),
            AppEntry {
                port: Some(8765),
                description: String::new(),
                enabled: false,
            },
        );

        assert_eq!(config.app_port("words"), None);
        assert_eq!(config.app_port("missing"), None);
    }

    #[test]
    fn test_tool_server_accepts_legacy_path_key() {
        let entry: ToolServerEntry = serde_json::from_str(
            r#"{"enabled": true, "port": 8101, "path": "MCP/rag/server.py"}"#,
        )
        .unwrap();

        assert_eq!(entry.script_path, PathBuf::from("MCP/rag/server.py"));
        assert_eq!(entry.process_id, None);
    }

    #[test]
    fn test_process_id_serialized_as_null() {
        let json = serde_json::to_value(ToolServerEntry::default()).unwrap();
        assert!(json["process_id"].is_null());
        assert!(json.get("interpreter").is_none());
    }

    #[test]
    fn test_resolve_script() {
        let entry = ToolServerEntry {
            script_path: PathBuf::from("tools/server.sh"),
            ..Default::default()
        };
        assert_eq!(
            entry.resolve_script(Path::new("/opt/walls")),
            PathBuf::from("/opt/walls/tools/server.sh")
        );

        let absolute = ToolServerEntry {
            script_path: PathBuf::from("/usr/local/bin/tool"),
            ..Default::default()
        };
        assert_eq!(
            absolute.resolve_script(Path::new("/opt/walls")),
            PathBuf::from("/usr/local/bin/tool")
        );
    }
}
