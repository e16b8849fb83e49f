//! Shared, process-safe access to the configuration document
//!
//! Reads go straight to disk without locking: writers always publish a
//! complete document through an atomic rename. Writers take an advisory
//! lock on `<config>.lock`, re-read the current document, apply their
//! change and publish, so concurrent read-modify-write cycles from
//! different processes never lose each other's updates.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{load_config, save_config, AppEntry, HubConfig, ToolServerEntry};
use crate::error::ConfigError;
use crate::fsutil::FileLock;

/// Handle to the persisted configuration document
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    lock_path: PathBuf,
    /// Serializes writers inside this process
    writer: Mutex<()>,
}

impl ConfigStore {
    /// Open the store at `path`, creating a default document if none exists
    ///
    /// Fails with [`ConfigError::Corrupt`] if the existing file cannot be
    /// parsed; callers are expected to refuse to start in that case.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let store = Self::new(path.into());

        match load_config(&store.path) {
            Ok(_) => {}
            Err(ConfigError::NotFound(_)) => {
                tracing::info!("Creating default configuration at {:?}", store.path);
                store.update(|_| ())?;
            }
            Err(e) => return Err(e),
        }

        Ok(store)
    }

    fn new(path: PathBuf) -> Self {
        let mut lock_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);

        Self {
            path,
            lock_path,
            writer: Mutex::new(()),
        }
    }

    /// Path of the document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing the document
    pub fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    /// Read the current document
    ///
    /// A document that disappeared since `open` reads as the default.
    pub fn load(&self) -> Result<HubConfig, ConfigError> {
        match load_config(&self.path) {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => Ok(HubConfig::default()),
            Err(e) => Err(e),
        }
    }

    /// Replace the whole document
    pub fn save(&self, config: &HubConfig) -> Result<(), ConfigError> {
        let config = config.clone();
        self.update(move |current| *current = config)
    }

    /// Read-modify-write the document under the cross-process lock
    ///
    /// The closure sees the latest persisted document, including changes
    /// made by other processes.
    pub fn update<T, F>(&self, f: F) -> Result<T, ConfigError>
    where
        F: FnOnce(&mut HubConfig) -> T,
    {
        let _local = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _lock =
            FileLock::exclusive(&self.lock_path).map_err(|e| ConfigError::io(&self.lock_path, e))?;

        let mut config = self.load()?;
        let result = f(&mut config);
        save_config(&self.path, &config)?;

        Ok(result)
    }

    /// Reset the document to defaults
    pub fn reset(&self) -> Result<(), ConfigError> {
        self.save(&HubConfig::default())
    }

    /// Port of an enabled application
    pub fn app_port(&self, name: &str) -> Result<Option<u16>, ConfigError> {
        Ok(self.load()?.app_port(name))
    }

    /// Record an application's port and description, keeping its enabled flag
    pub fn record_app(&self, name: &str, port: u16, description: &str) -> Result<(), ConfigError> {
        self.update(|config| {
            let entry = config.apps.entry(name.to_string()).or_default();
            entry.port = Some(port);
            if !description.is_empty() {
                entry.description = description.to_string();
            }
        })
    }

    /// Set an application's port, creating the entry if needed
    pub fn set_app_port(&self, name: &str, port: u16) -> Result<(), ConfigError> {
        self.update(|config| {
            config.apps.entry(name.to_string()).or_default().port = Some(port);
        })
    }

    /// Enable or disable an application, creating the entry if needed
    pub fn set_app_enabled(&self, name: &str, enabled: bool) -> Result<(), ConfigError> {
        self.update(|config| {
            config.apps.entry(name.to_string()).or_default().enabled = enabled;
        })
    }

    /// Remove an application entry; returns the removed entry
    pub fn remove_app(&self, name: &str) -> Result<Option<AppEntry>, ConfigError> {
        self.update(|config| config.apps.remove(name))
    }

    /// Tool-server entry by name
    pub fn tool_server(&self, name: &str) -> Result<Option<ToolServerEntry>, ConfigError> {
        Ok(self.load()?.mcp_servers.get(name).cloned())
    }

    /// Toggle a tool server's `enabled` flag; returns `false` if no such entry
    pub fn set_tool_server_enabled(&self, name: &str, enabled: bool) -> Result<bool, ConfigError> {
        self.update(|config| match config.mcp_servers.get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        })
    }

    /// Record or clear a tool server's process id
    pub fn set_process_id(&self, name: &str, pid: Option<u32>) -> Result<(), ConfigError> {
        self.update(|config| {
            if let Some(entry) = config.mcp_servers.get_mut(name) {
                entry.process_id = pid;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConfigStore {
        ConfigStore::open(dir.path().join("config.json")).unwrap()
    }

    #[test]
    fn test_open_creates_default_document() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(store.path().exists());
        assert_eq!(store.load().unwrap(), HubConfig::default());
    }

    #[test]
    fn test_open_rejects_corrupt_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ConfigStore::open(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Corrupt { .. }));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut config = HubConfig::default();
        config.apps.insert(
            "radio_player".to_string(),
            AppEntry {
                port: Some(9999),
                description: "Radio Player Application".to_string(),
                enabled: true,
            },
        );
        config.mcp_servers.insert(
            "rag".to_string(),
            ToolServerEntry {
                enabled: true,
                port: Some(8101),
                script_path: PathBuf::from("MCP/rag/server.py"),
                interpreter: Some("python3".to_string()),
                process_id: Some(4242),
                ..Default::default()
            },
        );

        store.save(&config).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded.apps, config.apps);
        assert_eq!(loaded.mcp_servers, config.mcp_servers);
    }

    #[test]
    fn test_record_app_keeps_enabled_flag() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.set_app_enabled("browser", false).unwrap();
        store.record_app("browser", 9002, "Browser").unwrap();

        let config = store.load().unwrap();
        let entry = &config.apps["browser"];
        assert_eq!(entry.port, Some(9002));
        assert_eq!(entry.description, "Browser");
        assert!(!entry.enabled);
    }

    #[test]
    fn test_tool_server_toggles() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store
            .update(|c| {
                c.mcp_servers
                    .insert("browser".to_string(), ToolServerEntry::default());
            })
            .unwrap();

        assert!(store.set_tool_server_enabled("browser", true).unwrap());
        assert!(!store.set_tool_server_enabled("missing", true).unwrap());

        store.set_process_id("browser", Some(77)).unwrap();
        let entry = store.tool_server("browser").unwrap().unwrap();
        assert!(entry.enabled);
        assert_eq!(entry.process_id, Some(77));

        store.set_process_id("browser", None).unwrap();
        assert_eq!(store.tool_server("browser").unwrap().unwrap().process_id, None);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        ConfigStore::open(&path).unwrap();

        // Separate store handles model separate processes
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = ConfigStore::open(&path).unwrap();
                    for j in 0..5 {
                        store
                            .record_app(&format!("app-{}-{}", i, j), 9000 + i * 10 + j, "")
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = ConfigStore::open(&path).unwrap();
        #[cfg(unix)]
        assert_eq!(store.load().unwrap().apps.len(), 40);
    }
}
