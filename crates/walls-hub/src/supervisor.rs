//! Tool-server supervision
//!
//! Tool servers are auxiliary processes described in the `mcp_servers`
//! section of the config. The supervisor starts them, records their pid in
//! the config so other processes can find them, and stops them with
//! SIGTERM followed by SIGKILL after a grace period. A pid recorded by
//! another process is managed through OS signals; children spawned here
//! are also waited on directly.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use walls_core::config::{ServerSettings, ToolServerEntry};
use walls_core::process::{is_process_alive, kill_process, terminate_process};
use walls_core::{ConfigError, ConfigStore, ProcessError};

/// How often a foreign process is polled while waiting for it to exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for a process to disappear after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Lifecycle state of a tool server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// The recorded process died without being stopped
    Crashed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Status of one tool server, as reported by `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolServerStatus {
    pub name: String,
    pub state: ProcessState,
    pub enabled: bool,
    pub port: Option<u16>,
    pub process_id: Option<u32>,
    pub description: String,
    pub capabilities: Vec<String>,
}

/// Successful outcome of one entry in a batch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ProcessOutcome {
    Started { pid: u32 },
    AlreadyRunning { pid: u32 },
    Stopped,
    NotRunning,
    /// Entry is disabled
    Skipped,
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutcome::Started { pid } => write!(f, "started (pid {})", pid),
            ProcessOutcome::AlreadyRunning { pid } => write!(f, "already running (pid {})", pid),
            ProcessOutcome::Stopped => write!(f, "stopped"),
            ProcessOutcome::NotRunning => write!(f, "not running"),
            ProcessOutcome::Skipped => write!(f, "skipped (disabled)"),
        }
    }
}

/// Per-name outcomes of `start_all` / `stop_all`
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: BTreeMap<String, Result<ProcessOutcome, ProcessError>>,
}

impl BatchReport {
    /// Number of entries that failed
    pub fn failures(&self) -> usize {
        self.outcomes.values().filter(|r| r.is_err()).count()
    }

    /// Whether every entry succeeded or was skipped
    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }

    /// Outcome for one name
    pub fn get(&self, name: &str) -> Option<&Result<ProcessOutcome, ProcessError>> {
        self.outcomes.get(name)
    }
}

/// Where a child's stdout and stderr go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// Drain into the log; the child's pipes close when this process exits
    Log,
    /// Append to `<dir>/<name>.log` so the child can outlive this process
    File(PathBuf),
}

#[derive(Debug)]
struct Slot {
    state: ProcessState,
    child: Option<Child>,
    /// Last pid this supervisor saw alive or started
    last_pid: Option<u32>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            state: ProcessState::Stopped,
            child: None,
            last_pid: None,
        }
    }
}

/// Starts, stops and health-checks tool servers
pub struct ProcessSupervisor {
    config: Arc<ConfigStore>,
    output: OutputMode,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
}

impl ProcessSupervisor {
    /// Create a supervisor whose children log through `tracing`
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self::with_output(config, OutputMode::Log)
    }

    /// Create a supervisor with an explicit output mode
    pub fn with_output(config: Arc<ConfigStore>, output: OutputMode) -> Self {
        Self {
            config,
            output,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, name: &str) -> Arc<Mutex<Slot>> {
        Arc::clone(self.slots.entry(name.to_string()).or_default().value())
    }

    /// Run a config store operation on the blocking pool; writes wait on a
    /// cross-process file lock
    async fn with_store<T, F>(&self, f: F) -> Result<T, ConfigError>
    where
        T: Send + 'static,
        F: FnOnce(&ConfigStore) -> Result<T, ConfigError> + Send + 'static,
    {
        let store = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| ConfigError::Io {
                path: self.config.path().to_path_buf(),
                source: std::io::Error::other(e),
            })?
    }

    async fn entry(&self, name: &str) -> Result<ToolServerEntry, ProcessError> {
        let key = name.to_string();
        self.with_store(move |store| store.tool_server(&key))
            .await
            .map_err(|e| config_error(name, e))?
            .ok_or_else(|| ProcessError::NotConfigured(name.to_string()))
    }

    async fn settings(&self, name: &str) -> Result<ServerSettings, ProcessError> {
        self.with_store(|store| store.load().map(|c| c.server))
            .await
            .map_err(|e| config_error(name, e))
    }

    async fn record_pid(&self, name: &str, pid: Option<u32>) -> Result<(), ProcessError> {
        let key = name.to_string();
        self.with_store(move |store| store.set_process_id(&key, pid))
            .await
            .map_err(|e| config_error(name, e))
    }

    async fn entries(&self) -> Result<BTreeMap<String, ToolServerEntry>, ConfigError> {
        self.with_store(|store| store.load().map(|c| c.mcp_servers))
            .await
    }

    /// Start a tool server; returns its pid
    pub async fn start(&self, name: &str) -> Result<u32, ProcessError> {
        let slot = self.slot(name);
        let mut slot = slot.lock().await;
        // Read under the slot lock so a concurrent stop is fully visible
        let entry = self.entry(name).await?;

        if let Some(pid) = self.refresh(name, &mut slot, &entry).await {
            return Err(ProcessError::AlreadyRunning {
                name: name.to_string(),
                pid,
            });
        }

        if !entry.enabled {
            return Err(ProcessError::SpawnFailed {
                name: name.to_string(),
                reason: "entry is disabled".to_string(),
            });
        }

        let settings = self.settings(name).await?;
        slot.state = ProcessState::Starting;

        let mut child = match self.spawn(name, &entry, &settings) {
            Ok(child) => child,
            Err(e) => {
                slot.state = ProcessState::Stopped;
                return Err(e);
            }
        };

        let Some(pid) = child.id() else {
            slot.state = ProcessState::Stopped;
            return Err(ProcessError::SpawnFailed {
                name: name.to_string(),
                reason: "process exited immediately".to_string(),
            });
        };

        if let Err(e) = self.record_pid(name, Some(pid)).await {
            if let Err(kill_err) = child.start_kill() {
                tracing::warn!(
                    "Failed to kill tool server '{}' (pid {}) after recording its pid failed: {}",
                    name,
                    pid,
                    kill_err
                );
            }
            slot.state = ProcessState::Stopped;
            return Err(e);
        }

        slot.child = Some(child);
        slot.last_pid = Some(pid);
        slot.state = ProcessState::Running;
        tracing::info!("Started tool server '{}' with pid {}", name, pid);
        Ok(pid)
    }

    /// Stop a tool server, escalating to SIGKILL after `server.stop_grace`
    pub async fn stop(&self, name: &str) -> Result<(), ProcessError> {
        let slot = self.slot(name);
        let mut slot = slot.lock().await;
        let entry = self.entry(name).await?;
        let grace = self.settings(name).await?.stop_grace;

        let Some(pid) = self.refresh(name, &mut slot, &entry).await else {
            return Err(ProcessError::NotRunning(name.to_string()));
        };

        slot.state = ProcessState::Stopping;
        let result = match slot.child.as_mut() {
            Some(child) => stop_child(name, child, pid, grace).await,
            None => stop_foreign(name, pid, grace).await,
        };

        if let Err(e) = result {
            // Whatever happened, re-derive the state from the OS next time
            slot.state = ProcessState::Running;
            return Err(ProcessError::StopFailed {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }

        slot.child = None;
        slot.state = ProcessState::Stopped;
        self.record_pid(name, None).await?;
        tracing::info!("Stopped tool server '{}' (pid {})", name, pid);
        Ok(())
    }

    /// Stop (if running) and start again
    pub async fn restart(&self, name: &str) -> Result<u32, ProcessError> {
        match self.stop(name).await {
            Ok(()) | Err(ProcessError::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }
        self.start(name).await
    }

    /// Current status, re-validated against the OS
    pub async fn status(&self, name: &str) -> Result<ToolServerStatus, ProcessError> {
        let slot = self.slot(name);
        let mut slot = slot.lock().await;
        let entry = self.entry(name).await?;

        let pid = self.refresh(name, &mut slot, &entry).await;
        Ok(ToolServerStatus {
            name: name.to_string(),
            state: slot.state,
            enabled: entry.enabled,
            port: entry.port,
            process_id: pid,
            description: entry.description,
            capabilities: entry.capabilities,
        })
    }

    /// Status of every configured tool server
    pub async fn status_all(&self) -> Result<Vec<ToolServerStatus>, ConfigError> {
        let names: Vec<String> = self.entries().await?.into_keys().collect();

        let mut statuses = Vec::with_capacity(names.len());
        for name in names {
            match self.status(&name).await {
                Ok(status) => statuses.push(status),
                // Removed from the config since we listed it
                Err(ProcessError::NotConfigured(_)) => {}
                Err(e) => tracing::warn!("Failed to check tool server '{}': {}", name, e),
            }
        }
        Ok(statuses)
    }

    /// Include an entry in batch operations
    pub fn enable(&self, name: &str) -> Result<(), ProcessError> {
        self.set_enabled(name, true)
    }

    /// Exclude an entry from batch operations
    pub fn disable(&self, name: &str) -> Result<(), ProcessError> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), ProcessError> {
        let found = self
            .config
            .set_tool_server_enabled(name, enabled)
            .map_err(|e| config_error(name, e))?;
        if !found {
            return Err(ProcessError::NotConfigured(name.to_string()));
        }
        tracing::info!(
            "{} tool server '{}'",
            if enabled { "Enabled" } else { "Disabled" },
            name
        );
        Ok(())
    }

    /// Start every enabled entry
    pub async fn start_all(&self) -> Result<BatchReport, ConfigError> {
        let entries = self.entries().await?;
        let mut report = BatchReport::default();

        for (name, entry) in entries {
            let outcome = if !entry.enabled {
                Ok(ProcessOutcome::Skipped)
            } else {
                match self.start(&name).await {
                    Ok(pid) => Ok(ProcessOutcome::Started { pid }),
                    Err(ProcessError::AlreadyRunning { pid, .. }) => {
                        Ok(ProcessOutcome::AlreadyRunning { pid })
                    }
                    Err(e) => {
                        tracing::warn!("{}", e);
                        Err(e)
                    }
                }
            };
            report.outcomes.insert(name, outcome);
        }

        Ok(report)
    }

    /// Stop every enabled entry
    pub async fn stop_all(&self) -> Result<BatchReport, ConfigError> {
        let entries = self.entries().await?;
        let mut report = BatchReport::default();

        for (name, entry) in entries {
            let outcome = if !entry.enabled {
                Ok(ProcessOutcome::Skipped)
            } else {
                match self.stop(&name).await {
                    Ok(()) => Ok(ProcessOutcome::Stopped),
                    Err(ProcessError::NotRunning(_)) => Ok(ProcessOutcome::NotRunning),
                    Err(e) => {
                        tracing::warn!("{}", e);
                        Err(e)
                    }
                }
            };
            report.outcomes.insert(name, outcome);
        }

        Ok(report)
    }

    /// Stop every child spawned by this supervisor
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();

        for name in names {
            let owns_child = {
                let slot = self.slot(&name);
                let slot = slot.lock().await;
                slot.child.is_some()
            };
            if !owns_child {
                continue;
            }

            match self.stop(&name).await {
                Ok(()) | Err(ProcessError::NotRunning(_)) => {}
                Err(ProcessError::NotConfigured(_)) => self.kill_orphan(&name).await,
                Err(e) => tracing::warn!("Failed to stop '{}' during shutdown: {}", name, e),
            }
        }
    }

    /// Kill a child whose config entry disappeared while it was running
    async fn kill_orphan(&self, name: &str) {
        let slot = self.slot(name);
        let mut slot = slot.lock().await;
        if let Some(mut child) = slot.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill orphaned tool server '{}': {}", name, e);
            }
        }
        slot.state = ProcessState::Stopped;
    }

    /// Re-validate the slot against the OS and return the live pid, if any
    ///
    /// A dead process that was last known to be running moves the slot to
    /// `Crashed`; the recorded pid is cleared either way.
    async fn refresh(&self, name: &str, slot: &mut Slot, entry: &ToolServerEntry) -> Option<u32> {
        if let Some(child) = slot.child.as_mut() {
            let child_pid = child.id();
            match child.try_wait() {
                Ok(None) => {
                    if child_pid.is_some() {
                        return child_pid;
                    }
                }
                Ok(Some(status)) => {
                    tracing::info!("Tool server '{}' exited: {}", name, status);
                }
                Err(e) => {
                    tracing::warn!("Failed to poll tool server '{}': {}", name, e);
                }
            }
            slot.child = None;

            // Another process stopping it clears the recorded pid first
            if child_pid.is_some() && entry.process_id == child_pid {
                slot.state = ProcessState::Crashed;
                if let Err(e) = self.record_pid(name, None).await {
                    tracing::warn!("{}", e);
                }
            } else {
                slot.state = ProcessState::Stopped;
            }
            return None;
        }

        match entry.process_id {
            Some(pid) if is_process_alive(pid) => {
                if slot.state != ProcessState::Stopping {
                    slot.state = ProcessState::Running;
                }
                slot.last_pid = Some(pid);
                Some(pid)
            }
            Some(pid) => {
                tracing::info!(
                    "Recorded pid {} for tool server '{}' is gone; clearing it",
                    pid,
                    name
                );
                // A pid we never saw is only known from the record, which
                // says it was running
                let was_running = slot.last_pid != Some(pid)
                    || matches!(slot.state, ProcessState::Running | ProcessState::Starting);
                slot.state = if was_running {
                    ProcessState::Crashed
                } else {
                    ProcessState::Stopped
                };
                if let Err(e) = self.record_pid(name, None).await {
                    tracing::warn!("{}", e);
                }
                None
            }
            None => {
                if slot.state != ProcessState::Crashed {
                    slot.state = ProcessState::Stopped;
                }
                None
            }
        }
    }

    fn spawn(
        &self,
        name: &str,
        entry: &ToolServerEntry,
        settings: &ServerSettings,
    ) -> Result<Child, ProcessError> {
        let spawn_failed = |reason: String| ProcessError::SpawnFailed {
            name: name.to_string(),
            reason,
        };

        let root = settings
            .tool_root
            .clone()
            .unwrap_or_else(|| self.config.dir().to_path_buf());
        let script = entry.resolve_script(&root);
        if !script.is_file() {
            return Err(spawn_failed(format!("script not found: {}", script.display())));
        }

        let mut cmd = match &entry.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&script);
                cmd
            }
            None => Command::new(&script),
        };
        cmd.args(&entry.args).stdin(Stdio::null());
        if root.is_dir() {
            cmd.current_dir(&root);
        }

        match &self.output {
            OutputMode::Log => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            OutputMode::File(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| spawn_failed(e.to_string()))?;
                let log = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(dir.join(format!("{}.log", name)))
                    .map_err(|e| spawn_failed(e.to_string()))?;
                let err_log = log.try_clone().map_err(|e| spawn_failed(e.to_string()))?;
                cmd.stdout(log).stderr(err_log);
                // Keep the child out of our terminal's process group
                #[cfg(unix)]
                cmd.process_group(0);
            }
        }

        tracing::debug!("Spawning tool server '{}': {:?}", name, cmd);
        let mut child = cmd.spawn().map_err(|e| spawn_failed(e.to_string()))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain_output(name.to_string(), stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_output(name.to_string(), stderr, true));
        }

        Ok(child)
    }
}

async fn drain_output<R>(name: String, stream: R, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            tracing::warn!("[tool:{}] {}", name, line);
        } else {
            tracing::info!("[tool:{}] {}", name, line);
        }
    }
}

async fn stop_child(
    name: &str,
    child: &mut Child,
    pid: u32,
    grace: Duration,
) -> std::io::Result<()> {
    if let Err(e) = terminate_process(pid) {
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        return Err(e);
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            tracing::debug!("Tool server '{}' exited with {}", name, status?);
            Ok(())
        }
        Err(_) => {
            tracing::warn!("Force killing tool server '{}' (pid {})", name, pid);
            child.kill().await
        }
    }
}

async fn stop_foreign(name: &str, pid: u32, grace: Duration) -> std::io::Result<()> {
    if let Err(e) = terminate_process(pid) {
        if !is_process_alive(pid) {
            return Ok(());
        }
        return Err(e);
    }

    if wait_for_exit(pid, grace).await {
        return Ok(());
    }

    tracing::warn!("Force killing tool server '{}' (pid {})", name, pid);
    if let Err(e) = kill_process(pid) {
        if is_process_alive(pid) {
            return Err(e);
        }
    }

    if !wait_for_exit(pid, KILL_WAIT).await {
        // An unreaped child of another process still answers kill(pid, 0)
        tracing::debug!("pid {} still visible after SIGKILL", pid);
    }
    Ok(())
}

async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}

fn config_error(name: &str, e: ConfigError) -> ProcessError {
    ProcessError::Config {
        name: name.to_string(),
        reason: e.to_string(),
    }
}
