//! End-to-end system tests
//!
//! These tests run the actual `walls serve` daemon and drive it through the
//! CLI and raw TCP, the way applications and scripts do.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

/// Base port for test daemons - each test gets its own range
static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

fn next_base_port() -> u16 {
    44700 + PORT_COUNTER.fetch_add(1, Ordering::SeqCst) * 20
}

struct TestConfig {
    dir: tempfile::TempDir,
    path: PathBuf,
}

impl TestConfig {
    fn new(mcp_servers: Value) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");

        let config = json!({
            "server": {
                "base_port": next_base_port(),
                "port_range": 20,
                "stop_grace": 0.5
            },
            "mcp_servers": mcp_servers
        });
        std::fs::write(&path, serde_json::to_vec_pretty(&config).unwrap())
            .expect("Failed to write config");

        Self { dir, path }
    }

    fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    fn read(&self) -> Value {
        serde_json::from_slice(&std::fs::read(&self.path).unwrap()).unwrap()
    }

    fn walls(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_walls"));
        cmd.env("WALLS_CONFIG", &self.path)
            .env("WALLS_STATE_DIR", self.state_dir())
            .env_remove("RUST_LOG");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.walls().args(args).output().expect("Failed to run walls")
    }
}

struct TestHub {
    process: Child,
    port: u16,
    config: TestConfig,
}

impl TestHub {
    fn start(config: TestConfig) -> Self {
        let process = config
            .walls()
            .arg("serve")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to start hub");

        let port = wait_for_hub(&config, Duration::from_secs(10)).expect("Hub did not come up");
        Self {
            process,
            port,
            config,
        }
    }

    /// Run `walls stop` while reaping the daemon so it can observe the exit
    fn stop(mut self) -> (Output, TestConfig) {
        let stopper = self
            .config
            .walls()
            .arg("stop")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("Failed to run walls stop");
        let status = self.process.wait().expect("Failed to wait for hub");
        assert!(status.success(), "hub exited with {}", status);
        let output = stopper.wait_with_output().expect("Failed to wait for stop");

        // TestHub implements Drop, so the config has to be swapped out
        let config = std::mem::replace(&mut self.config, TestConfig::new(json!({})));
        (output, config)
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

/// Wait until the hub recorded its port and accepts connections
fn wait_for_hub(config: &TestConfig, timeout: Duration) -> Option<u16> {
    let pid_file = config.state_dir().join("hub.pid");
    let start = Instant::now();
    while start.elapsed() < timeout {
        let port = config.read()["apps"]["hub"]["port"].as_u64();
        if let (true, Some(port)) = (pid_file.exists(), port) {
            let port = port as u16;
            if TcpStream::connect(("127.0.0.1", port)).is_ok() {
                return Some(port);
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    None
}

/// Send one raw request line and read one response line
fn raw_request(port: u16, request: &str) -> std::io::Result<Value> {
    let mut stream = TcpStream::connect(("127.0.0.1", port))?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    writeln!(stream, "{}", request)?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response = String::new();
    reader.read_line(&mut response)?;
    Ok(serde_json::from_str(&response)?)
}

#[cfg(unix)]
fn sleeper_servers(dir: &Path) -> Value {
    std::fs::write(dir.join("sleeper.sh"), "exec sleep 30\n").unwrap();
    json!({
        "rag": {
            "enabled": true,
            "script_path": dir.join("sleeper.sh"),
            "interpreter": "/bin/sh"
        }
    })
}

#[test]
fn test_e2e_hub_answers_ping_and_help() {
    let hub = TestHub::start(TestConfig::new(json!({})));

    let response = raw_request(hub.port, r#"{"command":"ping"}"#).unwrap();
    assert_eq!(response["status"], json!("success"));
    assert_eq!(response["message"], json!("pong"));

    let response = raw_request(hub.port, r#"{"cmd":"help"}"#).unwrap();
    let names: Vec<&str> = response["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert!(names.contains(&"apps"));
    assert!(names.contains(&"mcp_status"));

    let response = raw_request(hub.port, "definitely not json").unwrap();
    assert_eq!(response["status"], json!("error"));
}

#[test]
fn test_e2e_cli_send_and_status() {
    let hub = TestHub::start(TestConfig::new(json!({})));

    let output = hub.config.run(&["send", "hub", "apps"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(String::from_utf8_lossy(&output.stdout).contains(&hub.port.to_string()));

    let output = hub.config.run(&["send", "hub", "bogus"]);
    assert!(!output.status.success());

    let output = hub.config.run(&["status"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("hub"));
    assert!(String::from_utf8_lossy(&output.stdout).contains("RUNNING"));

    let output = hub.config.run(&["commands", "hub"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("mcp_restart"));
}

#[test]
fn test_e2e_second_daemon_refuses_to_start() {
    let hub = TestHub::start(TestConfig::new(json!({})));

    let output = hub.config.run(&["serve"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("already running"));
}

#[test]
fn test_e2e_stop_cleans_up() {
    let hub = TestHub::start(TestConfig::new(json!({})));
    let port = hub.port;

    let (output, config) = hub.stop();
    assert!(output.status.success(), "{:?}", output);

    assert!(!config.state_dir().join("hub.pid").exists());
    assert!(!config.state_dir().join("hub_port").exists());
    // The assignment stays in the document for clients to find next time
    assert_eq!(config.read()["apps"]["hub"]["port"], json!(port));
}

#[cfg(unix)]
#[test]
fn test_e2e_daemon_supervises_tool_servers() {
    let config = TestConfig::new(json!({}));
    let servers = sleeper_servers(config.dir.path());
    let mut doc = config.read();
    doc["mcp_servers"] = servers;
    std::fs::write(&config.path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();

    let hub = TestHub::start(config);

    let response = raw_request(hub.port, r#"{"command":"mcp_start","args":{"name":"rag"}}"#)
        .unwrap();
    assert_eq!(response["status"], json!("success"), "{}", response);
    let pid = response["data"]["pid"].as_u64().unwrap();
    assert_eq!(hub.config.read()["mcp_servers"]["rag"]["process_id"], json!(pid));

    let response =
        raw_request(hub.port, r#"{"command":"mcp_status","args":{"name":"rag"}}"#).unwrap();
    assert_eq!(response["data"]["state"], json!("running"));

    // Shutting the daemon down stops the children it spawned
    let (output, config) = hub.stop();
    assert!(output.status.success(), "{:?}", output);
    assert!(config.read()["mcp_servers"]["rag"]["process_id"].is_null());
}
