//! Command server integration tests
//!
//! Registers real handlers and talks to them over TCP with raw JSON lines.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use walls_core::error::{CommandError, RegistryError, WallsError};
use walls_core::ConfigStore;
use walls_hub::{CommandRouter, CommandServer, HubState};
use walls_protocol::CommandResponse;

/// Each test gets its own block of ports
static RANGE_COUNTER: AtomicU16 = AtomicU16::new(0);

const RANGE_LEN: u16 = 20;

fn next_base_port() -> u16 {
    42000 + RANGE_COUNTER.fetch_add(1, Ordering::SeqCst) * RANGE_LEN
}

fn create_test_state(dir: &Path, max_apps: usize, read_timeout: Duration) -> Arc<HubState> {
    let config_path = dir.join("config.json");
    let store = ConfigStore::open(&config_path).unwrap();
    store
        .update(|c| {
            c.server.base_port = next_base_port();
            c.server.port_range = RANGE_LEN;
            c.server.max_apps = max_apps;
            c.server.timeout = read_timeout;
        })
        .unwrap();

    HubState::initialize(&config_path, &dir.join("state")).unwrap()
}

fn create_test_server(dir: &TempDir) -> CommandServer {
    CommandServer::new(create_test_state(dir.path(), 10, Duration::from_secs(5)))
}

fn demo_router() -> CommandRouter {
    CommandRouter::new()
        .route("echo", "Return the arguments", |args| {
            Ok(CommandResponse::with_data(Value::Object(args.clone())))
        })
        .route("slow", "Sleep for 200 ms", |_| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(CommandResponse::ok("done"))
        })
        .route("fail", "Always fails", |_| {
            Err(CommandError::handler("speaker unplugged"))
        })
        .route("panic", "Panics", |_| panic!("handler exploded"))
}

/// Send one raw line and return the raw response line as JSON
async fn send_raw(port: u16, line: &str) -> Value {
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (reader, mut writer) = stream.into_split();

    writer.write_all(line.as_bytes()).await.unwrap();
    writer.write_all(b"\n").await.unwrap();
    writer.flush().await.unwrap();

    let mut reader = BufReader::new(reader);
    let mut response = String::new();
    timeout(Duration::from_secs(5), reader.read_line(&mut response))
        .await
        .expect("timed out waiting for response")
        .unwrap();

    assert!(!response.is_empty(), "server closed without a response");
    serde_json::from_str(&response).unwrap()
}

async fn send(port: u16, request: Value) -> Value {
    send_raw(port, &request.to_string()).await
}

#[tokio::test]
async fn test_ping_after_register() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);

    let port = server
        .register_app("radio_player", demo_router(), "Radio Player")
        .await
        .unwrap();
    server.start();

    let response = send(port, json!({"command": "ping"})).await;
    assert_eq!(response, json!({"status": "success", "message": "pong"}));

    server.shutdown().await;
}

#[tokio::test]
async fn test_echo_returns_args_as_data() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    let port = server.register_app("demo", demo_router(), "").await.unwrap();
    server.start();

    let response = send(port, json!({"command": "echo", "args": {"x": 1}})).await;
    assert_eq!(response, json!({"status": "success", "data": {"x": 1}}));

    server.shutdown().await;
}

#[tokio::test]
async fn test_legacy_field_names() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    let port = server.register_app("words", demo_router(), "").await.unwrap();
    server.start();

    let response = send(port, json!({"cmd": "echo", "data": {"word": "hello"}})).await;
    assert_eq!(response["data"], json!({"word": "hello"}));

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_command() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    let port = server.register_app("demo", demo_router(), "").await.unwrap();
    server.start();

    let response = send(port, json!({"command": "rewind"})).await;
    assert_eq!(
        response,
        json!({"status": "error", "message": "unknown command: rewind"})
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_then_valid_request() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    let port = server.register_app("demo", demo_router(), "").await.unwrap();
    server.start();

    let response = send_raw(port, "{this is not json").await;
    assert_eq!(
        response,
        json!({"status": "error", "message": "malformed request"})
    );

    let response = send_raw(port, r#"{"args": {}}"#).await;
    assert_eq!(response["status"], "error");

    let response = send(port, json!({"command": "ping"})).await;
    assert_eq!(response["status"], "success");

    server.shutdown().await;
}

#[tokio::test]
async fn test_handler_error_and_panic_keep_listener_alive() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    let port = server.register_app("demo", demo_router(), "").await.unwrap();
    server.start();

    let response = send(port, json!({"command": "fail"})).await;
    assert_eq!(
        response,
        json!({"status": "error", "message": "speaker unplugged"})
    );

    let response = send(port, json!({"command": "panic"})).await;
    assert_eq!(
        response,
        json!({"status": "error", "message": "handler exploded"})
    );

    let response = send(port, json!({"command": "ping"})).await;
    assert_eq!(response["status"], "success");

    server.shutdown().await;
}

#[tokio::test]
async fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    let port = server.register_app("demo", demo_router(), "").await.unwrap();
    server.start();

    let response = send(port, json!({"command": "help"})).await;
    let names: BTreeSet<String> = response["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap().to_string())
        .collect();

    for expected in ["echo", "slow", "fail", "panic", "ping", "help"] {
        assert!(names.contains(expected), "missing {}", expected);
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    server.register_app("demo", demo_router(), "").await.unwrap();

    let err = server
        .register_app("demo", demo_router(), "")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WallsError::Registry(RegistryError::AlreadyRegistered(_))
    ));

    server.shutdown().await;
}

#[tokio::test]
async fn test_app_limit() {
    let dir = TempDir::new().unwrap();
    let server = CommandServer::new(create_test_state(dir.path(), 2, Duration::from_secs(5)));

    server.register_app("a", demo_router(), "").await.unwrap();
    server.register_app("b", demo_router(), "").await.unwrap();
    let err = server.register_app("c", demo_router(), "").await.unwrap_err();
    assert!(matches!(
        err,
        WallsError::Registry(RegistryError::LimitReached(2))
    ));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_yields_distinct_ports() {
    let dir = TempDir::new().unwrap();
    let server = Arc::new(create_test_server(&dir));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .register_app(&format!("app{}", i), demo_router(), "")
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut ports = BTreeSet::new();
    for handle in handles {
        ports.insert(handle.await.unwrap());
    }
    assert_eq!(ports.len(), 8);

    server.start();
    for port in &ports {
        let response = send(*port, json!({"command": "ping"})).await;
        assert_eq!(response["message"], "pong");
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_reservation_is_honoured() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);

    // Claim a couple of ports first so the reservation is not the base port
    server.state().ports.reserve("other-a").unwrap();
    server.state().ports.reserve("other-b").unwrap();
    let reserved = server.state().ports.reserve("browser").unwrap();

    let port = server
        .register_app("browser", demo_router(), "Browser")
        .await
        .unwrap();
    assert_eq!(port, reserved);

    server.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_reservation_falls_back_to_dynamic_port() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    let state_dir = server.state().state_dir().to_path_buf();
    std::fs::create_dir_all(&state_dir).unwrap();
    std::fs::write(state_dir.join("browser_port"), "not a port").unwrap();

    let port = server
        .register_app("browser", demo_router(), "Browser")
        .await
        .unwrap();

    // The broken token is replaced by the fresh claim
    assert_eq!(server.state().ports.lookup("browser").unwrap(), Some(port));
    server.start();
    let response = send(port, json!({"command": "ping"})).await;
    assert_eq!(response["status"], "success");

    server.shutdown().await;
}

#[tokio::test]
async fn test_registration_recorded_in_config() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    let port = server
        .register_app("radio_player", demo_router(), "Radio Player Application")
        .await
        .unwrap();

    let config = server.state().config.load().unwrap();
    let entry = &config.apps["radio_player"];
    assert_eq!(entry.port, Some(port));
    assert_eq!(entry.description, "Radio Player Application");
    assert!(entry.enabled);
    assert_eq!(server.state().ports.lookup("radio_player").unwrap(), Some(port));

    server.shutdown().await;
}

#[tokio::test]
async fn test_register_after_start_accepts_immediately() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    server.start();

    let port = server.register_app("late", demo_router(), "").await.unwrap();
    let response = send(port, json!({"command": "ping"})).await;
    assert_eq!(response["status"], "success");

    server.shutdown().await;
}

#[tokio::test]
async fn test_unregister_releases_port() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    let port = server.register_app("demo", demo_router(), "").await.unwrap();
    server.start();

    server.unregister_app("demo").await.unwrap();

    assert!(server.apps().is_empty());
    assert_eq!(server.state().ports.lookup("demo").unwrap(), None);
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());

    let err = server.unregister_app("demo").await.unwrap_err();
    assert!(matches!(
        err,
        WallsError::Registry(RegistryError::NotRegistered(_))
    ));
}

#[tokio::test]
async fn test_apps_listing() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    let words = server.register_app("words", demo_router(), "Words").await.unwrap();
    let browser = server.register_app("browser", demo_router(), "Browser").await.unwrap();

    let apps = server.apps();
    assert_eq!(apps.len(), 2);
    assert_eq!(apps[0].name, "browser");
    assert_eq!(apps[0].port, browser);
    assert_eq!(apps[1].name, "words");
    assert_eq!(server.port_of("words"), Some(words));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_commands_run_concurrently() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    let port = server.register_app("demo", demo_router(), "").await.unwrap();
    server.start();

    // Warm up the blocking pool
    send(port, json!({"command": "echo"})).await;

    let started = Instant::now();
    let (a, b) = tokio::join!(
        send(port, json!({"command": "slow"})),
        send(port, json!({"command": "slow"}))
    );
    let elapsed = started.elapsed();

    assert_eq!(a["message"], "done");
    assert_eq!(b["message"], "done");
    assert!(elapsed < Duration::from_millis(380), "took {:?}", elapsed);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_app_does_not_delay_other_app() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    let slow_port = server.register_app("slowpoke", demo_router(), "").await.unwrap();
    let fast_port = server.register_app("quick", demo_router(), "").await.unwrap();
    server.start();

    let slow = tokio::spawn(send(slow_port, json!({"command": "slow"})));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    let response = send(fast_port, json!({"command": "echo", "args": {"n": 2}})).await;
    assert_eq!(response["data"]["n"], 2);
    assert!(started.elapsed() < Duration::from_millis(150));

    slow.await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_idle_connection_is_closed_after_read_timeout() {
    let dir = TempDir::new().unwrap();
    let server = CommandServer::new(create_test_state(
        dir.path(),
        10,
        Duration::from_millis(200),
    ));
    let port = server.register_app("demo", demo_router(), "").await.unwrap();
    server.start();

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("server kept the idle connection open")
        .unwrap();
    assert_eq!(read, 0);

    // Listener is still healthy
    let response = send(port, json!({"command": "ping"})).await;
    assert_eq!(response["status"], "success");

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_all_reservations() {
    let dir = TempDir::new().unwrap();
    let server = create_test_server(&dir);
    server.register_app("a", demo_router(), "").await.unwrap();
    server.register_app("b", demo_router(), "").await.unwrap();
    server.start();

    server.shutdown().await;

    assert!(server.apps().is_empty());
    assert!(server.state().ports.reservations().unwrap().is_empty());
}
