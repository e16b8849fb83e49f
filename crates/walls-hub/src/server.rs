//! Per-application command listeners
//!
//! Each registered application gets its own TCP listener on 127.0.0.1.
//! A connection carries exactly one request and one response. The built-in
//! `ping` and `help` commands are answered here; everything else goes to
//! the application's handler on the blocking pool.

use std::any::Any;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use walls_core::error::{PortError, RegistryError, WallsError};
use walls_core::ports::validate_app_name;
use walls_protocol::{CommandInfo, CommandRequest, CommandResponse, JsonLineCodec, ProtocolError};

use crate::handler::CommandHandler;
use crate::state::HubState;

/// How many freshly allocated ports to try before giving up on binding
const MAX_BIND_ATTEMPTS: usize = 5;

/// Public view of a registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppInfo {
    pub name: String,
    pub port: u16,
    pub description: String,
}

/// Everything a connection task needs to answer a request
struct AppContext {
    name: String,
    handler: Arc<dyn CommandHandler>,
    read_timeout: Duration,
}

struct Registration {
    port: u16,
    description: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Registry of applications and their listeners
pub struct CommandServer {
    state: Arc<HubState>,
    apps: DashMap<String, Registration>,
    /// Serializes registration so the limit check and allocation are atomic
    registering: Mutex<()>,
    started: watch::Sender<bool>,
    shutdown_token: CancellationToken,
}

impl CommandServer {
    /// Create a server with no registrations
    pub fn new(state: Arc<HubState>) -> Self {
        let (started, _) = watch::channel(false);
        Self {
            state,
            apps: DashMap::new(),
            registering: Mutex::new(()),
            started,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Shared hub state
    pub fn state(&self) -> &Arc<HubState> {
        &self.state
    }

    /// Register an application and bind its listener
    ///
    /// A reservation made with [`PortAllocator::reserve`] is honoured;
    /// otherwise a port is allocated dynamically. The assigned port is
    /// recorded in the config document so clients can find it.
    ///
    /// [`PortAllocator::reserve`]: walls_core::PortAllocator::reserve
    pub async fn register_app<H>(
        &self,
        name: &str,
        handler: H,
        description: &str,
    ) -> Result<u16, WallsError>
    where
        H: CommandHandler,
    {
        validate_app_name(name)?;
        let _registering = self.registering.lock().await;

        if self.apps.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()).into());
        }

        let settings = self
            .blocking(|state| state.config.load().map(|c| c.server))
            .await??;
        if self.apps.len() >= settings.max_apps {
            return Err(RegistryError::LimitReached(settings.max_apps).into());
        }

        let (port, listener) = self.bind_port(name).await?;

        let recorded = {
            let (app, description) = (name.to_string(), description.to_string());
            self.blocking(move |state| state.config.record_app(&app, port, &description))
                .await?
        };
        if let Err(e) = recorded {
            drop(listener);
            self.release_token(name);
            return Err(e.into());
        }

        let app = Arc::new(AppContext {
            name: name.to_string(),
            handler: Arc::new(handler),
            read_timeout: settings.timeout,
        });
        let cancel = self.shutdown_token.child_token();
        let task = tokio::spawn(accept_loop(
            app,
            listener,
            self.started.subscribe(),
            cancel.clone(),
        ));

        self.apps.insert(
            name.to_string(),
            Registration {
                port,
                description: description.to_string(),
                cancel,
                task,
            },
        );

        tracing::info!("Registered '{}' on port {}", name, port);
        Ok(port)
    }

    /// Start accepting connections for every registered app
    ///
    /// Apps registered afterwards start accepting immediately.
    pub fn start(&self) {
        self.started.send_replace(true);
        tracing::info!("Command server started with {} apps", self.apps.len());
    }

    /// Stop an app's listener and drop its reservation
    pub async fn unregister_app(&self, name: &str) -> Result<(), WallsError> {
        let (_, registration) = self
            .apps
            .remove(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;

        registration.cancel.cancel();
        if let Err(e) = registration.task.await {
            tracing::warn!("Acceptor for '{}' ended abnormally: {}", name, e);
        }
        self.release_token(name);

        tracing::info!("Unregistered '{}' (port {})", name, registration.port);
        Ok(())
    }

    /// Current registrations, sorted by name
    pub fn apps(&self) -> Vec<AppInfo> {
        let mut apps: Vec<_> = self
            .apps
            .iter()
            .map(|entry| AppInfo {
                name: entry.key().clone(),
                port: entry.port,
                description: entry.description.clone(),
            })
            .collect();
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        apps
    }

    /// Port of a registered app
    pub fn port_of(&self, name: &str) -> Option<u16> {
        self.apps.get(name).map(|r| r.port)
    }

    /// Stop every listener and release every reservation
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();

        let names: Vec<String> = self.apps.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, registration)) = self.apps.remove(&name) {
                if let Err(e) = registration.task.await {
                    tracing::warn!("Acceptor for '{}' ended abnormally: {}", name, e);
                }
                self.release_token(&name);
            }
        }

        tracing::info!("Command server shut down");
    }

    /// Bind the reserved port if there is one, else allocate dynamically
    async fn bind_port(&self, name: &str) -> Result<(u16, TcpListener), WallsError> {
        let app = name.to_string();
        let reserved = match self.blocking(move |state| state.ports.lookup(&app)).await? {
            Ok(reserved) => reserved,
            Err(e) => {
                tracing::warn!("Ignoring reservation for '{}': {}", name, e);
                None
            }
        };

        if let Some(port) = reserved {
            match bind_loopback(port).await {
                Ok(listener) => {
                    tracing::debug!("Using reserved port {} for '{}'", port, name);
                    return Ok((port, listener));
                }
                Err(e) => {
                    tracing::warn!(
                        "Reserved port {} for '{}' is unavailable ({}), allocating another",
                        port,
                        name,
                        e
                    );
                }
            }
        }

        let mut last_conflict = 0;
        for _ in 0..MAX_BIND_ATTEMPTS {
            let app = name.to_string();
            let port = self
                .blocking(move |state| state.ports.allocate_dynamic(&app))
                .await??;

            match bind_loopback(port).await {
                Ok(listener) => return Ok((port, listener)),
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    tracing::debug!("Port {} was taken before '{}' could bind it", port, name);
                    last_conflict = port;
                }
                Err(e) => {
                    self.release_token(name);
                    return Err(e.into());
                }
            }
        }

        self.release_token(name);
        Err(PortError::Conflict(last_conflict).into())
    }

    /// Run file-backed state operations on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> std::io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&HubState) -> T + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || f(&state))
            .await
            .map_err(std::io::Error::other)
    }

    fn release_token(&self, name: &str) {
        if let Err(e) = self.state.ports.release(name) {
            tracing::warn!("Failed to release reservation for '{}': {}", name, e);
        }
    }
}

async fn bind_loopback(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await
}

async fn accept_loop(
    app: Arc<AppContext>,
    listener: TcpListener,
    mut started: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        result = started.wait_for(|started| *started) => {
            if result.is_err() {
                return;
            }
        }
    }

    tracing::debug!("'{}' accepting connections", app.name);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("'{}' listener shutting down", app.name);
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        if !peer_addr.ip().is_loopback() {
                            tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                            continue;
                        }

                        let app = Arc::clone(&app);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&app, stream).await {
                                tracing::debug!("Connection to '{}' from {} failed: {}", app.name, peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection for '{}': {}", app.name, e);
                    }
                }
            }
        }
    }
}

async fn handle_connection(app: &Arc<AppContext>, stream: TcpStream) -> Result<(), ProtocolError> {
    let mut framed = Framed::new(stream, JsonLineCodec::<CommandRequest>::new());

    let response = match tokio::time::timeout(app.read_timeout, framed.next()).await {
        Err(_) => {
            tracing::debug!("Timed out waiting for a request to '{}'", app.name);
            return Ok(());
        }
        Ok(None) => {
            tracing::debug!("Client closed before sending a request to '{}'", app.name);
            return Ok(());
        }
        Ok(Some(Err(e))) if e.is_malformed() => {
            tracing::warn!("Malformed request to '{}': {}", app.name, e);
            CommandResponse::malformed()
        }
        Ok(Some(Err(e))) => return Err(e),
        Ok(Some(Ok(request))) => dispatch(app, request).await,
    };

    framed.send(&response).await
}

async fn dispatch(app: &Arc<AppContext>, request: CommandRequest) -> CommandResponse {
    tracing::debug!("'{}' <- {}", app.name, request.command);

    match request.command.as_str() {
        "" => CommandResponse::error("no command specified"),
        "ping" => CommandResponse::ok("pong"),
        "help" => {
            let mut commands = app.handler.commands();
            commands.push(CommandInfo::new("ping", "Check that the app is responsive"));
            commands.push(CommandInfo::new("help", "List available commands"));
            match serde_json::to_value(commands) {
                Ok(data) => CommandResponse::with_data(data),
                Err(e) => CommandResponse::error(e.to_string()),
            }
        }
        _ => {
            let handler = Arc::clone(&app.handler);
            let command = request.command.clone();
            let result =
                tokio::task::spawn_blocking(move || handler.handle(&request.command, &request.args))
                    .await;

            match result {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    tracing::debug!("'{}' command '{}' failed: {}", app.name, command, e);
                    CommandResponse::error(e.to_string())
                }
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic());
                    tracing::error!("'{}' handler panicked on '{}': {}", app.name, command, message);
                    CommandResponse::error(message)
                }
                Err(e) => {
                    tracing::error!("'{}' handler for '{}' was cancelled: {}", app.name, command, e);
                    CommandResponse::error(format!("command '{}' was cancelled", command))
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "command handler panicked".to_string()
    }
}
