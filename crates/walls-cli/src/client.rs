//! Client side of the command protocol
//!
//! Resolves an application name to a port and performs one
//! request/response exchange per connection.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use walls_core::config::{load_config, HubConfig};
use walls_core::error::{ConfigError, ConnectionError, RegistryError, WallsError};
use walls_core::PortAllocator;
use walls_protocol::{CommandArgs, CommandRequest, CommandResponse, JsonLineCodec};

/// Ports of applications that predate registration
pub const LEGACY_PORTS: &[(&str, u16)] = &[("radio_player", 9999), ("words", 8765)];

/// Budget for the connect probe in [`ClientConnector::is_app_running`]
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where a resolved port came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    Reservation,
    Config,
    Legacy,
}

impl fmt::Display for PortSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSource::Reservation => write!(f, "reservation"),
            PortSource::Config => write!(f, "config"),
            PortSource::Legacy => write!(f, "legacy"),
        }
    }
}

/// Sends commands to registered applications
#[derive(Debug, Clone)]
pub struct ClientConnector {
    config_path: PathBuf,
    state_dir: PathBuf,
}

impl ClientConnector {
    pub fn new(config_path: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            state_dir: state_dir.into(),
        }
    }

    /// Current config document; a missing file reads as the default
    pub fn config(&self) -> Result<HubConfig, ConfigError> {
        match load_config(&self.config_path) {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => Ok(HubConfig::default()),
            Err(e) => Err(e),
        }
    }

    /// Default request timeout from `server.timeout`
    pub fn default_timeout(&self) -> Duration {
        self.config()
            .map(|c| c.server.timeout)
            .unwrap_or_else(|_| Duration::from_secs(5))
    }

    /// Resolve the port for `app`
    ///
    /// A reservation token wins over the port recorded in the config, which
    /// wins over the legacy table. An app disabled in the config does not
    /// resolve at all.
    pub fn resolve_port(&self, app: &str) -> Result<(u16, PortSource), WallsError> {
        let config = self.config()?;

        if config.apps.get(app).is_some_and(|entry| !entry.enabled) {
            tracing::debug!("'{}' is disabled in the config", app);
            return Err(RegistryError::NotRegistered(app.to_string()).into());
        }

        let reservations = PortAllocator::from_settings(&self.state_dir, &config.server);
        match reservations.lookup(app) {
            Ok(Some(port)) => return Ok((port, PortSource::Reservation)),
            Ok(None) => {}
            Err(e) => tracing::warn!("Ignoring reservation for '{}': {}", app, e),
        }

        if let Some(port) = config.app_port(app) {
            return Ok((port, PortSource::Config));
        }

        LEGACY_PORTS
            .iter()
            .find(|(name, _)| *name == app)
            .map(|(_, port)| (*port, PortSource::Legacy))
            .ok_or_else(|| RegistryError::NotRegistered(app.to_string()).into())
    }

    /// Send one command and wait up to `timeout` for the response
    pub async fn send_command(
        &self,
        app: &str,
        command: &str,
        args: CommandArgs,
        timeout: Duration,
    ) -> Result<CommandResponse, WallsError> {
        let (port, source) = self.resolve_port(app)?;
        tracing::debug!("Sending '{}' to '{}' on port {} ({})", command, app, port, source);

        let request = CommandRequest::with_args(command, args);
        match tokio::time::timeout(timeout, exchange(app, port, &request)).await {
            Ok(result) => result.map_err(WallsError::from),
            Err(_) => Err(ConnectionError::Timeout {
                app: app.to_string(),
                timeout,
            }
            .into()),
        }
    }

    /// Whether something accepts connections on the app's port
    pub async fn is_app_running(&self, app: &str) -> bool {
        let Ok((port, _)) = self.resolve_port(app) else {
            return false;
        };
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((Ipv4Addr::LOCALHOST, port)))
                .await,
            Ok(Ok(_))
        )
    }
}

async fn exchange(
    app: &str,
    port: u16,
    request: &CommandRequest,
) -> Result<CommandResponse, ConnectionError> {
    let failed = |reason: String| ConnectionError::Failed {
        app: app.to_string(),
        port,
        reason,
    };

    let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))
        .await
        .map_err(|e| failed(e.to_string()))?;
    let mut framed = Framed::new(stream, JsonLineCodec::<CommandResponse>::new());

    framed
        .send(request)
        .await
        .map_err(|e| failed(e.to_string()))?;

    match framed.next().await {
        Some(Ok(response)) => Ok(response),
        Some(Err(e)) if e.is_malformed() => Err(ConnectionError::InvalidResponse {
            app: app.to_string(),
            reason: e.to_string(),
        }),
        Some(Err(e)) => Err(failed(e.to_string())),
        None => Err(ConnectionError::ClosedWithoutResponse {
            app: app.to_string(),
        }),
    }
}
