//! Port allocation and cross-process reservations
//!
//! Every claimed port is recorded as a token file `<state_dir>/<app>_port`
//! holding the decimal port number. Tokens are written before an
//! application starts (preallocated flow) or when it allocates a port on
//! its own (dynamic flow), and are read by clients that cannot reach the
//! config document. Allocation is serialized by an in-process mutex plus
//! an advisory lock on `<state_dir>/.reservations.lock`, so two callers
//! can never claim the same port.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::config::ServerSettings;
use crate::error::PortError;
use crate::fsutil::{write_atomic, FileLock};

/// Suffix of reservation token files
const TOKEN_SUFFIX: &str = "_port";

/// Name of the lock file guarding the reservation directory
const LOCK_FILE_NAME: &str = ".reservations.lock";

/// Allocates ports for applications and records the claims on disk
#[derive(Debug)]
pub struct PortAllocator {
    dir: PathBuf,
    base_port: u16,
    range: u16,
    local: Mutex<()>,
}

/// Holds both the in-process and cross-process allocation locks
struct AllocationGuard<'a> {
    _local: MutexGuard<'a, ()>,
    _file: FileLock,
}

impl PortAllocator {
    /// Create an allocator handing out ports in `base_port..base_port + range`
    pub fn new(dir: impl Into<PathBuf>, base_port: u16, range: u16) -> Self {
        Self {
            dir: dir.into(),
            base_port,
            range: range.max(1),
            local: Mutex::new(()),
        }
    }

    /// Create an allocator from the `server` section of the config
    pub fn from_settings(dir: impl Into<PathBuf>, settings: &ServerSettings) -> Self {
        Self::new(dir, settings.base_port, settings.port_range)
    }

    /// One past the last port of the range
    fn end_port(&self) -> u32 {
        (u32::from(self.base_port) + u32::from(self.range)).min(u32::from(u16::MAX) + 1)
    }

    fn ports(&self) -> impl Iterator<Item = u16> {
        // end_port() never exceeds u16::MAX + 1, so every yielded value fits
        (u32::from(self.base_port)..self.end_port()).filter_map(|p| u16::try_from(p).ok())
    }

    fn token_path(&self, app: &str) -> PathBuf {
        self.dir.join(format!("{}{}", app, TOKEN_SUFFIX))
    }

    fn lock(&self) -> Result<AllocationGuard<'_>, PortError> {
        let local = self
            .local
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let file = FileLock::exclusive(&self.dir.join(LOCK_FILE_NAME))?;
        Ok(AllocationGuard {
            _local: local,
            _file: file,
        })
    }

    /// Reserve a port for `app` ahead of its startup
    ///
    /// Idempotent: an existing reservation for `app` is returned unchanged.
    /// Otherwise the lowest port in range that is neither reserved by
    /// another app nor bound by another socket is claimed.
    pub fn reserve(&self, app: &str) -> Result<u16, PortError> {
        validate_app_name(app)?;
        let _guard = self.lock()?;

        if let Some(port) = self.read_token(app)? {
            tracing::debug!("Reusing reservation of port {} for '{}'", port, app);
            return Ok(port);
        }

        let taken = self.taken_ports(Some(app))?;
        for port in self.ports() {
            if taken.contains(&port) || !is_port_free(port) {
                continue;
            }
            self.write_token(app, port)?;
            tracing::info!("Reserved port {} for '{}'", port, app);
            return Ok(port);
        }

        Err(PortError::Exhausted {
            base: self.base_port,
            end: self.end_port(),
        })
    }

    /// Claim the first bindable port at or above the base port for `app`
    ///
    /// Any previous token for `app` is replaced. Each port found in use
    /// counts as a conflict; the scan gives up after the whole range has
    /// been tried.
    pub fn allocate_dynamic(&self, app: &str) -> Result<u16, PortError> {
        validate_app_name(app)?;
        let _guard = self.lock()?;

        let taken = self.taken_ports(Some(app))?;
        let mut conflicts = 0u32;

        for port in self.ports() {
            if taken.contains(&port) {
                continue;
            }
            if !is_port_free(port) {
                conflicts += 1;
                tracing::debug!("{}", PortError::Conflict(port));
                continue;
            }
            self.write_token(app, port)?;
            tracing::info!(
                "Allocated port {} for '{}' after {} conflicts",
                port,
                app,
                conflicts
            );
            return Ok(port);
        }

        Err(PortError::Exhausted {
            base: self.base_port,
            end: self.end_port(),
        })
    }

    /// Drop the claim held by `app`; missing tokens are not an error
    pub fn release(&self, app: &str) -> Result<(), PortError> {
        validate_app_name(app)?;
        match fs::remove_file(self.token_path(app)) {
            Ok(()) => {
                tracing::debug!("Released port reservation for '{}'", app);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Port currently claimed by `app`, without claiming anything
    pub fn lookup(&self, app: &str) -> Result<Option<u16>, PortError> {
        validate_app_name(app)?;
        self.read_token(app)
    }

    /// All current claims by app name
    ///
    /// Unreadable tokens are skipped with a warning.
    pub fn reservations(&self) -> Result<BTreeMap<String, u16>, PortError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reservations = BTreeMap::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(app) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(TOKEN_SUFFIX))
            else {
                continue;
            };
            if validate_app_name(app).is_err() {
                continue;
            }

            match self.read_token(app) {
                Ok(Some(port)) => {
                    reservations.insert(app.to_string(), port);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping reservation token for '{}': {}", app, e),
            }
        }

        Ok(reservations)
    }

    fn taken_ports(&self, except: Option<&str>) -> Result<BTreeSet<u16>, PortError> {
        Ok(self
            .reservations()?
            .into_iter()
            .filter(|(app, _)| Some(app.as_str()) != except)
            .map(|(_, port)| port)
            .collect())
    }

    fn read_token(&self, app: &str) -> Result<Option<u16>, PortError> {
        let content = match fs::read_to_string(self.token_path(app)) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        content
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|e| PortError::InvalidToken {
                app: app.to_string(),
                reason: e.to_string(),
            })
    }

    fn write_token(&self, app: &str, port: u16) -> Result<(), PortError> {
        write_atomic(&self.token_path(app), port.to_string().as_bytes())?;
        Ok(())
    }
}

/// Check whether `port` can be bound on the loopback interface right now
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// App names double as token file names, so they are restricted to a
/// filesystem-safe alphabet.
pub fn validate_app_name(app: &str) -> Result<(), PortError> {
    let valid = !app.is_empty()
        && app.len() <= 64
        && !app.starts_with('.')
        && app
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(PortError::InvalidAppName(app.to_string()))
    }
}
