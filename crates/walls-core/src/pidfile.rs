//! PID file for the hub daemon
//!
//! `walls serve` writes its pid to `<state_dir>/hub.pid` so a second daemon
//! refuses to start and `walls status` can report whether one is running.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::fsutil::write_atomic;
use crate::process::is_process_alive;

/// Default PID file name
const PID_FILE_NAME: &str = "hub.pid";

/// PID file path inside a given state directory
pub fn pid_path_in(state_dir: &Path) -> PathBuf {
    state_dir.join(PID_FILE_NAME)
}

/// Read the PID from the PID file
///
/// Returns `Ok(None)` if the file doesn't exist, or an error if the file
/// is malformed.
pub fn read_pid_file(path: &Path) -> io::Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(contents) => contents
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write a PID to the PID file, creating parent directories as needed
pub fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    write_atomic(path, format!("{}\n", pid).as_bytes())
}

/// Remove the PID file
///
/// Returns `Ok(())` even if the file doesn't exist.
pub fn remove_pid_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Pid of a live daemon recorded at `path`
///
/// A stale or unreadable file is removed and reported as no daemon.
pub fn running_pid(path: &Path) -> Option<u32> {
    match read_pid_file(path) {
        Ok(Some(pid)) if is_process_alive(pid) => Some(pid),
        Ok(None) => None,
        Ok(Some(pid)) => {
            tracing::debug!("Removing stale PID file {:?} (pid {})", path, pid);
            let _ = remove_pid_file(path);
            None
        }
        Err(e) => {
            tracing::warn!("Ignoring unreadable PID file {:?}: {}", path, e);
            let _ = remove_pid_file(path);
            None
        }
    }
}

/// Guard that removes the PID file when dropped
pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    /// Create a new guard and write the PID file
    pub fn new(path: PathBuf, pid: u32) -> io::Result<Self> {
        write_pid_file(&path, pid)?;
        Ok(Self { path })
    }

    /// Path of the guarded file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if let Err(e) = remove_pid_file(&self.path) {
            tracing::warn!("Failed to remove PID file {:?}: {}", self.path, e);
        }
    }
}
