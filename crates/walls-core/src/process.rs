//! OS process helpers
//!
//! Liveness checks and signalling for processes the current process may not
//! own, such as tool servers started by an earlier hub run whose pid was
//! recorded in the config.

use std::io;

/// Check if a process with the given PID is still alive
///
/// On Unix, uses kill(pid, 0). On Windows, uses OpenProcess.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Some(pid) = to_pid_t(pid) else {
        return false;
    };

    // SAFETY: signal 0 performs the existence and permission check only
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(windows)]
pub fn is_process_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    if pid == 0 {
        return false;
    }

    // SAFETY: the handle is checked before use and closed before returning
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            return false;
        }
        CloseHandle(handle);
        true
    }
}

/// Ask a process to exit (SIGTERM)
#[cfg(unix)]
pub fn terminate_process(pid: u32) -> io::Result<()> {
    send_signal(pid, libc::SIGTERM)
}

/// Force a process to exit (SIGKILL)
#[cfg(unix)]
pub fn kill_process(pid: u32) -> io::Result<()> {
    send_signal(pid, libc::SIGKILL)
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pid = to_pid_t(pid).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {}", pid))
    })?;

    // SAFETY: kill has no memory-safety preconditions
    let result = unsafe { libc::kill(pid, signal) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Pids 0 and anything above `pid_t::MAX` would address process groups
#[cfg(unix)]
fn to_pid_t(pid: u32) -> Option<libc::pid_t> {
    match libc::pid_t::try_from(pid) {
        Ok(p) if p > 0 => Some(p),
        _ => None,
    }
}

/// Windows has no graceful equivalent of SIGTERM for arbitrary processes
#[cfg(windows)]
pub fn terminate_process(pid: u32) -> io::Result<()> {
    kill_process(pid)
}

#[cfg(windows)]
pub fn kill_process(pid: u32) -> io::Result<()> {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

    // SAFETY: the handle is checked before use and closed before returning
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        let ok = TerminateProcess(handle, 1);
        let err = io::Error::last_os_error();
        CloseHandle(handle);
        if ok == 0 {
            Err(err)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_invalid_pids_not_alive() {
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(999999999));
        assert!(!is_process_alive(u32::MAX));
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(is_process_alive(pid));

        terminate_process(pid).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(!is_process_alive(pid));
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_invalid_pid() {
        assert!(kill_process(0).is_err());
        assert!(terminate_process(u32::MAX).is_err());
    }
}
