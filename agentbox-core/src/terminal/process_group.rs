//! Process-group signaling for reliable session teardown.
//!
//! A session's shell may spawn children of its own; signaling only the shell
//! would leave them running. These helpers resolve the process group for a
//! PID and signal the whole group, with a staged SIGTERM → grace → SIGKILL
//! escalation. "No such process" failures are swallowed: the goal (process
//! gone) is already satisfied.
//!
//! On non-Unix platforms the helpers are no-ops; process groups do not
//! exist there and a port needs its own process-tree termination strategy
//! (job objects on Windows).

use std::io;
use std::time::{Duration, Instant};

/// Signal used when terminating a session's process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// SIGTERM - allows graceful shutdown
    Term,
    /// SIGKILL - immediate termination
    Kill,
}

#[cfg(unix)]
impl KillSignal {
    fn as_libc_signal(self) -> libc::c_int {
        match self {
            KillSignal::Term => libc::SIGTERM,
            KillSignal::Kill => libc::SIGKILL,
        }
    }
}

/// How a graceful termination attempt completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GracefulTermination {
    /// Process exited within the grace period after SIGTERM.
    GracefulExit,
    /// Process had to be forcefully killed with SIGKILL.
    ForcefulKill,
    /// Process was already not running.
    AlreadyExited,
}

/// Check if a process is still running without signaling it.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if result == 0 {
        return true;
    }
    let err = io::Error::last_os_error();
    // ESRCH = no such process; EPERM = exists but not signalable (running)
    err.raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    false
}

/// Signal `pid` and, best-effort, the whole process group it leads or
/// belongs to. Missing processes are not an error.
#[cfg(unix)]
pub fn signal_process_tree(pid: u32, signal: KillSignal) -> io::Result<()> {
    use std::io::ErrorKind;

    let pid = pid as libc::pid_t;
    let sig = signal.as_libc_signal();

    if unsafe { libc::kill(pid, sig) } == -1 {
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::NotFound {
            return Err(err);
        }
    }

    let pgid = unsafe { libc::getpgid(pid) };
    if pgid == -1 {
        return Ok(());
    }
    if unsafe { libc::killpg(pgid, sig) } == -1 {
        let err = io::Error::last_os_error();
        if err.kind() != ErrorKind::NotFound {
            return Err(err);
        }
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn signal_process_tree(_pid: u32, _signal: KillSignal) -> io::Result<()> {
    Ok(())
}

/// Staged termination: SIGTERM to the process tree, wait up to
/// `grace_period` for exit, then SIGKILL anything still running.
#[cfg(unix)]
pub fn graceful_kill_process_tree(pid: u32, grace_period: Duration) -> GracefulTermination {
    if !is_process_running(pid) {
        return GracefulTermination::AlreadyExited;
    }

    let _ = signal_process_tree(pid, KillSignal::Term);

    let deadline = Instant::now() + grace_period;
    let poll_interval = Duration::from_millis(50);
    while Instant::now() < deadline {
        if !is_process_running(pid) {
            return GracefulTermination::GracefulExit;
        }
        std::thread::sleep(poll_interval);
    }

    let _ = signal_process_tree(pid, KillSignal::Kill);
    GracefulTermination::ForcefulKill
}

#[cfg(not(unix))]
pub fn graceful_kill_process_tree(_pid: u32, _grace_period: Duration) -> GracefulTermination {
    GracefulTermination::AlreadyExited
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn own_process_is_running() {
        assert!(is_process_running(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn nonexistent_pid_is_not_running() {
        assert!(!is_process_running(2_000_000_000));
    }

    #[cfg(unix)]
    #[test]
    fn signaling_nonexistent_process_is_not_an_error() {
        assert!(signal_process_tree(2_000_000_000, KillSignal::Term).is_ok());
    }

    #[test]
    fn graceful_kill_of_nonexistent_process_reports_already_exited() {
        let result = graceful_kill_process_tree(2_000_000_000, Duration::from_millis(10));
        assert_eq!(result, GracefulTermination::AlreadyExited);
    }
}
