use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use agentbox_exec_events::SessionOutputEvent;
use parking_lot::Mutex;
use portable_pty::{ChildKiller, MasterPty};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

use super::buffer::BoundedBuffer;

/// Session lifecycle state. `Running` is the only non-terminal value; every
/// transition checks it first, so only one winner is recorded even when exit
/// and timeout race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        self != SessionStatus::Running
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::TimedOut => "timed_out",
        };
        f.write_str(label)
    }
}

/// Public snapshot of one session.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalSessionInfo {
    pub id: String,
    pub command: String,
    pub cwd: PathBuf,
    /// Milliseconds since the Unix epoch.
    pub started_at_ms: u64,
    pub timeout_ms: u64,
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    pub output_truncated: bool,
}

/// State mutated by PTY callbacks and explicit cancel/timeout calls, always
/// under the one lock.
pub(super) struct SessionState {
    pub(super) status: SessionStatus,
    pub(super) exit_code: Option<i32>,
    pub(super) buffer: BoundedBuffer,
}

/// A live session owned by the manager.
pub(super) struct SessionHandle {
    pub(super) id: String,
    pub(super) command: String,
    pub(super) cwd: PathBuf,
    pub(super) started_at: SystemTime,
    pub(super) timeout_ms: u64,
    pub(super) child_pid: Option<u32>,
    pub(super) state: Mutex<SessionState>,
    pub(super) master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    pub(super) writer: Mutex<Option<Box<dyn std::io::Write + Send>>>,
    pub(super) killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pub(super) events: UnboundedSender<SessionOutputEvent>,
    pub(super) timeout_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub(super) fn is_running(&self) -> bool {
        self.state.lock().status == SessionStatus::Running
    }

    pub(super) fn snapshot(&self) -> TerminalSessionInfo {
        let state = self.state.lock();
        TerminalSessionInfo {
            id: self.id.clone(),
            command: self.command.clone(),
            cwd: self.cwd.clone(),
            started_at_ms: self
                .started_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            timeout_ms: self.timeout_ms,
            status: state.status,
            exit_code: state.exit_code,
            output_truncated: state.buffer.is_truncated(),
        }
    }

    /// Cancels the pending timeout timer, if any. Never called while the
    /// state lock is held by the same thread.
    pub(super) fn clear_timeout(&self) {
        if let Some(task) = self.timeout_task.lock().take() {
            task.abort();
        }
    }

    /// Natural exit: records `Completed`/`Failed` from the exit code unless
    /// a cancellation or timeout already claimed the session.
    pub(super) fn finalize_exit(&self, exit_code: i32) -> bool {
        {
            let mut state = self.state.lock();
            if state.status != SessionStatus::Running {
                // Still flush so a killed session's retained output is in
                // its final single-chunk form.
                state.buffer.flush();
                return false;
            }
            state.buffer.flush();
            state.status = if exit_code == 0 {
                SessionStatus::Completed
            } else {
                SessionStatus::Failed
            };
            state.exit_code = Some(exit_code);
        }
        debug!(
            target: "agentbox.terminal",
            session_id = %self.id,
            exit_code,
            "session exited"
        );
        let _ = self.events.send(SessionOutputEvent::Exit {
            session_id: self.id.clone(),
            exit_code,
        });
        true
    }

    /// Explicit cancellation. Returns false when the session already
    /// reached a terminal state.
    pub(super) fn mark_cancelled(&self, reason: &str) -> bool {
        {
            let mut state = self.state.lock();
            if state.status != SessionStatus::Running {
                return false;
            }
            state.status = SessionStatus::Cancelled;
            state.buffer.flush();
        }
        debug!(
            target: "agentbox.terminal",
            session_id = %self.id,
            reason,
            "session cancelled"
        );
        let _ = self.events.send(SessionOutputEvent::Error {
            session_id: self.id.clone(),
            message: format!("session cancelled: {reason}"),
        });
        true
    }

    /// Timeout expiry. A timer firing after natural exit is a no-op.
    pub(super) fn mark_timed_out(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.status != SessionStatus::Running {
                return false;
            }
            state.status = SessionStatus::TimedOut;
            state.buffer.flush();
        }
        debug!(
            target: "agentbox.terminal",
            session_id = %self.id,
            timeout_ms = self.timeout_ms,
            "session timed out"
        );
        let _ = self.events.send(SessionOutputEvent::Timeout {
            session_id: self.id.clone(),
            timeout_ms: self.timeout_ms,
        });
        true
    }

    /// Appends live output to the retained buffer and forwards it on the
    /// session's event stream. Data keeps streaming after truncation.
    pub(super) fn push_output(&self, data: String) {
        {
            let mut state = self.state.lock();
            state.buffer.push(&data);
        }
        let _ = self.events.send(SessionOutputEvent::Data {
            session_id: self.id.clone(),
            data,
        });
    }

    pub(super) fn output(&self) -> String {
        self.state.lock().buffer.contents()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::TimedOut).unwrap(),
            "\"timed_out\""
        );
        assert_eq!(SessionStatus::Running.to_string(), "running");
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!SessionStatus::Running.is_terminal());
        for status in [
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Cancelled,
            SessionStatus::TimedOut,
        ] {
            assert!(status.is_terminal());
        }
    }
}
