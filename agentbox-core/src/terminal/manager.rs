use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use agentbox_exec_events::SessionOutputEvent;
use anyhow::Context;
use parking_lot::Mutex;
use portable_pty::{CommandBuilder, PtySize, native_pty_system};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, warn};

use crate::config::TerminalConfig;
use crate::config::constants::{
    DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_TIMEOUT_MS, DEFAULT_TIMEOUT_MS, KILL_GRACE_PERIOD_MS,
    MIN_TIMEOUT_MS, PTY_COLS, PTY_ROWS,
};

use super::buffer::BoundedBuffer;
use super::process_group;
use super::session::{SessionHandle, SessionState, SessionStatus, TerminalSessionInfo};
use super::shell::resolve_shell;

/// Limits applied by one manager instance.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub max_concurrency: usize,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_timeout_ms: DEFAULT_MAX_TIMEOUT_MS,
        }
    }
}

impl From<&TerminalConfig> for SessionManagerConfig {
    fn from(config: &TerminalConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            default_timeout_ms: config.default_timeout_ms,
            max_timeout_ms: config.max_timeout_ms,
        }
    }
}

/// Per-call options for [`TerminalSessionManager::create_session`].
#[derive(Debug, Clone, Default)]
pub struct CreateSessionOptions {
    /// Timeout override; `None` uses the configured default. Values below
    /// the floor are rejected, values above the cap silently clamped.
    pub timeout_ms: Option<u64>,
    /// Extra environment merged over the inherited process environment.
    pub env: HashMap<String, String>,
}

/// A freshly spawned session: its snapshot plus the dedicated event stream.
///
/// The receiver is the session's only subscription; the channel closes once
/// the manager drops the session, which is the end-of-stream signal.
pub struct SpawnedSession {
    pub info: TerminalSessionInfo,
    pub events: UnboundedReceiver<SessionOutputEvent>,
}

/// Failures thrown by `create_session`. Security denials never appear here;
/// they are returned as data by the safety layer before a session exists.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("maximum of {max} concurrent sessions reached")]
    ConcurrencyExceeded { max: usize },

    #[error("timeout {requested_ms} ms is below the {} ms floor", MIN_TIMEOUT_MS)]
    TimeoutTooSmall { requested_ms: u64 },

    #[error("session '{0}' already exists")]
    DuplicateSession(String),

    #[error("command cannot be empty")]
    EmptyCommand,

    #[error("failed to spawn session process")]
    Spawn(#[source] anyhow::Error),
}

/// Owns the full lifecycle of PTY-backed command executions.
///
/// One explicit instance per application context; callers thread it through
/// rather than reaching for a process-wide singleton. All shared state is
/// the session table, guarded by a single mutex.
pub struct TerminalSessionManager {
    config: SessionManagerConfig,
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

impl TerminalSessionManager {
    pub fn new(config: SessionManagerConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    /// Number of sessions currently in the `Running` state.
    pub fn running_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|handle| handle.is_running())
            .count()
    }

    /// Admission check: whether a new session would stay under the cap.
    pub fn can_create_session(&self) -> bool {
        self.running_count() < self.config.max_concurrency
    }

    /// Spawns `command` under the user's shell on a fresh PTY.
    ///
    /// The session is registered only after the spawn fully succeeds; no
    /// partially-initialized session is ever observable. The returned
    /// receiver carries the session's entire event stream.
    pub async fn create_session(
        &self,
        id: impl Into<String>,
        command: &str,
        cwd: &Path,
        options: CreateSessionOptions,
    ) -> Result<SpawnedSession, SessionError> {
        let id = id.into();
        if command.trim().is_empty() {
            return Err(SessionError::EmptyCommand);
        }
        let timeout_ms = self.effective_timeout(options.timeout_ms)?;

        let size = PtySize {
            rows: PTY_ROWS,
            cols: PTY_COLS,
            pixel_width: 0,
            pixel_height: 0,
        };
        let shell = resolve_shell();

        // The table lock is held across the spawn so the admission check,
        // duplicate check, and insert are one atomic step; spawn itself does
        // no blocking IO beyond process creation.
        let (handle, info, events_rx, reader) = {
            let mut sessions = self.sessions.lock();

            let running = sessions.values().filter(|h| h.is_running()).count();
            if running >= self.config.max_concurrency {
                return Err(SessionError::ConcurrencyExceeded {
                    max: self.config.max_concurrency,
                });
            }
            let entry = match sessions.entry(id.clone()) {
                Entry::Occupied(_) => return Err(SessionError::DuplicateSession(id)),
                Entry::Vacant(entry) => entry,
            };

            let mut builder = CommandBuilder::new(&shell);
            builder.arg("-c");
            builder.arg(command);
            builder.cwd(cwd);
            set_session_environment(&mut builder, &options.env, size, &shell);

            let pty_system = native_pty_system();
            let pair = pty_system
                .openpty(size)
                .context("failed to allocate PTY pair")
                .map_err(SessionError::Spawn)?;

            let child = pair
                .slave
                .spawn_command(builder)
                .with_context(|| format!("failed to spawn '{shell} -c' for session"))
                .map_err(SessionError::Spawn)?;
            let child_pid = child.process_id();
            drop(pair.slave);

            let reader = pair
                .master
                .try_clone_reader()
                .context("failed to clone PTY reader")
                .map_err(SessionError::Spawn)?;
            let writer = pair
                .master
                .take_writer()
                .context("failed to take PTY writer")
                .map_err(SessionError::Spawn)?;
            let killer = child.clone_killer();

            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let handle = Arc::new(SessionHandle {
                id: id.clone(),
                command: command.to_string(),
                cwd: cwd.to_path_buf(),
                started_at: SystemTime::now(),
                timeout_ms,
                child_pid,
                state: Mutex::new(SessionState {
                    status: SessionStatus::Running,
                    exit_code: None,
                    buffer: BoundedBuffer::default(),
                }),
                master: Mutex::new(Some(pair.master)),
                writer: Mutex::new(Some(writer)),
                killer: Mutex::new(killer),
                events: events_tx,
                timeout_task: Mutex::new(None),
            });
            entry.insert(Arc::clone(&handle));
            // Snapshot before the wait thread exists so the returned info
            // always reflects the freshly spawned (running) session.
            let info = handle.snapshot();

            {
                let wait_handle = Arc::clone(&handle);
                let wait_id = id.clone();
                let mut child = child;
                let _ = thread::Builder::new()
                    .name(format!("agentbox-wait-{id}"))
                    .spawn(move || match child.wait() {
                        Ok(status) => {
                            wait_handle.clear_timeout();
                            wait_handle.finalize_exit(exit_status_code(status));
                        }
                        Err(error) => {
                            warn!(
                                target: "agentbox.terminal",
                                session_id = %wait_id,
                                %error,
                                "failed to wait for session process"
                            );
                            wait_handle.clear_timeout();
                            wait_handle.finalize_exit(-1);
                        }
                    });
            }
            (handle, info, events_rx, reader)
        };

        spawn_reader_thread(&id, reader, Arc::clone(&handle));
        self.arm_timeout(&handle, timeout_ms);

        debug!(
            target: "agentbox.terminal",
            session_id = %id,
            command,
            timeout_ms,
            "session spawned"
        );

        Ok(SpawnedSession {
            info,
            events: events_rx,
        })
    }

    /// Initiates termination of a running session. Idempotent: returns
    /// false for unknown or already-terminal sessions. "Cancelled" means
    /// termination *initiated* — the SIGTERM → SIGKILL escalation continues
    /// off the control path.
    pub fn cancel_session(&self, id: &str, reason: &str) -> bool {
        let Some(handle) = self.handle(id) else {
            return false;
        };
        if !handle.mark_cancelled(reason) {
            return false;
        }
        handle.clear_timeout();
        escalate_kill(handle);
        true
    }

    /// Writes input to a running session's PTY. No-op returning false for
    /// unknown or terminal sessions.
    pub fn write_to_session(&self, id: &str, data: &[u8], append_newline: bool) -> bool {
        let Some(handle) = self.handle(id) else {
            return false;
        };
        if !handle.is_running() {
            return false;
        }
        let mut writer_guard = handle.writer.lock();
        let Some(writer) = writer_guard.as_mut() else {
            return false;
        };
        match write_session_input(writer.as_mut(), data, append_newline) {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    target: "agentbox.terminal",
                    session_id = %id,
                    %error,
                    "failed to write to session"
                );
                false
            }
        }
    }

    /// Resizes a running session's PTY. No-op returning false otherwise.
    pub fn resize_session(&self, id: &str, rows: u16, cols: u16) -> bool {
        let Some(handle) = self.handle(id) else {
            return false;
        };
        if !handle.is_running() {
            return false;
        }
        let master_guard = handle.master.lock();
        let Some(master) = master_guard.as_ref() else {
            return false;
        };
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        match master.resize(size) {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    target: "agentbox.terminal",
                    session_id = %id,
                    %error,
                    "failed to resize session"
                );
                false
            }
        }
    }

    pub fn get_session(&self, id: &str) -> Option<TerminalSessionInfo> {
        self.handle(id).map(|handle| handle.snapshot())
    }

    /// Retained output for a session, including the truncation marker when
    /// the cap was reached.
    pub fn get_output(&self, id: &str) -> Option<String> {
        self.handle(id).map(|handle| handle.output())
    }

    pub fn list_sessions(&self) -> Vec<TerminalSessionInfo> {
        self.sessions
            .lock()
            .values()
            .map(|handle| handle.snapshot())
            .collect()
    }

    /// Removes a terminal session from the live table, releasing its buffer.
    /// Running sessions are never removed; returns false for them and for
    /// unknown ids.
    pub fn cleanup_session(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(id) {
            Some(handle) if handle.is_running() => false,
            Some(_) => sessions.remove(id).is_some(),
            None => false,
        }
    }

    /// Removes every terminal session; returns how many were removed.
    pub fn cleanup_completed_sessions(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, handle| handle.is_running());
        before - sessions.len()
    }

    /// Cancels every running session; used at shutdown. Terminations
    /// escalate in parallel on their own threads.
    pub fn kill_all_sessions(&self) -> usize {
        let ids: Vec<String> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .filter(|(_, handle)| handle.is_running())
                .map(|(id, _)| id.clone())
                .collect()
        };
        let mut cancelled = 0;
        for id in ids {
            if self.cancel_session(&id, "shutdown") {
                cancelled += 1;
            }
        }
        cancelled
    }

    fn handle(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().get(id).cloned()
    }

    fn effective_timeout(&self, requested: Option<u64>) -> Result<u64, SessionError> {
        match requested {
            None => Ok(self.config.default_timeout_ms.min(self.config.max_timeout_ms)),
            Some(requested_ms) if requested_ms < MIN_TIMEOUT_MS => {
                Err(SessionError::TimeoutTooSmall { requested_ms })
            }
            Some(requested_ms) => Ok(requested_ms.min(self.config.max_timeout_ms)),
        }
    }

    fn arm_timeout(&self, handle: &Arc<SessionHandle>, timeout_ms: u64) {
        let task_handle = Arc::clone(handle);
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            // Acting is gated on the status check, so a timer that fires
            // after natural exit is a no-op.
            if task_handle.mark_timed_out() {
                escalate_kill(task_handle);
            }
        });
        *handle.timeout_task.lock() = Some(task);
    }
}

impl Drop for TerminalSessionManager {
    fn drop(&mut self) {
        self.kill_all_sessions();
    }
}

/// Inherit the process environment, overlay PTY hygiene, then the caller's
/// entries so explicit requests win.
fn set_session_environment(
    builder: &mut CommandBuilder,
    extra_env: &HashMap<String, String>,
    size: PtySize,
    shell: &str,
) {
    for (key, value) in std::env::vars_os() {
        builder.env(key, value);
    }

    builder.env("TERM", "xterm-256color");
    builder.env("PAGER", "cat");
    builder.env("GIT_PAGER", "cat");
    builder.env("COLUMNS", size.cols.to_string());
    builder.env("LINES", size.rows.to_string());
    builder.env("NO_COLOR", "1");
    builder.env("CLICOLOR", "0");
    builder.env("SHELL", shell);

    for (key, value) in extra_env {
        builder.env(key, value);
    }
}

fn write_session_input(
    writer: &mut (dyn Write + Send),
    data: &[u8],
    append_newline: bool,
) -> std::io::Result<()> {
    writer.write_all(data)?;
    if append_newline {
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

fn exit_status_code(status: portable_pty::ExitStatus) -> i32 {
    if status.signal().is_some() {
        -1
    } else {
        status.exit_code() as i32
    }
}

fn spawn_reader_thread(id: &str, mut reader: Box<dyn Read + Send>, handle: Arc<SessionHandle>) {
    let session_id = id.to_string();
    let _ = thread::Builder::new()
        .name(format!("agentbox-reader-{session_id}"))
        .spawn(move || {
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(bytes_read) => {
                        let chunk = String::from_utf8_lossy(&buffer[..bytes_read]).into_owned();
                        handle.push_output(chunk);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        debug!(
                            target: "agentbox.terminal",
                            session_id = %session_id,
                            %error,
                            "session reader stopped"
                        );
                        break;
                    }
                }
            }
        });
}

/// Runs the SIGTERM → grace → SIGKILL escalation off the control path.
/// Kill failures are swallowed: a process that is already gone satisfies
/// the goal.
fn escalate_kill(handle: Arc<SessionHandle>) {
    let _ = thread::Builder::new()
        .name(format!("agentbox-kill-{}", handle.id))
        .spawn(move || {
            let grace = Duration::from_millis(KILL_GRACE_PERIOD_MS);
            match handle.child_pid {
                Some(pid) => {
                    let outcome = process_group::graceful_kill_process_tree(pid, grace);
                    debug!(
                        target: "agentbox.terminal",
                        session_id = %handle.id,
                        ?outcome,
                        "termination escalation finished"
                    );
                }
                None => {
                    // No PID to signal a group with; fall back to the PTY's
                    // own killer.
                    let mut killer = handle.killer.lock();
                    if let Err(error) = killer.kill() {
                        debug!(
                            target: "agentbox.terminal",
                            session_id = %handle.id,
                            %error,
                            "kill after escalation fallback failed"
                        );
                    }
                }
            }
        });
}
