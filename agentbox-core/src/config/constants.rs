//! Fixed limits and defaults for the sandbox runtime.

/// Smallest timeout a session may request, in milliseconds. Requests below
/// this floor are rejected rather than clamped.
pub const MIN_TIMEOUT_MS: u64 = 1_000;

/// Default per-session timeout when the caller does not specify one.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Largest effective timeout. Requests above this cap are silently clamped.
pub const DEFAULT_MAX_TIMEOUT_MS: u64 = 300_000;

/// Maximum number of concurrently running sessions.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Maximum bytes of output retained per session (prevents memory explosion).
/// Live data keeps streaming through events after the cap is reached; it
/// simply stops being retained.
pub const OUTPUT_BUFFER_MAX_SIZE: usize = 1024 * 1024;

/// Marker appended to a session's retained output once the cap is reached.
pub const TRUNCATION_MARKER: &str = "\n[output truncated: retention limit reached]";

/// Grace period between SIGTERM and SIGKILL during termination escalation.
pub const KILL_GRACE_PERIOD_MS: u64 = 5_000;

/// Default cap for the independent streaming handler's per-session buffer.
pub const DEFAULT_STREAM_BUFFER_MAX_SIZE: usize = 1024 * 1024;

/// Bytes of output recorded per audit row.
pub const DEFAULT_AUDIT_OUTPUT_LIMIT: usize = 8 * 1024;

/// Bytes of output returned in `terminal_status` previews.
pub const DEFAULT_PREVIEW_OUTPUT_LIMIT: usize = 2 * 1024;

/// Fixed terminal geometry for spawned sessions.
pub const PTY_ROWS: u16 = 30;
pub const PTY_COLS: u16 = 80;

/// Shell used when `$SHELL` is unset or unusable.
pub const FALLBACK_SHELL: &str = "/bin/bash";

/// Environment variable that appends literal prefixes to the allowlist,
/// comma-separated.
pub const ALLOW_LIST_ENV_VAR: &str = "AGENTBOX_COMMANDS_ALLOW_LIST";
