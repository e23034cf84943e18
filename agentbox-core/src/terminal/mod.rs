//! PTY-backed terminal session management.
//!
//! [`TerminalSessionManager`] owns the full lifecycle of sandboxed command
//! executions: concurrency admission, timeout enforcement, bounded output
//! retention, signal-escalated termination, and per-session event streams.
//! [`StreamingOutputHandler`] is an independent live-tail bridge layered on
//! top of a session's event stream.

mod buffer;
mod manager;
pub mod process_group;
mod session;
mod shell;
mod streaming;

pub use buffer::BoundedBuffer;
pub use manager::{
    CreateSessionOptions, SessionError, SessionManagerConfig, SpawnedSession,
    TerminalSessionManager,
};
pub use session::{SessionStatus, TerminalSessionInfo};
pub use shell::resolve_shell;
pub use streaming::{StreamEvent, StreamingOutputHandler};
