//! Independent live-tail bridge over session event streams.
//!
//! Consumers that want per-session line/byte streams decoupled from the
//! manager's retained buffer attach a [`StreamingOutputHandler`] to a
//! session's event receiver. Its per-session buffers truncate from the
//! *front* (oldest-first) so they always reflect the most recent output —
//! the opposite policy from the manager's audit-oriented [`BoundedBuffer`],
//! chosen because a late-attaching consumer wants the live tail, not the
//! first bytes.
//!
//! [`BoundedBuffer`]: super::buffer::BoundedBuffer

use std::collections::HashMap;
use std::sync::Arc;

use agentbox_exec_events::SessionOutputEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::config::StreamingConfig;

/// Events emitted by the streaming handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Raw chunk, forwarded as received.
    Output { session_id: String, data: String },
    /// One trimmed, non-empty line of output.
    Line { session_id: String, line: String },
    Exit { session_id: String, exit_code: i32 },
    Error { session_id: String, message: String },
    Timeout { session_id: String, timeout_ms: u64 },
    /// Emitted after any terminal notification, summarizing the session.
    SessionEnd {
        session_id: String,
        reason: String,
        buffered_bytes: usize,
    },
}

/// Per-session live-tail buffers plus a derived event stream.
pub struct StreamingOutputHandler {
    buffers: Mutex<HashMap<String, String>>,
    max_buffer_size: usize,
    emit_lines: bool,
    events: UnboundedSender<StreamEvent>,
}

impl StreamingOutputHandler {
    /// Creates a handler and the receiver for its derived event stream.
    pub fn new(config: &StreamingConfig) -> (Self, UnboundedReceiver<StreamEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                buffers: Mutex::new(HashMap::new()),
                max_buffer_size: config.max_buffer_size.max(1),
                emit_lines: true,
                events,
            },
            receiver,
        )
    }

    /// Disables per-line events; `Output` chunks still flow.
    pub fn without_line_events(mut self) -> Self {
        self.emit_lines = false;
        self
    }

    /// Ingests one session event, updating the buffer and emitting derived
    /// events.
    pub fn handle_event(&self, event: &SessionOutputEvent) {
        match event {
            SessionOutputEvent::Data { session_id, data } => {
                self.append(session_id, data);
                let _ = self.events.send(StreamEvent::Output {
                    session_id: session_id.clone(),
                    data: data.clone(),
                });
                if self.emit_lines {
                    for line in data.split('\n') {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let _ = self.events.send(StreamEvent::Line {
                            session_id: session_id.clone(),
                            line: line.to_string(),
                        });
                    }
                }
            }
            SessionOutputEvent::Exit {
                session_id,
                exit_code,
            } => {
                let _ = self.events.send(StreamEvent::Exit {
                    session_id: session_id.clone(),
                    exit_code: *exit_code,
                });
                self.end_session(session_id, format!("exited with code {exit_code}"));
            }
            SessionOutputEvent::Error {
                session_id,
                message,
            } => {
                let _ = self.events.send(StreamEvent::Error {
                    session_id: session_id.clone(),
                    message: message.clone(),
                });
                self.end_session(session_id, message.clone());
            }
            SessionOutputEvent::Timeout {
                session_id,
                timeout_ms,
            } => {
                let _ = self.events.send(StreamEvent::Timeout {
                    session_id: session_id.clone(),
                    timeout_ms: *timeout_ms,
                });
                self.end_session(session_id, format!("timed out after {timeout_ms} ms"));
            }
        }
    }

    /// Drives a session's event stream to completion on a background task.
    pub fn attach(
        self: &Arc<Self>,
        mut receiver: UnboundedReceiver<SessionOutputEvent>,
    ) -> JoinHandle<()> {
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                handler.handle_event(&event);
            }
        })
    }

    /// Current buffer contents for a session.
    pub fn buffer(&self, session_id: &str) -> Option<String> {
        self.buffers.lock().get(session_id).cloned()
    }

    pub fn buffer_size(&self, session_id: &str) -> usize {
        self.buffers
            .lock()
            .get(session_id)
            .map(|buffer| buffer.len())
            .unwrap_or(0)
    }

    pub fn has_buffer(&self, session_id: &str) -> bool {
        self.buffers.lock().contains_key(session_id)
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.buffers.lock().keys().cloned().collect()
    }

    /// Drops one session's buffer; returns whether it existed.
    pub fn clear(&self, session_id: &str) -> bool {
        self.buffers.lock().remove(session_id).is_some()
    }

    pub fn clear_all(&self) {
        self.buffers.lock().clear();
    }

    /// Appends with keep-newest semantics: when the cap is exceeded the
    /// oldest bytes are dropped from the front.
    fn append(&self, session_id: &str, data: &str) {
        let mut buffers = self.buffers.lock();
        let buffer = buffers.entry(session_id.to_string()).or_default();
        buffer.push_str(data);
        if buffer.len() > self.max_buffer_size {
            let mut cut = buffer.len() - self.max_buffer_size;
            while cut < buffer.len() && !buffer.is_char_boundary(cut) {
                cut += 1;
            }
            buffer.drain(..cut);
        }
    }

    fn end_session(&self, session_id: &str, reason: String) {
        let buffered_bytes = self.buffer_size(session_id);
        let _ = self.events.send(StreamEvent::SessionEnd {
            session_id: session_id.to_string(),
            reason,
            buffered_bytes,
        });
    }
}
