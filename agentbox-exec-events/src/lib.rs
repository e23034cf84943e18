//! Structured session events shared across agentbox crates.
//!
//! This crate exposes the serialized schema for terminal session output,
//! exit, error, and timeout notifications emitted by the sandbox runtime.
//! Downstream applications can deserialize these structures to drive UI
//! transports, logging, or auditing pipelines without depending on the full
//! `agentbox-core` crate.

use serde::{Deserialize, Serialize};

/// Semantic version of the serialized event schema exported by this crate.
pub const EVENT_SCHEMA_VERSION: &str = "0.1.0";

/// A single event on a terminal session's output stream.
///
/// `Data` events carry live output chunks as they arrive from the PTY and
/// keep flowing even after the session's retained buffer has been capped.
/// The remaining variants are terminal notifications; at most one of them is
/// emitted per session, after which the session's channel closes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionOutputEvent {
    /// A chunk of raw output read from the session's PTY.
    Data { session_id: String, data: String },
    /// The process exited on its own with the given exit code.
    Exit { session_id: String, exit_code: i32 },
    /// The session was cancelled or failed; `message` names the cause.
    Error { session_id: String, message: String },
    /// The session exceeded its timeout and termination was initiated.
    Timeout { session_id: String, timeout_ms: u64 },
}

impl SessionOutputEvent {
    /// Returns the id of the session this event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            SessionOutputEvent::Data { session_id, .. }
            | SessionOutputEvent::Exit { session_id, .. }
            | SessionOutputEvent::Error { session_id, .. }
            | SessionOutputEvent::Timeout { session_id, .. } => session_id,
        }
    }

    /// True for every variant except `Data`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionOutputEvent::Data { .. })
    }
}

/// Wraps a [`SessionOutputEvent`] with schema metadata so downstream
/// consumers can negotiate compatibility before processing a stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionedSessionEvent {
    /// Semantic version describing the schema of the nested event payload.
    pub schema_version: String,
    /// Concrete event emitted by the sandbox runtime.
    pub event: SessionOutputEvent,
}

impl VersionedSessionEvent {
    pub fn new(event: SessionOutputEvent) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION.to_string(),
            event,
        }
    }

    /// Returns the nested event, consuming the wrapper.
    pub fn into_event(self) -> SessionOutputEvent {
        self.event
    }
}

impl From<SessionOutputEvent> for VersionedSessionEvent {
    fn from(event: SessionOutputEvent) -> Self {
        Self::new(event)
    }
}

/// Sink for processing [`SessionOutputEvent`] instances.
pub trait EventEmitter {
    /// Invoked for each event emitted by the sandbox runtime.
    fn emit(&mut self, event: &SessionOutputEvent);
}

impl<F> EventEmitter for F
where
    F: FnMut(&SessionOutputEvent),
{
    fn emit(&mut self, event: &SessionOutputEvent) {
        self(event);
    }
}

/// JSON helper utilities for serializing and deserializing session events.
pub mod json {
    use super::{SessionOutputEvent, VersionedSessionEvent};

    /// Converts an event into a `serde_json::Value`.
    pub fn to_value(event: &SessionOutputEvent) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(event)
    }

    /// Serializes an event into a JSON string.
    pub fn to_string(event: &SessionOutputEvent) -> serde_json::Result<String> {
        serde_json::to_string(event)
    }

    /// Deserializes an event from a JSON string.
    pub fn from_str(payload: &str) -> serde_json::Result<SessionOutputEvent> {
        serde_json::from_str(payload)
    }

    /// Serializes a [`VersionedSessionEvent`] wrapper.
    pub fn versioned_to_string(event: &SessionOutputEvent) -> serde_json::Result<String> {
        serde_json::to_string(&VersionedSessionEvent::new(event.clone()))
    }

    /// Deserializes a [`VersionedSessionEvent`] wrapper.
    pub fn versioned_from_str(payload: &str) -> serde_json::Result<VersionedSessionEvent> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn data_event_round_trips_through_json() {
        let event = SessionOutputEvent::Data {
            session_id: "s1".to_string(),
            data: "hello\n".to_string(),
        };
        let payload = json::to_string(&event).unwrap();
        assert!(payload.contains("\"type\":\"data\""));
        assert_eq!(json::from_str(&payload).unwrap(), event);
    }

    #[test]
    fn timeout_event_carries_timeout_ms() {
        let event = SessionOutputEvent::Timeout {
            session_id: "s2".to_string(),
            timeout_ms: 60_000,
        };
        let value = json::to_value(&event).unwrap();
        assert_eq!(value["type"], "timeout");
        assert_eq!(value["timeout_ms"], 60_000);
    }

    #[test]
    fn versioned_wrapper_reports_current_schema() {
        let event = SessionOutputEvent::Exit {
            session_id: "s3".to_string(),
            exit_code: 0,
        };
        let wrapped = VersionedSessionEvent::new(event.clone());
        assert_eq!(wrapped.schema_version, EVENT_SCHEMA_VERSION);
        assert_eq!(wrapped.into_event(), event);
    }

    #[test]
    fn terminal_classification() {
        let data = SessionOutputEvent::Data {
            session_id: "s".into(),
            data: "x".into(),
        };
        let exit = SessionOutputEvent::Exit {
            session_id: "s".into(),
            exit_code: 1,
        };
        assert!(!data.is_terminal());
        assert!(exit.is_terminal());
    }

    #[test]
    fn closure_implements_event_emitter() {
        let mut seen = Vec::new();
        {
            let mut emitter = |event: &SessionOutputEvent| seen.push(event.session_id().to_string());
            emitter.emit(&SessionOutputEvent::Data {
                session_id: "abc".into(),
                data: String::new(),
            });
        }
        assert_eq!(seen, vec!["abc".to_string()]);
    }
}
