//! # agentbox-core
//!
//! Core library for agentbox: lets an AI agent run shell commands and touch
//! files inside a bounded workspace without escaping that boundary or running
//! unreviewed destructive commands.
//!
//! ## Subsystems
//!
//! - [`workspace`] — path-boundary validation against a workspace root,
//!   including traversal and symlink-escape defenses.
//! - [`command_safety`] — shallow command structure analysis, shell-injection
//!   signatures, and the default-deny command allowlist.
//! - [`terminal`] — PTY-backed session management: concurrency admission,
//!   timeouts, bounded output buffering, signal-escalated termination, and
//!   live event streaming.
//! - [`tools`] — the JSON tool façade (`terminal_execute`, `terminal_status`,
//!   `terminal_kill`, `terminal_list`) plus the policy and audit collaborator
//!   traits.
//! - [`config`] — configuration types, defaults, and TOML loading.

pub mod command_safety;
pub mod config;
pub mod terminal;
pub mod tools;
pub mod workspace;

pub use agentbox_exec_events::SessionOutputEvent;
