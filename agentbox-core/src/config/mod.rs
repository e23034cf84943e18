//! Configuration for the sandbox runtime.
//!
//! Loaded from an `agentbox.toml` at the workspace root when present;
//! every field carries a serde default so a missing file or section yields
//! the conservative built-in configuration.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub mod constants;

use constants::{
    DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_TIMEOUT_MS, DEFAULT_STREAM_BUFFER_MAX_SIZE,
    DEFAULT_TIMEOUT_MS,
};

/// Session manager limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TerminalConfig {
    /// Maximum number of concurrently running sessions.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout applied when a request does not specify one, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Hard upper bound on session timeouts; larger requests are clamped.
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
        }
    }
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_timeout_ms() -> u64 {
    DEFAULT_MAX_TIMEOUT_MS
}

/// One allowlist entry as written in configuration.
///
/// `pattern` is a literal command prefix unless `regex` is set. An entry with
/// `allowed_args = []` permits the bare command and nothing else.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllowlistEntryConfig {
    pub pattern: String,

    #[serde(default)]
    pub regex: bool,

    #[serde(default)]
    pub description: String,

    /// Argument constraints; absent means any arguments are accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_args: Option<Vec<ArgPatternConfig>>,
}

/// One argument constraint: a literal unless `regex` is set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArgPatternConfig {
    pub pattern: String,

    #[serde(default)]
    pub regex: bool,
}

/// Command allowlist configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CommandsConfig {
    /// Entries evaluated in order; first match wins. Empty means the
    /// built-in conservative table is used.
    #[serde(default)]
    pub allow: Vec<AllowlistEntryConfig>,
}

/// Streaming output handler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// Per-session buffer cap for the live-tail handler, in bytes.
    #[serde(default = "default_stream_buffer_max_size")]
    pub max_buffer_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: default_stream_buffer_max_size(),
        }
    }
}

fn default_stream_buffer_max_size() -> usize {
    DEFAULT_STREAM_BUFFER_MAX_SIZE
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentboxConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub commands: CommandsConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,
}

impl AgentboxConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))
    }

    /// Loads `agentbox.toml` from the workspace root if present, otherwise
    /// returns defaults.
    pub fn load_from_workspace(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join("agentbox.toml");
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = AgentboxConfig::default();
        assert_eq!(config.terminal.max_concurrency, 5);
        assert_eq!(config.terminal.default_timeout_ms, 60_000);
        assert_eq!(config.terminal.max_timeout_ms, 300_000);
        assert_eq!(config.streaming.max_buffer_size, 1024 * 1024);
        assert!(config.commands.allow.is_empty());
    }

    #[test]
    fn partial_toml_fills_missing_sections() {
        let parsed: AgentboxConfig = toml::from_str(
            r#"
            [terminal]
            max_concurrency = 2
            "#,
        )
        .unwrap();
        assert_eq!(parsed.terminal.max_concurrency, 2);
        assert_eq!(parsed.terminal.default_timeout_ms, 60_000);
        assert_eq!(parsed.streaming.max_buffer_size, 1024 * 1024);
    }

    #[test]
    fn allowlist_entries_parse_with_arg_constraints() {
        let parsed: AgentboxConfig = toml::from_str(
            r#"
            [[commands.allow]]
            pattern = "git"
            description = "read-only git"
            allowed_args = [
                { pattern = "status" },
                { pattern = "log( .*)?", regex = true },
            ]

            [[commands.allow]]
            pattern = "pwd"
            allowed_args = []
            "#,
        )
        .unwrap();
        assert_eq!(parsed.commands.allow.len(), 2);
        let git = &parsed.commands.allow[0];
        assert!(!git.regex);
        assert_eq!(git.allowed_args.as_ref().unwrap().len(), 2);
        let pwd = &parsed.commands.allow[1];
        assert_eq!(pwd.allowed_args.as_ref().unwrap().len(), 0);
    }
}
