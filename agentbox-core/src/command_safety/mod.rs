//! Command safety evaluation.
//!
//! Three layers, composed by [`validate_command`] in fixed order so the
//! cheapest and most specific checks short-circuit first:
//!
//! 1. shell-injection signatures — hard fail, no opt-out;
//! 2. shell feature gates — pipes, redirections, command substitution, and
//!    backgrounding each require explicit opt-in;
//! 3. the default-deny [`CommandAllowlist`].

pub mod allowlist;
pub mod injection;
pub mod parser;

pub use allowlist::{AllowlistEntry, CommandAllowlist, CommandPattern, CommandValidation};
pub use injection::detect_shell_injection;
pub use parser::{ParsedCommand, parse_command};

/// Per-call opt-ins for shell features. Everything defaults to denied.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyOptions {
    pub allow_pipes: bool,
    pub allow_redirections: bool,
    pub allow_command_substitution: bool,
    pub allow_background: bool,
}

/// Runs the full gate: injection signatures, feature gates, allowlist.
pub fn validate_command(
    command: &str,
    allowlist: &CommandAllowlist,
    options: SafetyOptions,
) -> CommandValidation {
    if let Some(reason) = detect_shell_injection(command) {
        return CommandValidation {
            allowed: false,
            reason: Some(format!("blocked dangerous pattern: {reason}")),
            matched: None,
        };
    }

    let parsed = parse_command(command);
    let feature_denial = if parsed.has_pipes && !options.allow_pipes {
        Some("pipes are not permitted for this command")
    } else if parsed.has_redirections && !options.allow_redirections {
        Some("redirections are not permitted for this command")
    } else if parsed.has_command_substitution && !options.allow_command_substitution {
        Some("command substitution is not permitted for this command")
    } else if parsed.has_background && !options.allow_background {
        Some("background execution is not permitted for this command")
    } else {
        None
    };
    if let Some(reason) = feature_denial {
        return CommandValidation {
            allowed: false,
            reason: Some(reason.to_string()),
            matched: None,
        };
    }

    allowlist.validate(command)
}
