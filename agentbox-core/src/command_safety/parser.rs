//! Shallow structural reading of command strings.
//!
//! This is intentionally not a shell parser: no quoting, no AST, no
//! expansion. It answers one question — which shell features does this
//! string reach for — so the feature gates can deny anything the caller did
//! not explicitly opt into. Anything subtler than a substring test belongs
//! to the allowlist, not here.

/// Structural features of a command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// First whitespace-separated token before any shell metacharacter.
    pub base_command: String,
    /// Remaining tokens of the command part.
    pub args: Vec<String>,
    pub has_pipes: bool,
    pub has_redirections: bool,
    pub has_command_substitution: bool,
    pub has_background: bool,
}

const METACHARACTERS: &[char] = &['|', ';', '<', '>', '&', '$', '`'];

/// Splits out the base command and flags shell features by direct substring
/// tests. Everything before the first metacharacter is the command part.
pub fn parse_command(command: &str) -> ParsedCommand {
    let command_part = match command.find(METACHARACTERS) {
        Some(index) => &command[..index],
        None => command,
    };

    let mut tokens = command_part.split_whitespace();
    let base_command = tokens.next().unwrap_or_default().to_string();
    let args = tokens.map(str::to_string).collect();

    ParsedCommand {
        base_command,
        args,
        has_pipes: command.contains('|'),
        has_redirections: command.contains('<') || command.contains('>'),
        has_command_substitution: command.contains("$(") || command.contains('`'),
        has_background: command.contains('&'),
    }
}
