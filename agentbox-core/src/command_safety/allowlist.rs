//! Default-deny command allowlist.
//!
//! Entries are ordered and the first matching entry wins. A literal pattern
//! matches the whole command or a `pattern + " "` prefix, so `npm` matches
//! `npm run build` but never `npmx`. Regex patterns match the raw command
//! string. An entry may additionally constrain the argument tail; an
//! explicitly empty constraint list permits the bare command and nothing
//! else.

use std::env;

use regex::Regex;
use tracing::warn;

use crate::config::{AllowlistEntryConfig, CommandsConfig, constants::ALLOW_LIST_ENV_VAR};

/// A registered pattern: a literal command prefix or a compiled regex.
#[derive(Debug, Clone)]
pub enum CommandPattern {
    Literal(String),
    Regex(Regex),
}

impl CommandPattern {
    pub fn literal(pattern: impl Into<String>) -> Self {
        CommandPattern::Literal(pattern.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(CommandPattern::Regex)
    }

    /// Whether this pattern matches a full command string.
    fn matches_command(&self, command: &str) -> bool {
        match self {
            CommandPattern::Literal(pattern) => {
                command == pattern.as_str()
                    || (command.starts_with(pattern.as_str())
                        && command[pattern.len()..].starts_with(' '))
            }
            CommandPattern::Regex(pattern) => pattern.is_match(command),
        }
    }

    /// Whether this pattern matches an argument tail. Literals require
    /// equality here; there is no prefix rule for arguments.
    fn matches_args(&self, args: &str) -> bool {
        match self {
            CommandPattern::Literal(pattern) => args == pattern.as_str(),
            CommandPattern::Regex(pattern) => pattern.is_match(args),
        }
    }

    fn describe(&self) -> String {
        match self {
            CommandPattern::Literal(pattern) => pattern.clone(),
            CommandPattern::Regex(pattern) => pattern.as_str().to_string(),
        }
    }
}

/// One allowlist entry.
#[derive(Debug, Clone)]
pub struct AllowlistEntry {
    pub pattern: CommandPattern,
    pub description: String,
    /// `None` — any arguments. `Some(vec![])` — no arguments at all.
    pub allowed_args: Option<Vec<CommandPattern>>,
}

impl AllowlistEntry {
    pub fn new(pattern: CommandPattern, description: impl Into<String>) -> Self {
        Self {
            pattern,
            description: description.into(),
            allowed_args: None,
        }
    }

    pub fn with_args(mut self, allowed_args: Vec<CommandPattern>) -> Self {
        self.allowed_args = Some(allowed_args);
        self
    }

    /// The argument tail relative to this entry's pattern.
    fn argument_tail<'c>(&self, command: &'c str) -> &'c str {
        match &self.pattern {
            CommandPattern::Literal(pattern) if command.len() > pattern.len() => {
                command[pattern.len()..].trim()
            }
            CommandPattern::Literal(_) => "",
            // For regex entries the base command is the first token.
            CommandPattern::Regex(_) => command
                .split_once(char::is_whitespace)
                .map(|(_, tail)| tail.trim())
                .unwrap_or(""),
        }
    }
}

/// Outcome of allowlist validation. Denials are data, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandValidation {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Description of the entry that matched, when one did.
    pub matched: Option<String>,
}

impl CommandValidation {
    fn allow(matched: &AllowlistEntry) -> Self {
        Self {
            allowed: true,
            reason: None,
            matched: Some(matched.description.clone()),
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            matched: None,
        }
    }

    fn deny_matched(reason: String, matched: &AllowlistEntry) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            matched: Some(matched.description.clone()),
        }
    }
}

/// Ordered, default-deny registry of permitted command patterns.
#[derive(Debug, Clone)]
pub struct CommandAllowlist {
    entries: Vec<AllowlistEntry>,
}

impl CommandAllowlist {
    pub fn new(entries: Vec<AllowlistEntry>) -> Self {
        Self { entries }
    }

    /// The conservative built-in table for common dev tools.
    pub fn default_policy() -> Self {
        let regex_entry = |pattern: &str, description: &str| {
            AllowlistEntry::new(
                CommandPattern::regex(pattern).expect("built-in pattern must compile"),
                description,
            )
        };
        let literal_entry = |pattern: &str, description: &str| {
            AllowlistEntry::new(CommandPattern::literal(pattern), description)
        };

        let mut entries = vec![
            regex_entry(
                r"^git (status|log|diff|show|branch|remote|blame|describe)(\s.*)?$",
                "git read operations",
            ),
            regex_entry(
                r"^git (add|commit|checkout|switch|restore|stash|fetch|pull|push|merge|rebase)(\s.*)?$",
                "git write operations",
            ),
            regex_entry(
                r"^docker (ps|images|logs|inspect|version)(\s.*)?$",
                "read-only docker operations",
            ),
            literal_entry("curl", "fetch over http(s)").with_args(vec![
                CommandPattern::regex(r"^(-[A-Za-z-]+\s+)*https?://\S+$")
                    .expect("built-in pattern must compile"),
            ]),
            literal_entry("wget", "fetch over http(s)").with_args(vec![
                CommandPattern::regex(r"^(-[A-Za-z-]+\s+)*https?://\S+$")
                    .expect("built-in pattern must compile"),
            ]),
        ];

        for (pattern, description) in [
            ("npm", "node package manager"),
            ("npx", "node package runner"),
            ("yarn", "node package manager"),
            ("pnpm", "node package manager"),
            ("node", "node runtime"),
            ("cargo", "rust toolchain"),
            ("jest", "javascript test runner"),
            ("vitest", "javascript test runner"),
            ("pytest", "python test runner"),
            ("eslint", "javascript linter"),
            ("prettier", "code formatter"),
            ("tsc", "typescript compiler"),
            ("make", "build tool"),
            ("ls", "list directory"),
            ("cat", "print file"),
            ("grep", "search file contents"),
            ("find", "find files"),
            ("head", "print file head"),
            ("tail", "print file tail"),
            ("wc", "count lines/words"),
            ("which", "locate executable"),
            ("echo", "print text"),
            ("pwd", "print working directory"),
        ] {
            entries.push(literal_entry(pattern, description));
        }

        Self { entries }
    }

    /// Builds an allowlist from configuration, falling back to the built-in
    /// table when no entries are configured. Literal prefixes from the
    /// `AGENTBOX_COMMANDS_ALLOW_LIST` environment variable are appended in
    /// both cases.
    pub fn from_config(config: &CommandsConfig) -> Self {
        let mut allowlist = if config.allow.is_empty() {
            Self::default_policy()
        } else {
            Self::new(config.allow.iter().filter_map(compile_entry).collect())
        };

        if let Ok(extra) = env::var(ALLOW_LIST_ENV_VAR) {
            for pattern in extra.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                allowlist.entries.push(AllowlistEntry::new(
                    CommandPattern::literal(pattern),
                    format!("allowed via {ALLOW_LIST_ENV_VAR}"),
                ));
            }
        }

        allowlist
    }

    /// Atomically replaces the whole entry set.
    pub fn load_from_config(&mut self, config: &CommandsConfig) {
        self.entries = Self::from_config(config).entries;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates a command string. First matching entry wins; no match
    /// denies with a reason naming the command.
    pub fn validate(&self, command: &str) -> CommandValidation {
        let command = command.trim();
        if command.is_empty() {
            return CommandValidation::deny("empty command".to_string());
        }

        for entry in &self.entries {
            if !entry.pattern.matches_command(command) {
                continue;
            }

            let Some(allowed_args) = &entry.allowed_args else {
                return CommandValidation::allow(entry);
            };

            let tail = entry.argument_tail(command);
            if tail.is_empty() {
                return CommandValidation::allow(entry);
            }
            if allowed_args.is_empty() {
                return CommandValidation::deny_matched(
                    format!("'{}' does not permit any arguments", entry.pattern.describe()),
                    entry,
                );
            }
            if allowed_args.iter().any(|pattern| pattern.matches_args(tail)) {
                return CommandValidation::allow(entry);
            }
            return CommandValidation::deny_matched(
                format!(
                    "arguments '{tail}' are not permitted for '{}'",
                    entry.pattern.describe()
                ),
                entry,
            );
        }

        let base = command.split_whitespace().next().unwrap_or(command);
        CommandValidation::deny(format!("command '{base}' is not in the allowlist"))
    }
}

impl Default for CommandAllowlist {
    fn default() -> Self {
        Self::default_policy()
    }
}

fn compile_entry(config: &AllowlistEntryConfig) -> Option<AllowlistEntry> {
    let pattern = if config.regex {
        match CommandPattern::regex(&config.pattern) {
            Ok(pattern) => pattern,
            Err(error) => {
                warn!(
                    target: "agentbox.safety",
                    %error,
                    pattern = %config.pattern,
                    "ignoring allowlist entry with invalid regex"
                );
                return None;
            }
        }
    } else {
        CommandPattern::literal(config.pattern.clone())
    };

    let allowed_args = match &config.allowed_args {
        None => None,
        Some(args) => Some(
            args.iter()
                .filter_map(|arg| {
                    if arg.regex {
                        match CommandPattern::regex(&arg.pattern) {
                            Ok(pattern) => Some(pattern),
                            Err(error) => {
                                warn!(
                                    target: "agentbox.safety",
                                    %error,
                                    pattern = %arg.pattern,
                                    "ignoring argument pattern with invalid regex"
                                );
                                None
                            }
                        }
                    } else {
                        Some(CommandPattern::literal(arg.pattern.clone()))
                    }
                })
                .collect(),
        ),
    };

    Some(AllowlistEntry {
        pattern,
        description: config.description.clone(),
        allowed_args,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn npm_only() -> CommandAllowlist {
        CommandAllowlist::new(vec![AllowlistEntry::new(
            CommandPattern::literal("npm"),
            "node package manager",
        )])
    }

    #[test]
    fn literal_matches_exact_and_prefix_with_space() {
        let allowlist = npm_only();
        assert!(allowlist.validate("npm").allowed);
        assert!(allowlist.validate("npm run build").allowed);
    }

    #[test]
    fn literal_prefix_does_not_match_longer_word() {
        let allowlist = npm_only();
        let result = allowlist.validate("npmx install");
        assert!(!result.allowed);
        assert!(result.reason.unwrap().contains("npmx"));
    }

    #[test]
    fn empty_command_is_denied() {
        let allowlist = npm_only();
        assert!(!allowlist.validate("").allowed);
        assert!(!allowlist.validate("   ").allowed);
    }

    #[test]
    fn no_match_names_the_command() {
        let allowlist = npm_only();
        let result = allowlist.validate("shutdown now");
        assert!(!result.allowed);
        assert_eq!(
            result.reason.as_deref(),
            Some("command 'shutdown' is not in the allowlist")
        );
    }

    #[test]
    fn first_matching_entry_wins() {
        let allowlist = CommandAllowlist::new(vec![
            AllowlistEntry::new(CommandPattern::literal("git"), "first").with_args(vec![]),
            AllowlistEntry::new(CommandPattern::literal("git"), "second"),
        ]);
        // The first entry forbids arguments and is not superseded by the
        // permissive entry behind it.
        let result = allowlist.validate("git push");
        assert!(!result.allowed);
        assert_eq!(result.matched.as_deref(), Some("first"));
    }

    #[test]
    fn empty_allowed_args_permits_only_bare_command() {
        let allowlist = CommandAllowlist::new(vec![
            AllowlistEntry::new(CommandPattern::literal("pwd"), "print cwd").with_args(vec![]),
        ]);
        assert!(allowlist.validate("pwd").allowed);
        assert!(!allowlist.validate("pwd -L").allowed);
    }

    #[test]
    fn argument_constraints_apply_pattern_rules() {
        let allowlist = CommandAllowlist::new(vec![
            AllowlistEntry::new(CommandPattern::literal("git"), "scoped git").with_args(vec![
                CommandPattern::literal("status"),
                CommandPattern::regex(r"^log( --oneline)?$").unwrap(),
            ]),
        ]);
        assert!(allowlist.validate("git status").allowed);
        assert!(allowlist.validate("git log --oneline").allowed);
        assert!(!allowlist.validate("git push origin main").allowed);
    }

    #[test]
    fn regex_entry_matches_whole_command() {
        let allowlist = CommandAllowlist::default_policy();
        assert!(allowlist.validate("git status --short").allowed);
        assert!(allowlist.validate("docker ps -a").allowed);
        assert!(!allowlist.validate("docker run alpine").allowed);
    }

    #[test]
    fn default_policy_scopes_curl_to_urls() {
        let allowlist = CommandAllowlist::default_policy();
        assert!(allowlist.validate("curl https://example.com/api").allowed);
        assert!(!allowlist.validate("curl file:///etc/passwd").allowed);
    }

    #[test]
    fn load_from_config_replaces_entries() {
        let mut allowlist = npm_only();
        let config: CommandsConfig = toml::from_str(
            r#"
            [[allow]]
            pattern = "cargo"
            description = "rust toolchain"
            "#,
        )
        .unwrap();
        allowlist.load_from_config(&config);
        assert!(allowlist.validate("cargo test").allowed);
        assert!(!allowlist.validate("npm run build").allowed);
    }
}
