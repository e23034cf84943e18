use std::path::Path;

use crate::config::constants::FALLBACK_SHELL;

/// Resolve the shell used to run session commands.
///
/// Prefers `$SHELL` when it points at an existing binary, then probes a
/// fixed candidate list starting with the default fallback.
pub fn resolve_shell() -> String {
    if let Ok(shell) = std::env::var("SHELL") {
        let trimmed = shell.trim();
        if !trimmed.is_empty() && Path::new(trimmed).exists() {
            return trimmed.to_string();
        }
    }

    const SHELL_CANDIDATES: &[&str] = &[
        FALLBACK_SHELL,
        "/usr/bin/bash",
        "/bin/zsh",
        "/usr/bin/zsh",
        "/bin/sh",
        "/usr/bin/sh",
    ];

    for shell_path in SHELL_CANDIDATES {
        if Path::new(shell_path).exists() {
            return (*shell_path).to_string();
        }
    }

    "/bin/sh".to_string()
}
