use std::path::{Component, Path, PathBuf};

use tracing::warn;

/// Outcome of validating a requested path against the workspace root.
///
/// Security denials are data, not errors: callers surface the reason to the
/// agent instead of crashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathValidation {
    /// The path is inside the workspace. `resolved` is absolute,
    /// normalized, and symlink-resolved (for the async variant).
    Valid { resolved: PathBuf },
    /// The path was rejected; `reason` is suitable for showing to the agent.
    Invalid { reason: String },
}

impl PathValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, PathValidation::Valid { .. })
    }

    /// Returns the resolved path, or `None` when invalid.
    pub fn resolved(&self) -> Option<&Path> {
        match self {
            PathValidation::Valid { resolved } => Some(resolved),
            PathValidation::Invalid { .. } => None,
        }
    }
}

/// Normalize a path by resolving `.` and `..` components lexically.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Validates requested paths against one workspace root.
///
/// The root is canonicalized once at bind time and never changes for the
/// lifetime of the validator.
#[derive(Debug, Clone)]
pub struct WorkspacePathValidator {
    root: PathBuf,
}

impl WorkspacePathValidator {
    /// Binds a validator to `workspace_root`, following symlinks to the real
    /// root directory. Falls back to the provided path when canonicalization
    /// fails (e.g. the directory is being created concurrently).
    pub fn bind(workspace_root: &Path) -> Self {
        let root = std::fs::canonicalize(workspace_root).unwrap_or_else(|error| {
            warn!(
                target: "agentbox.workspace",
                path = %workspace_root.display(),
                %error,
                "failed to canonicalize workspace root; falling back to provided path"
            );
            workspace_root.to_path_buf()
        });
        Self { root }
    }

    /// The canonical workspace root this validator is bound to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validates `requested` against the workspace root, following symlinks.
    ///
    /// When the candidate does not exist yet, its nearest existing ancestor
    /// is canonicalized and the remainder re-appended, so a symlinked parent
    /// directory cannot be used to escape once a file is created there.
    pub async fn validate(&self, requested: &str) -> PathValidation {
        let candidate = match self.screen(requested) {
            Ok(candidate) => candidate,
            Err(reason) => return PathValidation::Invalid { reason },
        };

        let normalized = normalize_path(&candidate);
        if !self.is_within_root(&normalized) {
            return self.outside_workspace(requested);
        }

        let resolved = match self.canonicalize_allow_missing(&normalized).await {
            Ok(resolved) => resolved,
            Err(error) => {
                return PathValidation::Invalid {
                    reason: format!("failed to resolve '{requested}': {error}"),
                };
            }
        };
        if !self.is_within_root(&resolved) {
            return self.outside_workspace(requested);
        }

        PathValidation::Valid { resolved }
    }

    /// Weaker synchronous variant: lexical normalization only, no symlink
    /// resolution. Safe only for already-validated or low-risk callers; a
    /// symlink inside the workspace pointing outside it will not be caught.
    pub fn validate_sync(&self, requested: &str) -> PathValidation {
        let candidate = match self.screen(requested) {
            Ok(candidate) => candidate,
            Err(reason) => return PathValidation::Invalid { reason },
        };

        let normalized = normalize_path(&candidate);
        if !self.is_within_root(&normalized) {
            return self.outside_workspace(requested);
        }
        PathValidation::Valid {
            resolved: normalized,
        }
    }

    /// Renders `path` relative to the workspace root for display, with `.`
    /// standing in for the root itself.
    pub fn display_relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => ".".into(),
            Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }

    /// Cheap lexical screening applied before any filesystem access.
    fn screen(&self, requested: &str) -> Result<PathBuf, String> {
        if requested.trim().is_empty() {
            return Err("path is empty".to_string());
        }
        if requested.contains('\0') {
            return Err("path contains a NUL byte".to_string());
        }
        // No shell runs at this stage, but a leading tilde would expand to
        // the user's home if the path ever reached one.
        if requested.starts_with('~') {
            return Err("path must not start with '~'".to_string());
        }

        let requested = Path::new(requested);
        Ok(if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.root.join(requested)
        })
    }

    /// Boundary invariant: the path is the root itself or a strict
    /// descendant. `Path::starts_with` compares whole components, so
    /// `/ws/projectile` does not match a root of `/ws/project`.
    fn is_within_root(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    fn outside_workspace(&self, requested: &str) -> PathValidation {
        PathValidation::Invalid {
            reason: format!("path '{requested}' resolves outside the workspace"),
        }
    }

    async fn canonicalize_allow_missing(&self, normalized: &Path) -> std::io::Result<PathBuf> {
        if tokio::fs::try_exists(normalized).await? {
            return tokio::fs::canonicalize(normalized).await;
        }

        let mut current = normalized.to_path_buf();
        while let Some(parent) = current.parent() {
            if tokio::fs::try_exists(parent).await? {
                let canonical_parent = tokio::fs::canonicalize(parent).await?;
                let remainder = normalized
                    .strip_prefix(parent)
                    .unwrap_or_else(|_| Path::new(""));
                return Ok(if remainder.as_os_str().is_empty() {
                    canonical_parent
                } else {
                    canonical_parent.join(remainder)
                });
            }
            current = parent.to_path_buf();
        }

        Ok(normalized.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, WorkspacePathValidator) {
        let dir = tempfile::tempdir().unwrap();
        let validator = WorkspacePathValidator::bind(dir.path());
        (dir, validator)
    }

    #[test]
    fn normalize_collapses_dot_segments() {
        assert_eq!(
            normalize_path(Path::new("/ws/a/../b/./c")),
            PathBuf::from("/ws/b/c")
        );
    }

    #[tokio::test]
    async fn rejects_empty_and_nul_and_tilde() {
        let (_dir, validator) = workspace();
        for requested in ["", "   ", "a\0b", "~/x", "~root/x"] {
            let result = validator.validate(requested).await;
            assert!(!result.is_valid(), "expected rejection for {requested:?}");
        }
    }

    #[tokio::test]
    async fn rejects_parent_traversal() {
        let (_dir, validator) = workspace();
        let result = validator.validate("../outside").await;
        match result {
            PathValidation::Invalid { reason } => {
                assert!(reason.contains("outside the workspace"), "{reason}");
            }
            PathValidation::Valid { resolved } => panic!("escaped to {}", resolved.display()),
        }
    }

    #[tokio::test]
    async fn rejects_absolute_path_outside_root() {
        let (_dir, validator) = workspace();
        let result = validator.validate("/etc/passwd").await;
        assert!(!result.is_valid());
    }

    #[tokio::test]
    async fn accepts_net_inside_traversal() {
        let (dir, validator) = workspace();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        let result = validator.validate("a/../b").await;
        let resolved = result.resolved().expect("a/../b stays inside the root");
        assert_eq!(resolved, validator.root().join("b"));
    }

    #[tokio::test]
    async fn accepts_missing_path_under_existing_parent() {
        let (_dir, validator) = workspace();
        let result = validator.validate("sub/dir/new-file.txt").await;
        let resolved = result.resolved().expect("missing paths are allowed");
        assert!(resolved.starts_with(validator.root()));
        assert!(resolved.ends_with("sub/dir/new-file.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejects_symlink_escaping_root() {
        let (dir, validator) = workspace();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let direct = validator.validate("link").await;
        assert!(!direct.is_valid(), "symlink target is outside the root");

        // A file that does not exist yet under the symlinked dir must also be
        // rejected: its real parent is outside the root.
        let nested = validator.validate("link/escape.txt").await;
        assert!(!nested.is_valid());
    }

    #[tokio::test]
    async fn sibling_prefix_does_not_match_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        std::fs::create_dir(&root).unwrap();
        std::fs::create_dir(dir.path().join("projectile")).unwrap();
        let validator = WorkspacePathValidator::bind(&root);

        let sibling = dir.path().join("projectile");
        let result = validator.validate(sibling.to_str().unwrap()).await;
        assert!(!result.is_valid(), "/ws/projectile must not match /ws/project");
    }

    #[test]
    fn sync_variant_catches_lexical_escapes() {
        let (_dir, validator) = workspace();
        assert!(!validator.validate_sync("../x").is_valid());
        assert!(validator.validate_sync("a/b").is_valid());
    }

    #[test]
    fn display_relative_uses_dot_for_root() {
        let (_dir, validator) = workspace();
        let root = validator.root().to_path_buf();
        assert_eq!(validator.display_relative(&root), ".");
        assert_eq!(validator.display_relative(&root.join("src/lib.rs")), "src/lib.rs");
    }
}
