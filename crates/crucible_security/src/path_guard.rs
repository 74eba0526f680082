//! Path Guard - Validates File Paths
//!
//! Prevents path traversal attacks and symlink escapes by validating
//! all paths against configured allowed roots.
//!
//! # Security Model
//!
//! - All paths are canonicalized before validation
//! - ".." components are explicitly denied
//! - Symlinks are followed and validated
//! - Roots that fail to canonicalize at construction are dropped

use crate::SecurityError;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Allowlist of filesystem roots for file-ingesting operations.
#[derive(Debug, Clone)]
pub struct PathGuard {
    /// Canonicalized allowed root paths
    roots: Vec<PathBuf>,
}

impl PathGuard {
    /// Create a new guard with the given roots.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let roots = roots
            .into_iter()
            .filter_map(|p| match p.canonicalize() {
                Ok(canonical) => Some(canonical),
                Err(e) => {
                    warn!("Failed to canonicalize allowed path {:?}: {}", p, e);
                    None
                }
            })
            .collect();

        Self { roots }
    }

    /// Guard rooted at the current working directory only.
    pub fn cwd_only() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(vec![cwd])
    }

    /// Add a root to the allowlist.
    pub fn add_root(&mut self, root: PathBuf) -> Result<(), SecurityError> {
        let canonical = root
            .canonicalize()
            .map_err(|e| SecurityError::PathNotAllowed {
                path: format!("{}: {}", root.display(), e),
            })?;
        self.roots.push(canonical);
        Ok(())
    }

    fn contains_traversal(path: &Path) -> bool {
        path.components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    }

    /// Validate a path is within allowed roots.
    ///
    /// Returns the canonicalized path if valid.
    pub fn validate(&self, path: &Path) -> Result<PathBuf, SecurityError> {
        if Self::contains_traversal(path) {
            return Err(SecurityError::PathTraversal {
                path: path.display().to_string(),
            });
        }

        let canonical = path
            .canonicalize()
            .map_err(|_| SecurityError::PathNotAllowed {
                path: path.display().to_string(),
            })?;

        for root in &self.roots {
            if canonical.starts_with(root) {
                return Ok(canonical);
            }
        }

        Err(SecurityError::PathNotAllowed {
            path: path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_paths_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.txt");
        std::fs::write(&file, b"x").unwrap();

        let guard = PathGuard::new(vec![dir.path().to_path_buf()]);
        assert!(guard.validate(&file).is_ok());
    }

    #[test]
    fn test_denies_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let guard = PathGuard::new(vec![dir.path().to_path_buf()]);
        let sneaky = dir.path().join("..").join("other");
        assert!(matches!(
            guard.validate(&sneaky),
            Err(SecurityError::PathTraversal { .. })
        ));
    }

    #[test]
    fn test_denies_outside_root() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let file = other.path().join("secret.txt");
        std::fs::write(&file, b"x").unwrap();

        let guard = PathGuard::new(vec![root.path().to_path_buf()]);
        assert!(matches!(
            guard.validate(&file),
            Err(SecurityError::PathNotAllowed { .. })
        ));
    }
}
