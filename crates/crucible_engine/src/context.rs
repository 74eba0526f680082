//! Workspace execution contexts.
//!
//! A workspace is a long-lived named sandbox: its own artifacts directory,
//! environment, limits, and (for the Python path) a persistent-bindings
//! snapshot file. Contexts are created on first use and live until
//! explicit cleanup.
//!
//! Execution calls for the same workspace are serialized by locking the
//! context for the duration of the call; different workspaces run in
//! parallel.

use crucible_protocol::{ResourceLimits, SecurityTier};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

/// Name of the persistent-bindings snapshot inside a context directory.
pub const BINDINGS_FILE: &str = "bindings.json";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Failed to create workspace directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove workspace directory {path}: {source}")]
    RemoveDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Materialized state of one workspace.
#[derive(Debug)]
pub struct WorkspaceContext {
    pub workspace_id: String,
    /// Directory where the workspace's files live; exists and is writable
    /// for the lifetime of the context.
    pub artifacts_dir: PathBuf,
    /// Extra environment merged into the inherited env at spawn time.
    pub environment: HashMap<String, String>,
    pub resource_limits: ResourceLimits,
    pub security_tier: SecurityTier,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkspaceContext {
    /// Path of the bindings snapshot for the Python path.
    pub fn bindings_path(&self) -> PathBuf {
        self.artifacts_dir.join(BINDINGS_FILE)
    }

    /// Drop all persistent bindings for this workspace.
    pub fn clear_bindings(&self) {
        let _ = std::fs::remove_file(self.bindings_path());
    }

    /// Effective working directory for executions: the `WORKSPACE_PATH`
    /// environment override when present and valid, else the artifacts dir.
    pub fn working_dir(&self) -> PathBuf {
        if let Some(override_path) = self.environment.get("WORKSPACE_PATH") {
            let path = PathBuf::from(override_path);
            if path.is_dir() {
                return path;
            }
        }
        self.artifacts_dir.clone()
    }
}

/// Shared handle to a context; the inner mutex serializes executions.
pub type ContextHandle = Arc<Mutex<WorkspaceContext>>;

/// Registry of live contexts, keyed by workspace id.
pub struct ContextManager {
    workspaces_root: PathBuf,
    default_tier: SecurityTier,
    contexts: Mutex<HashMap<String, ContextHandle>>,
}

impl ContextManager {
    pub fn new(workspaces_root: PathBuf, default_tier: SecurityTier) -> Self {
        Self {
            workspaces_root,
            default_tier,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the context for a workspace, creating it (and its directory)
    /// on first use.
    pub fn get_or_create(&self, workspace_id: &str) -> Result<ContextHandle, ContextError> {
        let mut contexts = self.lock_contexts();
        if let Some(handle) = contexts.get(workspace_id) {
            return Ok(Arc::clone(handle));
        }

        let artifacts_dir = self.workspaces_root.join(sanitize_id(workspace_id));
        std::fs::create_dir_all(&artifacts_dir).map_err(|e| ContextError::CreateDir {
            path: artifacts_dir.display().to_string(),
            source: e,
        })?;

        info!(
            "Created execution context for workspace {} at {}",
            workspace_id,
            artifacts_dir.display()
        );

        let context = WorkspaceContext {
            workspace_id: workspace_id.to_string(),
            artifacts_dir,
            environment: HashMap::new(),
            resource_limits: ResourceLimits::for_tier(self.default_tier),
            security_tier: self.default_tier,
            user_id: None,
            created_at: Utc::now(),
        };
        let handle: ContextHandle = Arc::new(Mutex::new(context));
        contexts.insert(workspace_id.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Look up an existing context without creating one.
    pub fn get(&self, workspace_id: &str) -> Option<ContextHandle> {
        self.lock_contexts().get(workspace_id).cloned()
    }

    /// Destroy a context: forget it and delete its directory.
    ///
    /// Returns `false` when the workspace was never created.
    pub fn cleanup(&self, workspace_id: &str) -> Result<bool, ContextError> {
        let handle = match self.lock_contexts().remove(workspace_id) {
            Some(handle) => handle,
            None => return Ok(false),
        };

        // Wait out any in-flight execution before deleting the directory.
        let context = lock_context(&handle);
        if context.artifacts_dir.exists() {
            std::fs::remove_dir_all(&context.artifacts_dir).map_err(|e| {
                ContextError::RemoveDir {
                    path: context.artifacts_dir.display().to_string(),
                    source: e,
                }
            })?;
        }
        debug!("Cleaned up context: {}", workspace_id);
        Ok(true)
    }

    /// Ids of all live contexts.
    pub fn active_ids(&self) -> Vec<String> {
        self.lock_contexts().keys().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.lock_contexts().len()
    }

    fn lock_contexts(&self) -> MutexGuard<'_, HashMap<String, ContextHandle>> {
        self.contexts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Lock a context handle, recovering from poisoning.
pub fn lock_context(handle: &ContextHandle) -> MutexGuard<'_, WorkspaceContext> {
    handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Helper used by tests and the engine: does this path belong to the
/// bindings snapshot?
pub fn is_bindings_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n == BINDINGS_FILE)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, ContextManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = ContextManager::new(dir.path().join("workspaces"), SecurityTier::Moderate);
        (dir, manager)
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let (_dir, manager) = manager();
        let a = manager.get_or_create("ws1").unwrap();
        let b = manager.get_or_create("ws1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.active_count(), 1);

        let context = lock_context(&a);
        assert!(context.artifacts_dir.exists());
        assert_eq!(context.security_tier, SecurityTier::Moderate);
    }

    #[test]
    fn test_contexts_are_isolated() {
        let (_dir, manager) = manager();
        let a = manager.get_or_create("ws1").unwrap();
        let b = manager.get_or_create("ws2").unwrap();
        let a = lock_context(&a);
        let b = lock_context(&b);
        assert_ne!(a.artifacts_dir, b.artifacts_dir);
        assert_ne!(a.bindings_path(), b.bindings_path());
    }

    #[test]
    fn test_cleanup_removes_directory() {
        let (_dir, manager) = manager();
        let handle = manager.get_or_create("ws1").unwrap();
        let artifacts_dir = lock_context(&handle).artifacts_dir.clone();
        std::fs::write(artifacts_dir.join("out.txt"), b"x").unwrap();
        drop(handle);

        assert!(manager.cleanup("ws1").unwrap());
        assert!(!artifacts_dir.exists());
        assert_eq!(manager.active_count(), 0);

        // Second cleanup is a no-op.
        assert!(!manager.cleanup("ws1").unwrap());
    }

    #[test]
    fn test_working_dir_override() {
        let (dir, manager) = manager();
        let handle = manager.get_or_create("ws1").unwrap();
        let mut context = lock_context(&handle);

        assert_eq!(context.working_dir(), context.artifacts_dir);

        let override_dir = dir.path().join("elsewhere");
        std::fs::create_dir_all(&override_dir).unwrap();
        context.environment.insert(
            "WORKSPACE_PATH".to_string(),
            override_dir.display().to_string(),
        );
        assert_eq!(context.working_dir(), override_dir);

        // A dangling override falls back to the artifacts dir.
        context
            .environment
            .insert("WORKSPACE_PATH".to_string(), "/no/such/dir".to_string());
        assert_eq!(context.working_dir(), context.artifacts_dir);
    }
}
