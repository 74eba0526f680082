//! The execution engine: security gate, context acquisition, deadline,
//! execution paths, artifact harvest, history.
//!
//! # Ordering
//!
//! Executions for the same workspace are serialized (the context mutex is
//! held across the call); executions for different workspaces run in
//! parallel. The engine never mutates the server's own environment or
//! working directory: all scoping happens on the child process.

use crate::animation::{self, RenderQuality};
use crate::cancel::CancellationToken;
use crate::context::{is_bindings_file, lock_context, ContextHandle, ContextManager};
use crate::history::{ExecutionStats, HistoryRing};
use crate::python;
use crate::recovery::{RecoveryOutcome, RecoveryRegistry, RecoveryStrategy};
use crate::shell;
use chrono::Utc;
use crucible_protocol::{
    ErrorKind, ExecutionRecord, ExecutionResult, Language, SecurityTier,
};
use crucible_security::{CommandFilter, InputKind, InputValidator, SecurityAuditor};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

/// Aggregate engine statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    #[serde(flatten)]
    pub executions: ExecutionStats,
    pub success_rate: f64,
    pub active_contexts: usize,
    pub history_size: usize,
}

/// Multi-workspace execution engine.
pub struct ExecutionEngine {
    contexts: ContextManager,
    filter: CommandFilter,
    validator: InputValidator,
    auditor: Mutex<SecurityAuditor>,
    history: Mutex<HistoryRing>,
    stats: Mutex<ExecutionStats>,
    recovery: Mutex<RecoveryRegistry>,
    /// Cancellation tokens of in-flight executions, keyed by workspace.
    active_cancels: Mutex<HashMap<String, CancellationToken>>,
}

impl ExecutionEngine {
    pub fn new(workspaces_root: PathBuf, default_tier: SecurityTier) -> Self {
        info!(
            "ExecutionEngine initialized (workspaces at {}, default tier {})",
            workspaces_root.display(),
            default_tier
        );
        Self {
            contexts: ContextManager::new(workspaces_root, default_tier),
            filter: CommandFilter::new(),
            validator: InputValidator::new(),
            auditor: Mutex::new(SecurityAuditor::new()),
            history: Mutex::new(HistoryRing::new()),
            stats: Mutex::new(ExecutionStats::default()),
            recovery: Mutex::new(RecoveryRegistry::new()),
            active_cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Execute Python source in the workspace's persistent binding scope.
    pub fn execute_python(
        &self,
        workspace_id: &str,
        source: &str,
        timeout_secs: Option<u64>,
    ) -> ExecutionResult {
        let execution_id = format!("py_{}", Uuid::new_v4().simple());

        if let Some(result) = self.gate_input(source, InputKind::Code) {
            return self.finish(execution_id, workspace_id, source, Language::Python, result);
        }
        if let Some(violation) = self.filter.check_python(source) {
            self.lock(&self.auditor).record(&violation);
            let result = ExecutionResult::failed(ErrorKind::Security, violation.message.clone(), 0)
                .with_metadata("remediation", json!(violation.remediation));
            return self.finish(execution_id, workspace_id, source, Language::Python, result);
        }

        let handle = match self.contexts.get_or_create(workspace_id) {
            Ok(handle) => handle,
            Err(e) => {
                let result = ExecutionResult::failed(ErrorKind::Internal, e.to_string(), 0);
                return self.finish(execution_id, workspace_id, source, Language::Python, result);
            }
        };

        let context = lock_context(&handle);
        let deadline =
            Duration::from_secs(timeout_secs.unwrap_or(context.resource_limits.cpu_seconds));
        let token = self.arm_cancel(workspace_id);

        let mut result = python::run(&context, source, deadline, &token);
        result.artifacts = harvest_artifacts(&context.artifacts_dir);

        self.disarm_cancel(workspace_id);
        drop(context);

        self.finish(execution_id, workspace_id, source, Language::Python, result)
    }

    /// Execute a shell command with cwd inside the workspace.
    pub fn execute_shell(
        &self,
        workspace_id: &str,
        command: &str,
        timeout_secs: Option<u64>,
    ) -> ExecutionResult {
        let execution_id = format!("sh_{}", Uuid::new_v4().simple());

        if let Some(result) = self.gate_input(command, InputKind::Command) {
            return self.finish(execution_id, workspace_id, command, Language::Shell, result);
        }

        let handle = match self.contexts.get_or_create(workspace_id) {
            Ok(handle) => handle,
            Err(e) => {
                let result = ExecutionResult::failed(ErrorKind::Internal, e.to_string(), 0);
                return self.finish(execution_id, workspace_id, command, Language::Shell, result);
            }
        };

        let context = lock_context(&handle);
        if let Some(violation) = self.filter.check_command(command, context.security_tier) {
            drop(context);
            self.lock(&self.auditor).record(&violation);
            let result = ExecutionResult::failed(
                ErrorKind::Security,
                format!("Command blocked: {}", violation.message),
                0,
            )
            .with_metadata("remediation", json!(violation.remediation));
            return self.finish(execution_id, workspace_id, command, Language::Shell, result);
        }

        let deadline =
            Duration::from_secs(timeout_secs.unwrap_or(context.resource_limits.cpu_seconds));
        let token = self.arm_cancel(workspace_id);

        let mut result = shell::run(&context, command, deadline, &token);
        result.artifacts = harvest_artifacts(&context.artifacts_dir);

        self.disarm_cancel(workspace_id);
        drop(context);

        self.finish(execution_id, workspace_id, command, Language::Shell, result)
    }

    /// Render an animation script.
    pub fn execute_animation(
        &self,
        workspace_id: &str,
        script: &str,
        quality: RenderQuality,
        scene_name: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> ExecutionResult {
        let execution_id = format!("anim_{}", Uuid::new_v4().simple());

        if let Some(result) = self.gate_input(script, InputKind::Code) {
            return self.finish(
                execution_id,
                workspace_id,
                script,
                Language::Animation,
                result,
            );
        }
        if let Some(violation) = self.filter.check_python(script) {
            self.lock(&self.auditor).record(&violation);
            let result = ExecutionResult::failed(ErrorKind::Security, violation.message.clone(), 0)
                .with_metadata("remediation", json!(violation.remediation));
            return self.finish(
                execution_id,
                workspace_id,
                script,
                Language::Animation,
                result,
            );
        }

        let handle = match self.contexts.get_or_create(workspace_id) {
            Ok(handle) => handle,
            Err(e) => {
                let result = ExecutionResult::failed(ErrorKind::Internal, e.to_string(), 0);
                return self.finish(
                    execution_id,
                    workspace_id,
                    script,
                    Language::Animation,
                    result,
                );
            }
        };

        let context = lock_context(&handle);
        let deadline =
            Duration::from_secs(timeout_secs.unwrap_or(context.resource_limits.cpu_seconds));
        let token = self.arm_cancel(workspace_id);

        let result = animation::run(&context, script, quality, scene_name, deadline, &token);

        self.disarm_cancel(workspace_id);
        drop(context);

        self.finish(
            execution_id,
            workspace_id,
            script,
            Language::Animation,
            result,
        )
    }

    /// Request cancellation of the workspace's in-flight execution.
    ///
    /// Returns `true` when an execution was actually running.
    pub fn cancel(&self, workspace_id: &str) -> bool {
        let cancels = self.lock(&self.active_cancels);
        match cancels.get(workspace_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Destroy a workspace context and its artifacts directory.
    pub fn cleanup_context(&self, workspace_id: &str) -> bool {
        match self.contexts.cleanup(workspace_id) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!("Failed to cleanup context {}: {}", workspace_id, e);
                false
            }
        }
    }

    /// Query the execution history, newest first.
    pub fn history(
        &self,
        workspace_id: Option<&str>,
        language: Option<Language>,
        limit: usize,
    ) -> Vec<ExecutionRecord> {
        self.lock(&self.history).query(workspace_id, language, limit)
    }

    /// Aggregate engine statistics.
    pub fn statistics(&self) -> EngineStats {
        let executions = self.lock(&self.stats).clone();
        let success_rate = executions.success_rate();
        EngineStats {
            executions,
            success_rate,
            active_contexts: self.contexts.active_count(),
            history_size: self.lock(&self.history).len(),
        }
    }

    /// Register a recovery strategy for an error kind.
    pub fn register_recovery(&self, kind: ErrorKind, strategy: RecoveryStrategy) {
        self.lock(&self.recovery).register(kind, strategy);
    }

    /// Apply the registered strategy for `kind` to a workspace, if any.
    pub fn attempt_recovery(&self, workspace_id: &str, kind: ErrorKind) -> Option<RecoveryOutcome> {
        let handle = self.contexts.get(workspace_id)?;
        self.lock(&self.recovery).attempt(kind, &handle)
    }

    /// Security violation summary for diagnostics.
    pub fn security_summary(&self) -> crucible_security::SecuritySummary {
        self.lock(&self.auditor).summary()
    }

    pub fn active_context_ids(&self) -> Vec<String> {
        self.contexts.active_ids()
    }

    /// Direct access to a context handle (tier/limit/env adjustments).
    pub fn context(&self, workspace_id: &str) -> Option<ContextHandle> {
        self.contexts.get(workspace_id)
    }

    fn gate_input(&self, input: &str, kind: InputKind) -> Option<ExecutionResult> {
        let reason = self.validator.validate(input, kind)?;
        Some(
            ExecutionResult::failed(
                ErrorKind::Security,
                format!("Input blocked: {}", reason),
                0,
            )
            .with_metadata("remediation", json!(
                "Ensure the input contains only safe content and is within length limits"
            )),
        )
    }

    fn arm_cancel(&self, workspace_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.lock(&self.active_cancels)
            .insert(workspace_id.to_string(), token.clone());
        token
    }

    fn disarm_cancel(&self, workspace_id: &str) {
        self.lock(&self.active_cancels).remove(workspace_id);
    }

    fn finish(
        &self,
        execution_id: String,
        workspace_id: &str,
        code: &str,
        language: Language,
        result: ExecutionResult,
    ) -> ExecutionResult {
        self.lock(&self.stats).record(language, result.success);
        debug!(
            "execution {} ({}) in {} finished: success={} in {}ms",
            execution_id, language, workspace_id, result.success, result.duration_ms
        );
        self.lock(&self.history).push(ExecutionRecord {
            execution_id,
            code: code.to_string(),
            language,
            workspace_id: workspace_id.to_string(),
            result: result.clone(),
            started_at: Utc::now(),
        });
        result
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Enumerate workspace files as relative paths, skipping the bindings
/// snapshot and dotfiles.
fn harvest_artifacts(artifacts_dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    for entry in WalkDir::new(artifacts_dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if is_bindings_file(path) {
            continue;
        }
        if path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(false)
        {
            continue;
        }
        if let Ok(relative) = path.strip_prefix(artifacts_dir) {
            found.push(relative.to_string_lossy().into_owned());
        }
    }
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (tempfile::TempDir, ExecutionEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = ExecutionEngine::new(
            dir.path().join("workspaces"),
            SecurityTier::Moderate,
        );
        (dir, engine)
    }

    #[test]
    fn test_security_block_spawns_nothing() {
        let (_dir, engine) = engine();
        let result = engine.execute_shell("ws1", "rm -rf /", None);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Security));
        assert!(result.error.as_deref().unwrap().contains("blocked"));
        assert!(result.metadata.contains_key("remediation"));
        // The gate fired before any child was spawned.
        assert_eq!(result.duration_ms, 0);
    }

    #[test]
    fn test_python_escape_blocked() {
        let (_dir, engine) = engine();
        let result = engine.execute_python("ws1", "import os\nos.system('id')", None);
        assert_eq!(result.error_kind, Some(ErrorKind::Security));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_execution_and_history() {
        let (_dir, engine) = engine();
        let result = engine.execute_shell("ws1", "echo hi > greeting.txt", Some(10));
        assert!(result.success);
        assert_eq!(result.artifacts, vec!["greeting.txt".to_string()]);

        let history = engine.history(Some("ws1"), Some(Language::Shell), 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].code, "echo hi > greeting.txt");

        let stats = engine.statistics();
        assert_eq!(stats.executions.total_executions, 1);
        assert_eq!(stats.active_contexts, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_cleanup_context_removes_workspace() {
        let (_dir, engine) = engine();
        engine.execute_shell("ws1", "echo x > f.txt", Some(10));
        let artifacts_dir = {
            let handle = engine.context("ws1").unwrap();
            let dir = lock_context(&handle).artifacts_dir.clone();
            dir
        };
        assert!(artifacts_dir.exists());

        assert!(engine.cleanup_context("ws1"));
        assert!(!artifacts_dir.exists());
        assert!(!engine.cleanup_context("ws1"));
    }

    #[test]
    fn test_cancel_without_execution() {
        let (_dir, engine) = engine();
        assert!(!engine.cancel("ws1"));
    }

    #[test]
    fn test_harvest_skips_bindings_and_dotfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bindings.json"), b"{}").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"x").unwrap();
        std::fs::write(dir.path().join("plot.png"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/out.csv"), b"x").unwrap();

        let found = harvest_artifacts(dir.path());
        assert_eq!(
            found,
            vec!["plot.png".to_string(), "sub/out.csv".to_string()]
        );
    }

    #[test]
    fn test_animation_without_renderer() {
        // The renderer is rarely installed in CI; when missing, the result
        // must classify as NotInstalled before any child is spawned.
        if animation::find_renderer().is_some() {
            return;
        }
        let (_dir, engine) = engine();
        let result = engine.execute_animation(
            "ws1",
            "class Scene:\n    pass\n",
            RenderQuality::Low,
            None,
            None,
        );
        assert_eq!(result.error_kind, Some(ErrorKind::NotInstalled));
    }
}
