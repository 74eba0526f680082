//! Python execution path.
//!
//! User source runs in a child interpreter, never on a serving thread.
//! The embedded runner shim restores the workspace's persistent bindings,
//! installs plot/image save hooks, executes the source, and writes a JSON
//! result document plus the updated bindings snapshot.
//!
//! # Single Binary Distribution
//!
//! The shim is embedded at compile time and materialized to
//! `~/.crucible/shim/{version}/runner_shim.py` on first use. Version
//! changes create a fresh directory so stale shims are never reused.

use crate::cancel::CancellationToken;
use crate::context::WorkspaceContext;
use crate::supervise::{run_with_deadline, ChildOutcome};
use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use crucible_protocol::{ErrorKind, ExecutionResult};
use crucible_security::apply_limits;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Embedded Python runner shim source code.
const RUNNER_SHIM_SOURCE: &str = include_str!("shim/runner_shim.py");

/// Crate version for shim cache path versioning.
const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result document written by the shim.
#[derive(Debug, Deserialize)]
struct ShimResult {
    success: bool,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    error: Option<String>,
    error_type: Option<String>,
}

/// Execute Python source inside the workspace's binding scope.
pub fn run(
    context: &WorkspaceContext,
    source: &str,
    deadline: Duration,
    token: &CancellationToken,
) -> ExecutionResult {
    let interpreter = match find_interpreter() {
        Some(path) => path,
        None => {
            return ExecutionResult::failed(
                ErrorKind::NotInstalled,
                "No Python interpreter found (checked VIRTUAL_ENV, python3, python)",
                0,
            );
        }
    };

    let shim_path = match materialize_runner_shim() {
        Ok(path) => path,
        Err(e) => {
            return ExecutionResult::failed(
                ErrorKind::Internal,
                format!("Failed to materialize runner shim: {e:#}"),
                0,
            );
        }
    };

    let result_path = context
        .artifacts_dir
        .join(format!(".result_{}.json", uuid::Uuid::new_v4().simple()));

    let mut cmd = Command::new(&interpreter);
    cmd.arg(&shim_path)
        .current_dir(context.working_dir())
        .env(
            "CRUCIBLE_CODE",
            general_purpose::STANDARD.encode(source.as_bytes()),
        )
        .env("CRUCIBLE_BINDINGS_PATH", context.bindings_path())
        .env("CRUCIBLE_RESULT_PATH", &result_path)
        .env("CRUCIBLE_ARTIFACTS_DIR", &context.artifacts_dir);
    for (key, value) in &context.environment {
        cmd.env(key, value);
    }
    apply_limits(&mut cmd, &context.resource_limits);

    debug!(
        "running python in workspace {} via {}",
        context.workspace_id,
        interpreter.display()
    );

    let outcome = match run_with_deadline(&mut cmd, deadline, token) {
        Ok(outcome) => outcome,
        Err(e) => {
            let _ = std::fs::remove_file(&result_path);
            return ExecutionResult::failed(
                ErrorKind::Internal,
                format!("Failed to run interpreter: {e:#}"),
                0,
            );
        }
    };

    let duration_ms = outcome.elapsed.as_millis() as u64;

    if outcome.timed_out || outcome.cancelled {
        let _ = std::fs::remove_file(&result_path);
        return timeout_result(&outcome, deadline, duration_ms);
    }

    let shim_result = read_shim_result(&result_path);
    let _ = std::fs::remove_file(&result_path);

    match shim_result {
        Some(shim) => {
            if shim.success {
                let mut result = ExecutionResult::ok(shim.stdout, duration_ms);
                if !shim.stderr.is_empty() {
                    result = result.with_metadata(
                        "stderr",
                        serde_json::Value::String(shim.stderr),
                    );
                }
                result
            } else {
                let mut result = ExecutionResult::failed(
                    ErrorKind::RuntimeFailure,
                    shim.error.unwrap_or_else(|| "execution failed".to_string()),
                    duration_ms,
                );
                result.output = shim.stdout;
                if let Some(error_type) = shim.error_type {
                    result = result.with_metadata(
                        "exception_type",
                        serde_json::Value::String(error_type),
                    );
                }
                if !shim.stderr.is_empty() {
                    result = result.with_metadata(
                        "stderr",
                        serde_json::Value::String(shim.stderr),
                    );
                }
                result
            }
        }
        None => {
            // The interpreter died before the shim could report; surface
            // whatever stderr it produced.
            warn!(
                "python child for workspace {} produced no result document",
                context.workspace_id
            );
            ExecutionResult::failed(
                ErrorKind::RuntimeFailure,
                if outcome.stderr.is_empty() {
                    format!(
                        "Interpreter exited with {:?} without reporting a result",
                        outcome.exit_code()
                    )
                } else {
                    outcome.stderr.clone()
                },
                duration_ms,
            )
        }
    }
}

fn timeout_result(
    outcome: &ChildOutcome,
    deadline: Duration,
    duration_ms: u64,
) -> ExecutionResult {
    let message = if outcome.cancelled {
        "Execution cancelled".to_string()
    } else {
        format!("Execution timed out after {} seconds", deadline.as_secs())
    };
    ExecutionResult::failed(ErrorKind::Timeout, message, duration_ms)
}

fn read_shim_result(path: &Path) -> Option<ShimResult> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(result) => Some(result),
        Err(e) => {
            warn!("Unparseable shim result at {}: {}", path.display(), e);
            None
        }
    }
}

/// Locate a Python interpreter.
///
/// Prefers a vendored virtualenv (`VIRTUAL_ENV`), then `python3`, then
/// `python` on PATH.
pub fn find_interpreter() -> Option<PathBuf> {
    if let Ok(venv) = std::env::var("VIRTUAL_ENV") {
        let candidate = if cfg!(windows) {
            PathBuf::from(&venv).join("Scripts").join("python.exe")
        } else {
            PathBuf::from(&venv).join("bin").join("python")
        };
        if candidate.exists() {
            return Some(candidate);
        }
    }

    which::which("python3")
        .or_else(|_| which::which("python"))
        .ok()
}

/// Materialize the embedded runner shim to the filesystem.
///
/// Idempotent: if the cached file exists and matches, it is reused.
pub fn materialize_runner_shim() -> Result<PathBuf> {
    let shim_dir = crucible_protocol::paths::shim_cache_dir().join(CRATE_VERSION);
    let shim_path = shim_dir.join("runner_shim.py");

    if shim_path.exists() {
        if let Ok(existing) = std::fs::read_to_string(&shim_path) {
            if existing == RUNNER_SHIM_SOURCE {
                debug!("Using cached runner shim: {}", shim_path.display());
                return Ok(shim_path);
            }
        }
    }

    std::fs::create_dir_all(&shim_dir)
        .with_context(|| format!("Failed to create shim directory: {}", shim_dir.display()))?;

    let unique_id = format!(
        "{}.{:?}",
        std::process::id(),
        std::thread::current().id()
    );
    let temp_path = shim_dir.join(format!(".runner_shim.{}.tmp", unique_id));

    let mut file = std::fs::File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
    file.write_all(RUNNER_SHIM_SOURCE.as_bytes())
        .with_context(|| format!("Failed to write shim to: {}", temp_path.display()))?;
    file.sync_all().context("Failed to sync shim to disk")?;
    drop(file);

    match std::fs::rename(&temp_path, &shim_path) {
        Ok(()) => {
            info!(
                "Materialized runner shim v{}: {}",
                CRATE_VERSION,
                shim_path.display()
            );
        }
        Err(e) => {
            let _ = std::fs::remove_file(&temp_path);
            if !shim_path.exists() {
                return Err(e).with_context(|| {
                    format!("Failed to rename temp shim to: {}", shim_path.display())
                });
            }
            debug!("Another process materialized the shim, using existing");
        }
    }

    Ok(shim_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_shim_not_empty() {
        assert!(!RUNNER_SHIM_SOURCE.is_empty());
        assert!(RUNNER_SHIM_SOURCE.contains("CRUCIBLE_CODE"));
        assert!(RUNNER_SHIM_SOURCE.contains("def main()"));
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let first = materialize_runner_shim().unwrap();
        let second = materialize_runner_shim().unwrap();
        assert_eq!(first, second);
        assert!(first.to_string_lossy().contains(CRATE_VERSION));
        assert_eq!(
            std::fs::read_to_string(&first).unwrap(),
            RUNNER_SHIM_SOURCE
        );
    }

    #[test]
    fn test_shim_result_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        std::fs::write(
            &path,
            r#"{"success": false, "stdout": "", "stderr": "boom", "error": "NameError: name 'x' is not defined", "error_type": "NameError"}"#,
        )
        .unwrap();

        let result = read_shim_result(&path).unwrap();
        assert!(!result.success);
        assert_eq!(result.error_type.as_deref(), Some("NameError"));
        assert!(read_shim_result(&dir.path().join("missing.json")).is_none());
    }
}
