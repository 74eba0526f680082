//! Shell execution path.
//!
//! Commands run through `sh -c` in a child process with the workspace's
//! merged environment, cwd set to the artifacts dir, rlimits applied, and
//! the wallclock deadline enforced by the supervisor.

use crate::cancel::CancellationToken;
use crate::context::WorkspaceContext;
use crate::supervise::run_with_deadline;
use crucible_protocol::{ErrorKind, ExecutionResult};
use crucible_security::apply_limits;
use serde_json::json;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

pub fn run(
    context: &WorkspaceContext,
    command: &str,
    deadline: Duration,
    token: &CancellationToken,
) -> ExecutionResult {
    let working_dir = context.working_dir();

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };
    cmd.current_dir(&working_dir);
    for (key, value) in &context.environment {
        cmd.env(key, value);
    }
    apply_limits(&mut cmd, &context.resource_limits);

    debug!(
        "running shell command in workspace {} (cwd {})",
        context.workspace_id,
        working_dir.display()
    );

    let outcome = match run_with_deadline(&mut cmd, deadline, token) {
        Ok(outcome) => outcome,
        Err(e) => {
            return ExecutionResult::failed(
                ErrorKind::Internal,
                format!("Failed to spawn shell: {e:#}"),
                0,
            );
        }
    };

    let duration_ms = outcome.elapsed.as_millis() as u64;

    if outcome.timed_out || outcome.cancelled {
        let message = if outcome.cancelled {
            "Execution cancelled".to_string()
        } else {
            format!("Command timed out after {} seconds", deadline.as_secs())
        };
        return ExecutionResult::failed(ErrorKind::Timeout, message, duration_ms)
            .with_metadata("command", json!(command));
    }

    let return_code = outcome.exit_code().unwrap_or(-1);
    if return_code == 0 {
        ExecutionResult::ok(outcome.stdout, duration_ms)
            .with_metadata("return_code", json!(0))
            .with_metadata("working_directory", json!(working_dir.display().to_string()))
    } else {
        let mut result = ExecutionResult::failed(
            ErrorKind::CommandError,
            if outcome.stderr.is_empty() {
                format!("Command exited with status {}", return_code)
            } else {
                outcome.stderr.clone()
            },
            duration_ms,
        );
        result.output = outcome.stdout;
        result
            .with_metadata("return_code", json!(return_code))
            .with_metadata("working_directory", json!(working_dir.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_protocol::{ResourceLimits, SecurityTier};
    use std::collections::HashMap;

    fn context(dir: &std::path::Path) -> WorkspaceContext {
        WorkspaceContext {
            workspace_id: "ws-test".to_string(),
            artifacts_dir: dir.to_path_buf(),
            environment: HashMap::new(),
            resource_limits: ResourceLimits::for_tier(SecurityTier::Moderate),
            security_tier: SecurityTier::Moderate,
            user_id: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_command() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let result = run(
            &ctx,
            "echo hello",
            Duration::from_secs(5),
            &CancellationToken::new(),
        );
        assert!(result.success);
        assert_eq!(result.output, "hello\n");
        assert_eq!(result.metadata["return_code"], json!(0));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_command_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let result = run(
            &ctx,
            "echo partial && false",
            Duration::from_secs(5),
            &CancellationToken::new(),
        );
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::CommandError));
        assert_eq!(result.output, "partial\n");
        assert_eq!(result.metadata["return_code"], json!(1));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let result = run(
            &ctx,
            "sleep 30",
            Duration::from_secs(1),
            &CancellationToken::new(),
        );
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert!(result.duration_ms >= 1000);
        assert!(result.duration_ms <= 4000);
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_in_workspace_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        let result = run(
            &ctx,
            "echo data > produced.txt && pwd",
            Duration::from_secs(5),
            &CancellationToken::new(),
        );
        assert!(result.success);
        assert!(dir.path().join("produced.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_merged_environment() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.environment
            .insert("CRUCIBLE_TEST_VAR".to_string(), "42".to_string());
        let result = run(
            &ctx,
            "echo $CRUCIBLE_TEST_VAR",
            Duration::from_secs(5),
            &CancellationToken::new(),
        );
        assert_eq!(result.output, "42\n");
    }
}
