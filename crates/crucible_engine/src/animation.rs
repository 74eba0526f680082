//! Animation execution path.
//!
//! From the engine's perspective the renderer is just a subprocess: the
//! script is written to a temp file, the renderer is invoked with a
//! quality flag and `--media_dir` pointed inside the workspace, and any
//! produced media files are harvested as artifacts.

use crate::cancel::CancellationToken;
use crate::context::WorkspaceContext;
use crate::supervise::run_with_deadline;
use crucible_protocol::{ErrorKind, ExecutionResult};
use crucible_security::apply_limits;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use walkdir::WalkDir;

/// Media extensions harvested from the renderer output.
const MEDIA_EXTENSIONS: [&str; 4] = ["mp4", "png", "gif", "mov"];

/// Render quality presets mapped to renderer flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderQuality {
    Low,
    Medium,
    High,
}

impl RenderQuality {
    pub fn flag(&self) -> &'static str {
        match self {
            RenderQuality::Low => "-ql",
            RenderQuality::Medium => "-qm",
            RenderQuality::High => "-qh",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderQuality::Low => "low",
            RenderQuality::Medium => "medium",
            RenderQuality::High => "high",
        }
    }
}

impl FromStr for RenderQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(RenderQuality::Low),
            "medium" => Ok(RenderQuality::Medium),
            "high" => Ok(RenderQuality::High),
            other => Err(format!("unknown render quality: {}", other)),
        }
    }
}

pub fn run(
    context: &WorkspaceContext,
    script: &str,
    quality: RenderQuality,
    scene_name: Option<&str>,
    deadline: Duration,
    token: &CancellationToken,
) -> ExecutionResult {
    let renderer = match find_renderer() {
        Some(path) => path,
        None => {
            return ExecutionResult::failed(
                ErrorKind::NotInstalled,
                "Animation renderer not installed (checked VIRTUAL_ENV and PATH for manim)",
                0,
            );
        }
    };

    let media_dir = context.artifacts_dir.join("manim");
    if let Err(e) = std::fs::create_dir_all(&media_dir) {
        return ExecutionResult::failed(
            ErrorKind::Internal,
            format!("Failed to create media dir: {}", e),
            0,
        );
    }

    let script_path = std::env::temp_dir().join(format!(
        "crucible_scene_{}.py",
        uuid::Uuid::new_v4().simple()
    ));
    if let Err(e) = std::fs::write(&script_path, script) {
        return ExecutionResult::failed(
            ErrorKind::Internal,
            format!("Failed to write scene script: {}", e),
            0,
        );
    }

    let mut cmd = Command::new(&renderer);
    cmd.arg(&script_path)
        .arg("--media_dir")
        .arg(&media_dir)
        .arg("--disable_caching")
        .arg(quality.flag())
        .current_dir(&context.artifacts_dir);
    if let Some(scene) = scene_name {
        cmd.arg(scene);
    }
    for (key, value) in &context.environment {
        cmd.env(key, value);
    }
    apply_limits(&mut cmd, &context.resource_limits);

    debug!(
        "rendering animation in workspace {} via {} ({})",
        context.workspace_id,
        renderer.display(),
        quality.as_str()
    );

    let outcome = run_with_deadline(&mut cmd, deadline, token);
    let _ = std::fs::remove_file(&script_path);

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            return ExecutionResult::failed(
                ErrorKind::Internal,
                format!("Failed to spawn renderer: {e:#}"),
                0,
            );
        }
    };

    let duration_ms = outcome.elapsed.as_millis() as u64;

    if outcome.timed_out || outcome.cancelled {
        let message = if outcome.cancelled {
            "Execution cancelled".to_string()
        } else {
            format!("Render timed out after {} seconds", deadline.as_secs())
        };
        return ExecutionResult::failed(ErrorKind::Timeout, message, duration_ms)
            .with_metadata("quality", json!(quality.as_str()));
    }

    let return_code = outcome.exit_code().unwrap_or(-1);
    if return_code != 0 {
        let mut result = ExecutionResult::failed(
            ErrorKind::CommandError,
            if outcome.stderr.is_empty() {
                format!("Renderer exited with status {}", return_code)
            } else {
                outcome.stderr.clone()
            },
            duration_ms,
        );
        result.output = outcome.stdout;
        return result
            .with_metadata("return_code", json!(return_code))
            .with_metadata("quality", json!(quality.as_str()));
    }

    let artifacts = harvest_media(&media_dir, &context.artifacts_dir);
    let mut result = ExecutionResult::ok(outcome.stdout, duration_ms)
        .with_metadata("quality", json!(quality.as_str()))
        .with_metadata("artifacts_count", json!(artifacts.len()));
    if let Some(scene) = scene_name {
        result = result.with_metadata("scene_name", json!(scene));
    }
    result.artifacts = artifacts;
    result
}

/// Media files under the render dir, as paths relative to the workspace.
fn harvest_media(media_dir: &Path, artifacts_dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    for entry in WalkDir::new(media_dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if MEDIA_EXTENSIONS.contains(&ext.as_str()) {
            if let Ok(relative) = entry.path().strip_prefix(artifacts_dir) {
                found.push(relative.to_string_lossy().into_owned());
            }
        }
    }
    found.sort();
    found
}

/// Locate the renderer binary, preferring a vendored virtualenv.
pub fn find_renderer() -> Option<PathBuf> {
    if let Ok(venv) = std::env::var("VIRTUAL_ENV") {
        let candidate = if cfg!(windows) {
            PathBuf::from(&venv).join("Scripts").join("manim.exe")
        } else {
            PathBuf::from(&venv).join("bin").join("manim")
        };
        if candidate.exists() {
            return Some(candidate);
        }
    }
    which::which("manim").ok()
}
