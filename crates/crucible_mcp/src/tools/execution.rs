//! Execution tools: the three execution paths plus context/history access.

use super::McpTool;
use crate::state::ServerState;
use anyhow::{bail, Result};
use crucible_engine::RenderQuality;
use crucible_protocol::Language;
use serde::Deserialize;
use serde_json::{json, Value};

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| anyhow::anyhow!("Invalid arguments: {}", e))
}

// ---------------------------------------------------------------------------
// execute_python
// ---------------------------------------------------------------------------

pub struct ExecutePythonTool;

#[derive(Debug, Deserialize)]
struct ExecutePythonArgs {
    code: String,
    workspace_id: String,
    timeout: Option<u64>,
}

impl McpTool for ExecutePythonTool {
    fn name(&self) -> &'static str {
        "execute_python"
    }

    fn description(&self) -> &'static str {
        "Execute Python code in a workspace with persistent bindings"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": { "type": "string", "description": "Python source to execute" },
                "workspace_id": { "type": "string", "description": "Target workspace" },
                "timeout": { "type": "integer", "description": "Deadline override in seconds" }
            },
            "required": ["code", "workspace_id"]
        })
    }

    fn execute(&self, args: Value, state: &ServerState) -> Result<Value> {
        let args: ExecutePythonArgs = parse_args(args)?;
        let result = state
            .engine
            .execute_python(&args.workspace_id, &args.code, args.timeout);
        Ok(serde_json::to_value(result)?)
    }
}

// ---------------------------------------------------------------------------
// execute_shell
// ---------------------------------------------------------------------------

pub struct ExecuteShellTool;

#[derive(Debug, Deserialize)]
struct ExecuteShellArgs {
    command: String,
    workspace_id: String,
    timeout: Option<u64>,
}

impl McpTool for ExecuteShellTool {
    fn name(&self) -> &'static str {
        "execute_shell"
    }

    fn description(&self) -> &'static str {
        "Execute a shell command with cwd inside the workspace"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command line" },
                "workspace_id": { "type": "string", "description": "Target workspace" },
                "timeout": { "type": "integer", "description": "Deadline override in seconds" }
            },
            "required": ["command", "workspace_id"]
        })
    }

    fn execute(&self, args: Value, state: &ServerState) -> Result<Value> {
        let args: ExecuteShellArgs = parse_args(args)?;
        let result = state
            .engine
            .execute_shell(&args.workspace_id, &args.command, args.timeout);
        Ok(serde_json::to_value(result)?)
    }
}

// ---------------------------------------------------------------------------
// execute_animation
// ---------------------------------------------------------------------------

pub struct ExecuteAnimationTool;

#[derive(Debug, Deserialize)]
struct ExecuteAnimationArgs {
    script: String,
    workspace_id: String,
    #[serde(default = "default_quality")]
    quality: String,
    scene_name: Option<String>,
    timeout: Option<u64>,
}

fn default_quality() -> String {
    "medium".to_string()
}

impl McpTool for ExecuteAnimationTool {
    fn name(&self) -> &'static str {
        "execute_animation"
    }

    fn description(&self) -> &'static str {
        "Render an animation script and harvest the produced media"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "script": { "type": "string", "description": "Scene script source" },
                "workspace_id": { "type": "string", "description": "Target workspace" },
                "quality": { "type": "string", "enum": ["low", "medium", "high"] },
                "scene_name": { "type": "string", "description": "Specific scene to render" },
                "timeout": { "type": "integer", "description": "Deadline override in seconds" }
            },
            "required": ["script", "workspace_id"]
        })
    }

    fn execute(&self, args: Value, state: &ServerState) -> Result<Value> {
        let args: ExecuteAnimationArgs = parse_args(args)?;
        let quality: RenderQuality = match args.quality.parse() {
            Ok(q) => q,
            Err(e) => bail!("{}", e),
        };
        let result = state.engine.execute_animation(
            &args.workspace_id,
            &args.script,
            quality,
            args.scene_name.as_deref(),
            args.timeout,
        );
        Ok(serde_json::to_value(result)?)
    }
}

// ---------------------------------------------------------------------------
// cleanup_context
// ---------------------------------------------------------------------------

pub struct CleanupContextTool;

#[derive(Debug, Deserialize)]
struct CleanupContextArgs {
    workspace_id: String,
}

impl McpTool for CleanupContextTool {
    fn name(&self) -> &'static str {
        "cleanup_context"
    }

    fn description(&self) -> &'static str {
        "Destroy a workspace: its artifacts directory and persistent bindings"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "workspace_id": { "type": "string", "description": "Workspace to destroy" }
            },
            "required": ["workspace_id"]
        })
    }

    fn execute(&self, args: Value, state: &ServerState) -> Result<Value> {
        let args: CleanupContextArgs = parse_args(args)?;
        let removed = state.engine.cleanup_context(&args.workspace_id);
        Ok(json!({ "workspace_id": args.workspace_id, "removed": removed }))
    }
}

// ---------------------------------------------------------------------------
// get_execution_history
// ---------------------------------------------------------------------------

pub struct ExecutionHistoryTool;

#[derive(Debug, Deserialize)]
struct ExecutionHistoryArgs {
    workspace_id: Option<String>,
    language: Option<Language>,
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    100
}

impl McpTool for ExecutionHistoryTool {
    fn name(&self) -> &'static str {
        "get_execution_history"
    }

    fn description(&self) -> &'static str {
        "Recent execution records, newest first, with optional filters"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "workspace_id": { "type": "string" },
                "language": { "type": "string", "enum": ["python", "shell", "animation"] },
                "limit": { "type": "integer", "default": 100 }
            }
        })
    }

    fn execute(&self, args: Value, state: &ServerState) -> Result<Value> {
        let args: ExecutionHistoryArgs = parse_args(args)?;
        let records = state
            .engine
            .history(args.workspace_id.as_deref(), args.language, args.limit);
        Ok(json!({
            "count": records.len(),
            "records": records,
            "statistics": state.engine.statistics(),
        }))
    }
}
