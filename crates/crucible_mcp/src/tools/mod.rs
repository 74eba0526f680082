//! MCP Tool Implementations
//!
//! Each tool exposes one sandbox capability via the MCP protocol. Tools
//! are registered in the ToolRegistry and dispatched by name.
//!
//! # Tool Categories
//!
//! - **Execution**: execute_python, execute_shell, execute_animation,
//!   cleanup_context, get_execution_history
//! - **Artifacts**: store_artifact, list_artifacts, retrieve_artifact,
//!   get_artifact_content, cleanup_artifacts, get_storage_stats
//! - **Admin**: server_info, health_check, get_connection_stats

mod admin;
mod artifacts;
mod execution;
mod registry;

pub use registry::ToolRegistry;

use crate::protocol::ToolDefinition;
use crate::state::ServerState;
use anyhow::Result;
use serde_json::Value;

/// Trait for MCP tools.
///
/// Execution is synchronous; tools receive the shared server state and
/// return a JSON value that the dispatcher wraps into the MCP content
/// envelope.
pub trait McpTool: Send + Sync {
    /// Tool name (e.g., "execute_python")
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool.
    fn execute(&self, args: Value, state: &ServerState) -> Result<Value>;

    /// Get the tool definition for tools/list
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}
