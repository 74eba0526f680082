//! Tool Registry - Tool Discovery and Dispatch
//!
//! Maintains the list of available tools and dispatches calls by name.

use super::*;
use crate::protocol::ToolDefinition;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Registry of available MCP tools
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn McpTool>>,
}

impl ToolRegistry {
    /// Create a new tool registry with all tools registered
    pub fn new() -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };

        // Execution
        registry.register(Box::new(execution::ExecutePythonTool));
        registry.register(Box::new(execution::ExecuteShellTool));
        registry.register(Box::new(execution::ExecuteAnimationTool));
        registry.register(Box::new(execution::CleanupContextTool));
        registry.register(Box::new(execution::ExecutionHistoryTool));

        // Artifacts
        registry.register(Box::new(artifacts::StoreArtifactTool));
        registry.register(Box::new(artifacts::ListArtifactsTool));
        registry.register(Box::new(artifacts::RetrieveArtifactTool));
        registry.register(Box::new(artifacts::GetArtifactContentTool));
        registry.register(Box::new(artifacts::CleanupArtifactsTool));
        registry.register(Box::new(artifacts::StorageStatsTool));

        // Admin
        registry.register(Box::new(admin::ServerInfoTool));
        registry.register(Box::new(admin::HealthCheckTool));
        registry.register(Box::new(admin::ConnectionStatsTool));

        debug!("Registered {} tools", registry.tools.len());

        registry
    }

    fn register(&mut self, tool: Box<dyn McpTool>) {
        let name = tool.name().to_string();
        debug!("Registering tool: {}", name);
        self.tools.insert(name, tool);
    }

    /// List all available tools
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Call a tool by name
    pub fn call_tool(&self, name: &str, args: Value, state: &ServerState) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow!("Unknown tool: {}", name))?;
        tool.execute(args, state)
    }

    /// Check if a tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
