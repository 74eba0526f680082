//! Administrative tools: identity, health, connection statistics.

use super::McpTool;
use crate::state::ServerState;
use anyhow::Result;
use serde_json::{json, Value};

pub struct ServerInfoTool;

impl McpTool for ServerInfoTool {
    fn name(&self) -> &'static str {
        "server_info"
    }

    fn description(&self) -> &'static str {
        "Server identity and feature flags"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(&self, _args: Value, state: &ServerState) -> Result<Value> {
        Ok(json!({
            "name": crucible_protocol::SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "protocol_version": crucible_protocol::MCP_PROTOCOL_VERSION,
            "security_tier": state.config.security_tier,
            "features": {
                "python": crucible_engine::python::find_interpreter().is_some(),
                "shell": true,
                "animation": crucible_engine::animation::find_renderer().is_some(),
                "artifacts": true,
                "auth": state.config.enable_auth,
                "rate_limiting": state.config.enable_rate_limiting,
            },
        }))
    }
}

pub struct HealthCheckTool;

impl McpTool for HealthCheckTool {
    fn name(&self) -> &'static str {
        "health_check"
    }

    fn description(&self) -> &'static str {
        "Run a health sweep and return the snapshot"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(&self, _args: Value, state: &ServerState) -> Result<Value> {
        let snapshot = state.health.check(&state.health_inputs());
        let mut value = serde_json::to_value(snapshot)?;
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "degradation".to_string(),
                serde_json::to_value(state.connections.degradation_check())?,
            );
        }
        Ok(value)
    }
}

pub struct ConnectionStatsTool;

impl McpTool for ConnectionStatsTool {
    fn name(&self) -> &'static str {
        "get_connection_stats"
    }

    fn description(&self) -> &'static str {
        "Connection manager statistics and degradation assessment"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(&self, _args: Value, state: &ServerState) -> Result<Value> {
        Ok(serde_json::to_value(state.connections.stats())?)
    }
}
