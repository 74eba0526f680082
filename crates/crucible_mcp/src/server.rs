//! MCP Server Implementation
//!
//! JSON-RPC 2.0 server over stdio (newline-delimited JSON). Each server
//! process serves one logical connection, admitted through the gateway at
//! startup and kept alive by per-request activity bumps. All state flows
//! through the explicit [`ServerState`]; there are no globals.
//!
//! # Request Flow
//!
//! parse -> envelope validation -> initialize gating -> activity bump ->
//! rate limit -> (auth) -> route -> tool handler -> content envelope.

use crate::audit::AuditLog;
use crate::auth::{AuthError, AuthManager};
use crate::protocol::{
    methods, ContentBlock, ErrorCode, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ServerCapabilities, ServerInfo, ToolCallParams, ToolCallResult,
    ToolsCapability,
};
use crate::state::ServerState;
use crate::tools::ToolRegistry;
use crate::validate::{EnvelopeError, RequestValidator};
use anyhow::{Context, Result};
use crucible_protocol::paths::{default_audit_log_path, default_users_path};
use crucible_protocol::ServerConfig;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// MCP Server over stdio.
pub struct McpServer {
    state: ServerState,
    validator: RequestValidator,
    tools: ToolRegistry,
    auth: Option<Mutex<AuthManager>>,
    audit: Option<AuditLog>,
    connection_id: String,
    initialized: bool,
    log_level: String,
}

impl McpServer {
    /// Build a server and all its subsystems from a configuration.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let validator = RequestValidator::new(config.max_request_bytes, config.max_params_depth);

        let auth = if config.enable_auth {
            Some(Mutex::new(
                AuthManager::load_or_init(default_users_path())
                    .context("Failed to initialize auth manager")?,
            ))
        } else {
            None
        };

        let audit = match AuditLog::new(default_audit_log_path()) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!("Audit log unavailable: {}", e);
                None
            }
        };

        let state = ServerState::new(config)?;
        let connection_id = format!("stdio-{}", Uuid::new_v4().simple());

        Ok(Self {
            state,
            validator,
            tools: ToolRegistry::new(),
            auth,
            audit,
            connection_id,
            initialized: false,
            log_level: "info".to_string(),
        })
    }

    /// Shared state accessor for the server wiring (maintenance threads).
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Run the server: admit the stdio session, then serve requests from
    /// stdin until EOF. Blocking; no async runtime required.
    pub fn run(&mut self) -> Result<()> {
        self.state
            .connections
            .admit(&self.connection_id.clone(), "127.0.0.1", None, None)
            .map_err(|e| anyhow::anyhow!("Connection rejected: {}", e))?;

        info!("MCP server starting (connection {})", self.connection_id);

        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();

        for line in stdin.lock().lines() {
            let line = line.context("Failed to read from stdin")?;
            if line.trim().is_empty() {
                continue;
            }

            let response = self.handle_line(&line);
            if response.is_skip() {
                continue;
            }
            if let Some(audit) = &self.audit {
                let _ = audit.log_response(&response);
            }
            self.write_response(&mut stdout, &response)?;
        }

        self.state.connections.remove(&self.connection_id, "eof");
        info!("MCP server shutting down");
        Ok(())
    }

    /// Process one raw frame into a response.
    pub fn handle_line(&mut self, line: &str) -> JsonRpcResponse {
        if let Err(e) = self.validator.check_size(line) {
            return JsonRpcResponse::error(
                None,
                JsonRpcError::new(ErrorCode::ValidationError, e.to_string()),
            );
        }

        let mut request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                return JsonRpcResponse::error(
                    None,
                    JsonRpcError::new(ErrorCode::ParseError, format!("Invalid JSON: {}", e)),
                );
            }
        };

        debug!("Received: {}", request.method);
        if let Some(audit) = &self.audit {
            let _ = audit.log_request(&request);
        }

        if let Err(e) = self.validator.check_envelope(&mut request) {
            let code = match e {
                EnvelopeError::Version(_) | EnvelopeError::MissingMethod => {
                    ErrorCode::InvalidRequest
                }
                EnvelopeError::TooLarge { .. } | EnvelopeError::TooDeep(_) => {
                    ErrorCode::ValidationError
                }
            };
            return JsonRpcResponse::error(request.id, JsonRpcError::new(code, e.to_string()));
        }

        self.handle_request(request)
    }

    fn handle_request(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        if request.method == methods::INITIALIZE {
            return self.handle_initialize(request);
        }
        if request.method == methods::INITIALIZED {
            // Notifications get no response; an id (unusual) gets an ack.
            return if request.id.is_none() {
                JsonRpcResponse::skip()
            } else {
                JsonRpcResponse::success(request.id, Value::Null)
            };
        }

        if !self.initialized {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(ErrorCode::InvalidRequest, "Server not initialized"),
            );
        }

        self.state.connections.update_activity(&self.connection_id);

        let (allowed, retry_after) = self.state.connections.check_rate_limit(&self.connection_id);
        if !allowed {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::with_data(
                    ErrorCode::RateLimitExceeded,
                    "Rate limit exceeded",
                    json!({ "retry_after": retry_after }),
                ),
            );
        }

        match request.method.as_str() {
            methods::TOOLS_LIST => {
                JsonRpcResponse::success(request.id, json!({ "tools": self.tools.list_tools() }))
            }
            methods::TOOLS_CALL => self.handle_tools_call(request),
            methods::RESOURCES_LIST => {
                JsonRpcResponse::success(request.id, json!({ "resources": [] }))
            }
            methods::RESOURCES_READ => JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(ErrorCode::ResourceNotFound, "No resources available"),
            ),
            methods::PROMPTS_LIST => {
                JsonRpcResponse::success(request.id, json!({ "prompts": [] }))
            }
            methods::PROMPTS_GET => JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(ErrorCode::ResourceNotFound, "No prompts available"),
            ),
            methods::COMPLETION_COMPLETE => JsonRpcResponse::success(
                request.id,
                json!({ "completion": { "values": [], "total": 0 } }),
            ),
            methods::LOGGING_SET_LEVEL => {
                let level = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("level"))
                    .and_then(|l| l.as_str())
                    .unwrap_or("info")
                    .to_string();
                info!("log level set to {}", level);
                self.log_level = level;
                JsonRpcResponse::success(request.id, json!({}))
            }
            methods::PING => {
                JsonRpcResponse::success(request.id, Value::Object(Default::default()))
            }
            other => JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    ErrorCode::MethodNotFound,
                    format!("Unknown method: {}", other),
                ),
            ),
        }
    }

    fn handle_initialize(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        if let Some(params) = &request.params {
            let client = params
                .get("clientInfo")
                .and_then(|c| c.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or("unknown");
            info!("Initialize from client: {}", client);
        }

        self.initialized = true;

        let result = InitializeResult {
            protocol_version: crucible_protocol::MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
                resources: None,
                prompts: None,
                logging: Some(json!({})),
            },
            server_info: ServerInfo {
                name: crucible_protocol::SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(ErrorCode::InternalError, e.to_string()),
            ),
        }
    }

    fn handle_tools_call(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: ToolCallParams = match request.params.clone() {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::new(
                            ErrorCode::InvalidParams,
                            format!("Invalid tool call params: {}", e),
                        ),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(ErrorCode::InvalidParams, "Missing tool call params"),
                );
            }
        };

        // Omitted arguments arrive as null; tools parse from an object.
        let mut arguments = if params.arguments.is_null() {
            json!({})
        } else {
            params.arguments
        };
        if let Some(response) = self.authenticate(&request, &params.name, &mut arguments) {
            return response;
        }

        info!("Tool call: {}", params.name);
        let start = Instant::now();
        let result = self.tools.call_tool(&params.name, arguments, &self.state);
        let duration_ms = start.elapsed().as_millis() as u64;

        if let Some(audit) = &self.audit {
            let _ = audit.log_tool_call(&params.name, result.is_ok(), duration_ms);
        }

        match result {
            Ok(value) => self.wrap_tool_result(request.id, &value),
            Err(e) => {
                error!("Tool error: {:#}", e);
                let tool_result = ToolCallResult {
                    content: vec![ContentBlock::text(format!("Error: {}", e))],
                    is_error: true,
                };
                match serde_json::to_value(tool_result) {
                    Ok(value) => JsonRpcResponse::success(request.id, value),
                    Err(e) => JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::new(ErrorCode::InternalError, e.to_string()),
                    ),
                }
            }
        }
    }

    /// API-key authentication and authorization for a tool call.
    ///
    /// Returns `Some(error response)` when the call must be rejected; the
    /// key itself is stripped from the arguments either way.
    fn authenticate(
        &self,
        request: &JsonRpcRequest,
        tool: &str,
        arguments: &mut Value,
    ) -> Option<JsonRpcResponse> {
        let auth = self.auth.as_ref()?;

        let api_key = arguments
            .as_object_mut()
            .and_then(|map| map.remove("api_key"))
            .and_then(|v| v.as_str().map(str::to_string));

        let Some(api_key) = api_key else {
            return Some(JsonRpcResponse::error(
                request.id.clone(),
                JsonRpcError::new(ErrorCode::AuthenticationError, "Missing API key"),
            ));
        };

        let mut manager = auth.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let user = match manager.authenticate(&api_key) {
            Ok(user) => user,
            Err(AuthError::QuotaExceeded(name)) => {
                return Some(JsonRpcResponse::error(
                    request.id.clone(),
                    JsonRpcError::new(
                        ErrorCode::RateLimitExceeded,
                        format!("Hourly quota exceeded for {}", name),
                    ),
                ));
            }
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    request.id.clone(),
                    JsonRpcError::new(ErrorCode::AuthenticationError, e.to_string()),
                ));
            }
        };

        if !manager.authorize(&user, tool) {
            return Some(JsonRpcResponse::error(
                request.id.clone(),
                JsonRpcError::new(
                    ErrorCode::AuthorizationError,
                    format!("User {} is not permitted to call {}", user.name, tool),
                ),
            ));
        }

        None
    }

    /// Serialize a tool result into the MCP content envelope, truncating
    /// oversized payloads into a structured notice.
    fn wrap_tool_result(&self, id: Option<crate::protocol::RequestId>, value: &Value) -> JsonRpcResponse {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to serialize tool result: {}", e);
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::new(ErrorCode::InternalError, "Failed to serialize tool result"),
                );
            }
        };

        let max = self.state.config.max_response_bytes;
        let (content, was_truncated) = if json.len() > max {
            warn!("Response truncated from {} to {} bytes", json.len(), max);
            let notice = json!({
                "truncated": true,
                "max_bytes": max,
                "original_bytes": json.len(),
                "message": "Response exceeded size limit. Use filters or pagination to reduce output.",
            });
            (notice.to_string(), true)
        } else {
            (json, false)
        };

        let tool_result = ToolCallResult {
            content: vec![ContentBlock::text(content)],
            is_error: was_truncated,
        };
        match serde_json::to_value(tool_result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(
                id,
                JsonRpcError::new(ErrorCode::InternalError, e.to_string()),
            ),
        }
    }

    fn write_response<W: Write>(&self, writer: &mut W, response: &JsonRpcResponse) -> Result<()> {
        let json = serde_json::to_string(response)?;
        debug!("Sending: {}", json);
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }
}
