//! Audit Logging - Tool Invocation Recording
//!
//! Records MCP requests, responses and tool calls for security auditing.
//! Entries are appended as NDJSON, one object per line. Argument values
//! are never written, only their key names.

use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit log serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append-only NDJSON audit log.
#[derive(Debug)]
pub struct AuditLog {
    writer: Mutex<BufWriter<File>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AuditEntry {
    Request {
        ts: DateTime<Utc>,
        method: String,
        id: Option<String>,
        param_keys: Option<Vec<String>>,
    },
    Response {
        ts: DateTime<Utc>,
        id: Option<String>,
        success: bool,
        error_code: Option<i32>,
    },
    ToolCall {
        ts: DateTime<Utc>,
        tool: String,
        success: bool,
        duration_ms: u64,
    },
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn log_request(&self, request: &JsonRpcRequest) -> Result<(), AuditError> {
        let param_keys = request.params.as_ref().map(|p| match p.as_object() {
            Some(map) => map.keys().cloned().collect(),
            None => Vec::new(),
        });
        self.write_entry(&AuditEntry::Request {
            ts: Utc::now(),
            method: request.method.clone(),
            id: request.id.as_ref().map(|id| format!("{:?}", id)),
            param_keys,
        })
    }

    pub fn log_response(&self, response: &JsonRpcResponse) -> Result<(), AuditError> {
        self.write_entry(&AuditEntry::Response {
            ts: Utc::now(),
            id: response.id.as_ref().map(|id| format!("{:?}", id)),
            success: response.error.is_none(),
            error_code: response.error.as_ref().map(|e| e.code),
        })
    }

    pub fn log_tool_call(
        &self,
        tool: &str,
        success: bool,
        duration_ms: u64,
    ) -> Result<(), AuditError> {
        self.write_entry(&AuditEntry::ToolCall {
            ts: Utc::now(),
            tool: tool.to_string(),
            success,
            duration_ms,
        })
    }

    fn write_entry(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let json = serde_json::to_string(entry)?;
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }
}
