//! Artifact tools: storage, retrieval, listing, retention.

use super::McpTool;
use crate::state::ServerState;
use anyhow::{bail, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use crucible_artifacts::{ArtifactContent, ArtifactFilter, RetentionPolicy, StoreError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| anyhow::anyhow!("Invalid arguments: {}", e))
}

fn split_csv(raw: &Option<String>) -> Vec<String> {
    raw.as_deref()
        .map(|s| {
            s.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// store_artifact
// ---------------------------------------------------------------------------

pub struct StoreArtifactTool;

#[derive(Debug, Deserialize)]
struct StoreArtifactArgs {
    file_path: String,
    workspace_id: Option<String>,
    user_id: Option<String>,
    /// Comma-separated tag list.
    tags: Option<String>,
    description: Option<String>,
}

impl McpTool for StoreArtifactTool {
    fn name(&self) -> &'static str {
        "store_artifact"
    }

    fn description(&self) -> &'static str {
        "Ingest a file into the content-addressed artifact store"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Path of the file to store" },
                "workspace_id": { "type": "string" },
                "user_id": { "type": "string" },
                "tags": { "type": "string", "description": "Comma-separated tags" },
                "description": { "type": "string" }
            },
            "required": ["file_path"]
        })
    }

    fn execute(&self, args: Value, state: &ServerState) -> Result<Value> {
        let args: StoreArtifactArgs = parse_args(args)?;
        let path = PathBuf::from(&args.file_path);
        let validated = state
            .guard
            .validate(&path)
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let artifact_id = state.store.store_file(
            &validated,
            args.workspace_id,
            args.user_id,
            split_csv(&args.tags),
            args.description,
        )?;
        Ok(json!({ "artifact_id": artifact_id }))
    }
}

// ---------------------------------------------------------------------------
// list_artifacts
// ---------------------------------------------------------------------------

pub struct ListArtifactsTool;

#[derive(Debug, Deserialize)]
struct ListArtifactsArgs {
    category: Option<String>,
    workspace_id: Option<String>,
    user_id: Option<String>,
    /// Comma-separated; matches artifacts carrying any listed tag.
    tags: Option<String>,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
}

impl McpTool for ListArtifactsTool {
    fn name(&self) -> &'static str {
        "list_artifacts"
    }

    fn description(&self) -> &'static str {
        "List stored artifacts, newest first, with optional filters"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "category": { "type": "string" },
                "workspace_id": { "type": "string" },
                "user_id": { "type": "string" },
                "tags": { "type": "string", "description": "Comma-separated, any-match" },
                "created_after": { "type": "string", "format": "date-time" },
                "created_before": { "type": "string", "format": "date-time" }
            }
        })
    }

    fn execute(&self, args: Value, state: &ServerState) -> Result<Value> {
        let args: ListArtifactsArgs = parse_args(args)?;
        let tags = split_csv(&args.tags);
        let filter = ArtifactFilter {
            category: args.category,
            workspace_id: args.workspace_id,
            user_id: args.user_id,
            tags: (!tags.is_empty()).then_some(tags),
            created_after: args.created_after,
            created_before: args.created_before,
        };
        let artifacts = state.store.list(&filter);
        Ok(json!({ "count": artifacts.len(), "artifacts": artifacts }))
    }
}

// ---------------------------------------------------------------------------
// retrieve_artifact
// ---------------------------------------------------------------------------

pub struct RetrieveArtifactTool;

#[derive(Debug, Deserialize)]
struct RetrieveArtifactArgs {
    artifact_id: String,
}

impl McpTool for RetrieveArtifactTool {
    fn name(&self) -> &'static str {
        "retrieve_artifact"
    }

    fn description(&self) -> &'static str {
        "Fetch an artifact's metadata and verify its blob is present"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "artifact_id": { "type": "string" }
            },
            "required": ["artifact_id"]
        })
    }

    fn execute(&self, args: Value, state: &ServerState) -> Result<Value> {
        let args: RetrieveArtifactArgs = parse_args(args)?;
        let artifact = match state.store.retrieve(&args.artifact_id) {
            Ok(artifact) => artifact,
            Err(StoreError::NotFound(id)) => bail!("Artifact not found: {}", id),
            Err(e) => return Err(e.into()),
        };
        Ok(json!({
            "metadata": artifact.metadata,
            "storage_path": artifact.storage_path.display().to_string(),
            "exists": artifact.exists(),
            "size_bytes": artifact.metadata.size_bytes,
        }))
    }
}

// ---------------------------------------------------------------------------
// get_artifact_content
// ---------------------------------------------------------------------------

pub struct GetArtifactContentTool;

#[derive(Debug, Deserialize)]
struct GetArtifactContentArgs {
    artifact_id: String,
    #[serde(default)]
    as_text: bool,
}

impl McpTool for GetArtifactContentTool {
    fn name(&self) -> &'static str {
        "get_artifact_content"
    }

    fn description(&self) -> &'static str {
        "Read artifact content as text (hex fallback) or base64 bytes"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "artifact_id": { "type": "string" },
                "as_text": { "type": "boolean", "default": false }
            },
            "required": ["artifact_id"]
        })
    }

    fn execute(&self, args: Value, state: &ServerState) -> Result<Value> {
        let args: GetArtifactContentArgs = parse_args(args)?;
        let artifact = match state.store.retrieve(&args.artifact_id) {
            Ok(artifact) => artifact,
            Err(StoreError::NotFound(id)) => bail!("Artifact not found: {}", id),
            Err(e) => return Err(e.into()),
        };
        let content = state.store.get_content(&args.artifact_id, args.as_text)?;

        let (content_value, encoding, binary_hex, size) = match content {
            ArtifactContent::Text { text } => {
                let size = text.len();
                (json!(text), "text", false, size)
            }
            ArtifactContent::BinaryHex { hex } => {
                let size = hex.len() / 2;
                (json!(hex), "hex", true, size)
            }
            ArtifactContent::Bytes { bytes } => {
                let size = bytes.len();
                (json!(general_purpose::STANDARD.encode(bytes)), "base64", false, size)
            }
        };

        Ok(json!({
            "content": content_value,
            "encoding": encoding,
            "binary_hex": binary_hex,
            "content_type": artifact.metadata.content_type,
            "size_bytes": size,
            "metadata": artifact.metadata,
        }))
    }
}

// ---------------------------------------------------------------------------
// cleanup_artifacts
// ---------------------------------------------------------------------------

pub struct CleanupArtifactsTool;

#[derive(Debug, Deserialize)]
struct CleanupArtifactsArgs {
    max_age_days: Option<u32>,
    max_total_size_mib: Option<u64>,
    max_artifacts_per_category: Option<usize>,
    /// Comma-separated categories to clean regardless of age.
    categories_to_clean: Option<String>,
    /// Comma-separated tags that protect artifacts from deletion.
    preserve_tags: Option<String>,
}

impl McpTool for CleanupArtifactsTool {
    fn name(&self) -> &'static str {
        "cleanup_artifacts"
    }

    fn description(&self) -> &'static str {
        "Apply a retention policy and report what was deleted"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "max_age_days": { "type": "integer" },
                "max_total_size_mib": { "type": "integer" },
                "max_artifacts_per_category": { "type": "integer" },
                "categories_to_clean": { "type": "string", "description": "Comma-separated" },
                "preserve_tags": { "type": "string", "description": "Comma-separated" }
            }
        })
    }

    fn execute(&self, args: Value, state: &ServerState) -> Result<Value> {
        let args: CleanupArtifactsArgs = parse_args(args)?;
        let categories = split_csv(&args.categories_to_clean);
        let preserve = split_csv(&args.preserve_tags);
        let policy = RetentionPolicy {
            max_age_days: args.max_age_days,
            max_total_size_mib: args.max_total_size_mib,
            max_artifacts_per_category: args.max_artifacts_per_category,
            categories_to_clean: (!categories.is_empty()).then_some(categories),
            preserve_tags: (!preserve.is_empty()).then_some(preserve),
        };
        let report = state.store.cleanup(&policy);
        Ok(serde_json::to_value(report)?)
    }
}

// ---------------------------------------------------------------------------
// get_storage_stats
// ---------------------------------------------------------------------------

pub struct StorageStatsTool;

impl McpTool for StorageStatsTool {
    fn name(&self) -> &'static str {
        "get_storage_stats"
    }

    fn description(&self) -> &'static str {
        "Aggregate artifact counts and sizes per category"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(&self, _args: Value, state: &ServerState) -> Result<Value> {
        let stats = state.store.storage_stats();
        Ok(json!({
            "stats": stats,
            "base_dir": state.store.base_dir().display().to_string(),
        }))
    }
}
