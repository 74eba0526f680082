//! Artifact metadata documents and listing views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Full metadata for a stored artifact, persisted as
/// `metadata/<artifact_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub artifact_id: String,
    pub name: String,
    /// Where the content originally came from (caller-supplied path or a
    /// synthetic `<blob>` marker).
    pub original_path: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Lowercased extension including the dot, or empty.
    pub content_type: String,
    pub mime_type: String,
    /// SHA-256 of the stored blob; `"unknown"` if hashing failed.
    pub hash_sha256: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Version number, >= 1. Versioning is explicit: a new artifact with
    /// `parent_id` pointing at the predecessor.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_version() -> u32 {
    1
}

/// A retrieved artifact: metadata plus the path of its blob.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub metadata: ArtifactMetadata,
    pub storage_path: PathBuf,
}

impl Artifact {
    pub fn exists(&self) -> bool {
        self.storage_path.exists()
    }
}

/// Lightweight view used by listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub artifact_id: String,
    pub name: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub category: String,
    pub tags: Vec<String>,
    pub version: u32,
}

impl From<&ArtifactMetadata> for ArtifactInfo {
    fn from(m: &ArtifactMetadata) -> Self {
        Self {
            artifact_id: m.artifact_id.clone(),
            name: m.name.clone(),
            size_bytes: m.size_bytes,
            created_at: m.created_at,
            category: m.category.clone(),
            tags: m.tags.clone(),
            version: m.version,
        }
    }
}
