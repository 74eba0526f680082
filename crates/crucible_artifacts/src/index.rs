//! Persistent artifact index.
//!
//! The index is one JSON document rewritten in full on every mutation.
//! Writes go to a temp file followed by an atomic rename so readers never
//! observe a torn document.

use crate::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const INDEX_VERSION: &str = "1.0";

/// Per-artifact entry in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub category: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub storage_path: PathBuf,
    pub metadata_path: PathBuf,
}

/// The full index document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub artifacts: HashMap<String, IndexEntry>,
    /// Secondary index: category -> artifact ids.
    pub categories: HashMap<String, Vec<String>>,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub version: String,
}

impl Default for ArtifactIndex {
    fn default() -> Self {
        Self {
            artifacts: HashMap::new(),
            categories: HashMap::new(),
            last_cleanup: None,
            version: INDEX_VERSION.to_string(),
        }
    }
}

impl ArtifactIndex {
    /// Load the index from disk, falling back to an empty index if the
    /// file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(index) => index,
                Err(e) => {
                    warn!("Failed to parse artifact index, starting fresh: {}", e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist the index: write to a sibling temp file, then rename.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(self)?;

        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        {
            let mut file = std::fs::File::create(&tmp)
                .map_err(|e| StoreError::io(tmp.display(), e))?;
            file.write_all(json.as_bytes())
                .map_err(|e| StoreError::io(tmp.display(), e))?;
            file.sync_all().map_err(|e| StoreError::io(tmp.display(), e))?;
        }
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StoreError::io(path.display(), e)
        })?;
        Ok(())
    }

    /// Insert an entry and keep the category index consistent.
    pub fn insert(&mut self, artifact_id: String, entry: IndexEntry) {
        let category = entry.category.clone();
        self.artifacts.insert(artifact_id.clone(), entry);
        let ids = self.categories.entry(category).or_default();
        if !ids.contains(&artifact_id) {
            ids.push(artifact_id);
        }
    }

    /// Remove an entry, returning it. Empty category buckets are dropped.
    pub fn remove(&mut self, artifact_id: &str) -> Option<IndexEntry> {
        let entry = self.artifacts.remove(artifact_id)?;
        if let Some(ids) = self.categories.get_mut(&entry.category) {
            ids.retain(|id| id != artifact_id);
            if ids.is_empty() {
                self.categories.remove(&entry.category);
            }
        }
        Some(entry)
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.artifacts.values().map(|e| e.size_bytes).sum()
    }
}
