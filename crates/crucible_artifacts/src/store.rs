//! The artifact store: blobs, metadata documents, index, retention.

use crate::category::categorize;
use crate::index::{ArtifactIndex, IndexEntry};
use crate::metadata::{Artifact, ArtifactInfo, ArtifactMetadata};
use crate::retention::{CleanupReport, RetentionPolicy};
use crate::StoreError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Filter for `list`. All fields optional; tags match if any overlap.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactFilter {
    pub category: Option<String>,
    pub workspace_id: Option<String>,
    pub user_id: Option<String>,
    pub tags: Option<Vec<String>>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

/// Content returned by `get_content`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum ArtifactContent {
    Text { text: String },
    /// Text was requested but the blob is not valid UTF-8.
    BinaryHex { hex: String },
    Bytes { bytes: Vec<u8> },
}

/// Aggregate storage statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub total_artifacts: usize,
    pub total_size_bytes: u64,
    pub by_category: HashMap<String, CategoryStats>,
    pub last_cleanup: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryStats {
    pub count: usize,
    pub size_bytes: u64,
}

/// Result of `verify_consistency`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    /// Index entries whose blob file is missing.
    pub missing_blobs: Vec<String>,
    /// Index entries whose metadata file is missing.
    pub missing_metadata: Vec<String>,
    /// Blob files in storage/ with no index entry.
    pub orphan_blobs: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.missing_blobs.is_empty()
            && self.missing_metadata.is_empty()
            && self.orphan_blobs.is_empty()
    }
}

/// Content-addressed artifact store. Index mutations are linearized
/// behind a store-level lock; readers observe committed state only.
pub struct ArtifactStore {
    base_dir: PathBuf,
    storage_dir: PathBuf,
    metadata_dir: PathBuf,
    index_path: PathBuf,
    index: Mutex<ArtifactIndex>,
}

impl ArtifactStore {
    /// Open (or initialize) a store rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_dir = base_dir.into();
        let storage_dir = base_dir.join("storage");
        let metadata_dir = base_dir.join("metadata");
        let index_path = base_dir.join("artifact_index.json");

        std::fs::create_dir_all(&storage_dir)
            .map_err(|e| StoreError::io(storage_dir.display(), e))?;
        std::fs::create_dir_all(&metadata_dir)
            .map_err(|e| StoreError::io(metadata_dir.display(), e))?;

        let index = ArtifactIndex::load(&index_path);
        // Persist immediately so the index file exists from first open.
        index.save(&index_path)?;

        info!("Artifact store initialized at {}", base_dir.display());

        Ok(Self {
            base_dir,
            storage_dir,
            metadata_dir,
            index_path,
            index: Mutex::new(index),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Store raw bytes under the metadata's identity.
    ///
    /// The stored `size_bytes` and `hash_sha256` are recomputed from the
    /// written blob; caller-supplied values are not trusted. A failure
    /// after the blob write rolls the partial state back.
    pub fn store_blob(
        &self,
        content: &[u8],
        mut metadata: ArtifactMetadata,
    ) -> Result<String, StoreError> {
        let storage_path = self
            .storage_dir
            .join(format!("{}_{}", metadata.artifact_id, metadata.name));

        std::fs::write(&storage_path, content)
            .map_err(|e| StoreError::io(storage_path.display(), e))?;

        metadata.size_bytes = content.len() as u64;
        metadata.modified_at = Utc::now();
        metadata.hash_sha256 = match hash_file(&storage_path) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(
                    "Failed to hash blob for {}: {}; recording unknown",
                    metadata.artifact_id, e
                );
                "unknown".to_string()
            }
        };

        let metadata_path = self
            .metadata_dir
            .join(format!("{}.json", metadata.artifact_id));

        let write_result = serde_json::to_string_pretty(&metadata)
            .map_err(StoreError::from)
            .and_then(|json| {
                std::fs::write(&metadata_path, json)
                    .map_err(|e| StoreError::io(metadata_path.display(), e))
            });
        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&storage_path);
            return Err(e);
        }

        let entry = IndexEntry {
            name: metadata.name.clone(),
            category: metadata.category.clone(),
            size_bytes: metadata.size_bytes,
            created_at: metadata.created_at,
            storage_path: storage_path.clone(),
            metadata_path: metadata_path.clone(),
        };

        {
            let mut index = self.lock_index();
            index.insert(metadata.artifact_id.clone(), entry);
            if let Err(e) = index.save(&self.index_path) {
                // Roll back both files and the in-memory entry.
                index.remove(&metadata.artifact_id);
                let _ = std::fs::remove_file(&storage_path);
                let _ = std::fs::remove_file(&metadata_path);
                return Err(e);
            }
        }

        info!("Stored artifact {}: {}", metadata.artifact_id, metadata.name);
        Ok(metadata.artifact_id)
    }

    /// Store an existing file, inferring category from its path and mime
    /// type from the system map.
    pub fn store_file(
        &self,
        file_path: &Path,
        workspace_id: Option<String>,
        user_id: Option<String>,
        tags: Vec<String>,
        description: Option<String>,
    ) -> Result<String, StoreError> {
        let content = std::fs::read(file_path)
            .map_err(|e| StoreError::io(file_path.display(), e))?;

        let name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let content_type = file_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        let mime_type = mime_guess::from_path(file_path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let now = Utc::now();

        let metadata = ArtifactMetadata {
            artifact_id: Uuid::new_v4().to_string(),
            name,
            original_path: file_path.display().to_string(),
            size_bytes: content.len() as u64,
            created_at: now,
            modified_at: now,
            content_type,
            mime_type,
            hash_sha256: String::new(),
            category: categorize(file_path).to_string(),
            tags,
            version: 1,
            parent_id: None,
            workspace_id,
            user_id,
            description,
        };

        self.store_blob(&content, metadata)
    }

    /// Store a new version of an existing artifact.
    pub fn store_version(
        &self,
        parent_id: &str,
        content: &[u8],
    ) -> Result<String, StoreError> {
        let parent = self.retrieve(parent_id)?;
        let now = Utc::now();
        let metadata = ArtifactMetadata {
            artifact_id: Uuid::new_v4().to_string(),
            created_at: now,
            modified_at: now,
            version: parent.metadata.version + 1,
            parent_id: Some(parent_id.to_string()),
            hash_sha256: String::new(),
            size_bytes: content.len() as u64,
            ..parent.metadata
        };
        self.store_blob(content, metadata)
    }

    /// Retrieve an artifact by id.
    pub fn retrieve(&self, artifact_id: &str) -> Result<Artifact, StoreError> {
        let (metadata_path, storage_path) = {
            let index = self.lock_index();
            let entry = index
                .artifacts
                .get(artifact_id)
                .ok_or_else(|| StoreError::NotFound(artifact_id.to_string()))?;
            (entry.metadata_path.clone(), entry.storage_path.clone())
        };

        let raw = std::fs::read_to_string(&metadata_path)
            .map_err(|e| StoreError::io(metadata_path.display(), e))?;
        let metadata: ArtifactMetadata = serde_json::from_str(&raw)?;

        Ok(Artifact {
            metadata,
            storage_path,
        })
    }

    /// List artifacts matching a filter, newest first.
    pub fn list(&self, filter: &ArtifactFilter) -> Vec<ArtifactInfo> {
        let entries: Vec<(String, PathBuf)> = {
            let index = self.lock_index();
            index
                .artifacts
                .iter()
                .map(|(id, e)| (id.clone(), e.metadata_path.clone()))
                .collect()
        };

        let mut infos = Vec::new();
        for (artifact_id, metadata_path) in entries {
            let metadata = match self.load_metadata(&metadata_path) {
                Some(m) => m,
                None => {
                    debug!("Skipping artifact {} with unreadable metadata", artifact_id);
                    continue;
                }
            };

            if let Some(category) = &filter.category {
                if &metadata.category != category {
                    continue;
                }
            }
            if let Some(workspace_id) = &filter.workspace_id {
                if metadata.workspace_id.as_ref() != Some(workspace_id) {
                    continue;
                }
            }
            if let Some(user_id) = &filter.user_id {
                if metadata.user_id.as_ref() != Some(user_id) {
                    continue;
                }
            }
            if let Some(tags) = &filter.tags {
                if !tags.iter().any(|t| metadata.tags.contains(t)) {
                    continue;
                }
            }
            if let Some(after) = filter.created_after {
                if metadata.created_at < after {
                    continue;
                }
            }
            if let Some(before) = filter.created_before {
                if metadata.created_at > before {
                    continue;
                }
            }

            infos.push(ArtifactInfo::from(&metadata));
        }

        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        infos
    }

    /// Read artifact content. With `as_text`, non-UTF-8 blobs fall back to
    /// hex encoding, flagged for the caller.
    pub fn get_content(
        &self,
        artifact_id: &str,
        as_text: bool,
    ) -> Result<ArtifactContent, StoreError> {
        let artifact = self.retrieve(artifact_id)?;
        let bytes = std::fs::read(&artifact.storage_path)
            .map_err(|e| StoreError::io(artifact.storage_path.display(), e))?;

        if !as_text {
            return Ok(ArtifactContent::Bytes { bytes });
        }

        match String::from_utf8(bytes) {
            Ok(text) => Ok(ArtifactContent::Text { text }),
            Err(e) => Ok(ArtifactContent::BinaryHex {
                hex: hex::encode(e.into_bytes()),
            }),
        }
    }

    /// Apply a retention policy. Failures on individual artifacts are
    /// recorded in the report; the sweep itself keeps going.
    pub fn cleanup(&self, policy: &RetentionPolicy) -> CleanupReport {
        let mut index = self.lock_index();
        let mut report = CleanupReport {
            total_artifacts: index.artifacts.len(),
            ..Default::default()
        };

        // Load metadata for every indexed artifact; unreadable metadata is
        // skipped, never fatal.
        let mut all: Vec<(String, ArtifactMetadata)> = Vec::new();
        for (id, entry) in index.artifacts.iter() {
            match self.load_metadata(&entry.metadata_path) {
                Some(m) => all.push((id.clone(), m)),
                None => report
                    .errors
                    .push(format!("missing metadata for artifact {}", id)),
            }
        }
        all.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));

        let now = Utc::now();
        let mut candidates: Vec<usize> = Vec::new();
        let mut candidate_set = vec![false; all.len()];

        for (i, (_, metadata)) in all.iter().enumerate() {
            if policy.preserves(&metadata.tags) {
                continue;
            }

            let mut should_delete = false;
            if let Some(max_age) = policy.max_age_days {
                if now - metadata.created_at > Duration::days(i64::from(max_age)) {
                    should_delete = true;
                }
            }
            if let Some(categories) = &policy.categories_to_clean {
                if categories.contains(&metadata.category) {
                    should_delete = true;
                }
            }

            if should_delete {
                candidates.push(i);
                candidate_set[i] = true;
            }
        }

        // Per-category cap: beyond the newest N of a category, the oldest
        // extras become candidates too.
        if let Some(cap) = policy.max_artifacts_per_category {
            let mut per_category: HashMap<&str, Vec<usize>> = HashMap::new();
            for (i, (_, metadata)) in all.iter().enumerate() {
                per_category
                    .entry(metadata.category.as_str())
                    .or_default()
                    .push(i);
            }
            for indices in per_category.values() {
                if indices.len() > cap {
                    // `all` is oldest-first, so the overflow is the front.
                    for &i in &indices[..indices.len() - cap] {
                        if !candidate_set[i] && !policy.preserves(&all[i].1.tags) {
                            candidates.push(i);
                            candidate_set[i] = true;
                        }
                    }
                }
            }
        }

        // Size pressure: extend with the oldest remaining artifacts until
        // the projected total fits under the ceiling.
        if let Some(max_mib) = policy.max_total_size_mib {
            let max_bytes = max_mib * 1024 * 1024;
            let total: u64 = all.iter().map(|(_, m)| m.size_bytes).sum();
            let mut projected = total
                - candidates
                    .iter()
                    .map(|&i| all[i].1.size_bytes)
                    .sum::<u64>();
            for (i, (_, metadata)) in all.iter().enumerate() {
                if projected <= max_bytes {
                    break;
                }
                if candidate_set[i] || policy.preserves(&metadata.tags) {
                    continue;
                }
                candidates.push(i);
                candidate_set[i] = true;
                projected -= metadata.size_bytes;
            }
        }

        candidates.sort_by(|&a, &b| all[a].1.created_at.cmp(&all[b].1.created_at));

        for i in candidates {
            let (artifact_id, metadata) = &all[i];
            match Self::delete_files(&mut index, artifact_id) {
                Ok(freed) => {
                    report.deleted_artifacts += 1;
                    report.freed_bytes += freed;
                    *report
                        .deleted_by_category
                        .entry(metadata.category.clone())
                        .or_default() += 1;
                }
                Err(e) => report
                    .errors
                    .push(format!("failed to delete artifact {}: {}", artifact_id, e)),
            }
        }

        index.last_cleanup = Some(now);
        if let Err(e) = index.save(&self.index_path) {
            report.errors.push(format!("failed to save index: {}", e));
        }

        info!(
            "Cleanup completed: deleted {} artifacts, freed {} bytes",
            report.deleted_artifacts, report.freed_bytes
        );
        report
    }

    /// The periodic cleanup invoked by the engine.
    pub fn auto_cleanup(&self, retention_days: u32) -> CleanupReport {
        self.cleanup(&RetentionPolicy::auto(retention_days))
    }

    /// Aggregate counts and sizes per category.
    pub fn storage_stats(&self) -> StorageStats {
        let index = self.lock_index();
        let mut by_category: HashMap<String, CategoryStats> = HashMap::new();
        for entry in index.artifacts.values() {
            let stats = by_category.entry(entry.category.clone()).or_default();
            stats.count += 1;
            stats.size_bytes += entry.size_bytes;
        }

        StorageStats {
            total_artifacts: index.artifacts.len(),
            total_size_bytes: index.total_size_bytes(),
            by_category,
            last_cleanup: index.last_cleanup,
        }
    }

    /// Cross-check index entries against the filesystem.
    pub fn verify_consistency(&self) -> ConsistencyReport {
        let index = self.lock_index();
        let mut report = ConsistencyReport::default();

        for (id, entry) in index.artifacts.iter() {
            if !entry.storage_path.exists() {
                report.missing_blobs.push(id.clone());
            }
            if !entry.metadata_path.exists() {
                report.missing_metadata.push(id.clone());
            }
        }

        let indexed_blobs: std::collections::HashSet<PathBuf> = index
            .artifacts
            .values()
            .map(|e| e.storage_path.clone())
            .collect();
        if let Ok(entries) = std::fs::read_dir(&self.storage_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() && !indexed_blobs.contains(&path) {
                    report
                        .orphan_blobs
                        .push(path.file_name().unwrap_or_default().to_string_lossy().into_owned());
                }
            }
        }

        report
    }

    fn delete_files(index: &mut ArtifactIndex, artifact_id: &str) -> Result<u64, StoreError> {
        let entry = match index.remove(artifact_id) {
            Some(entry) => entry,
            None => return Ok(0),
        };

        if entry.storage_path.exists() {
            std::fs::remove_file(&entry.storage_path)
                .map_err(|e| StoreError::io(entry.storage_path.display(), e))?;
        }
        if entry.metadata_path.exists() {
            std::fs::remove_file(&entry.metadata_path)
                .map_err(|e| StoreError::io(entry.metadata_path.display(), e))?;
        }
        Ok(entry.size_bytes)
    }

    fn load_metadata(&self, path: &Path) -> Option<ArtifactMetadata> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("Unreadable artifact metadata at {}: {}", path.display(), e);
                None
            }
        }
    }

    fn lock_index(&self) -> std::sync::MutexGuard<'_, ArtifactIndex> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("artifacts")).unwrap();
        (dir, store)
    }

    fn blob_metadata(name: &str, category: &str) -> ArtifactMetadata {
        let now = Utc::now();
        ArtifactMetadata {
            artifact_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            original_path: "<blob>".to_string(),
            size_bytes: 0,
            created_at: now,
            modified_at: now,
            content_type: String::new(),
            mime_type: "application/octet-stream".to_string(),
            hash_sha256: String::new(),
            category: category.to_string(),
            tags: Vec::new(),
            version: 1,
            parent_id: None,
            workspace_id: None,
            user_id: None,
            description: None,
        }
    }

    #[test]
    fn test_store_blob_roundtrip() {
        let (_dir, store) = store();
        let id = store
            .store_blob(b"hello world\n", blob_metadata("greeting.txt", "document"))
            .unwrap();

        let artifact = store.retrieve(&id).unwrap();
        assert_eq!(artifact.metadata.size_bytes, 12);
        assert!(artifact.exists());

        // Hash matches sha256 of the content, not anything caller-supplied.
        let mut hasher = Sha256::new();
        hasher.update(b"hello world\n");
        assert_eq!(artifact.metadata.hash_sha256, hex::encode(hasher.finalize()));

        match store.get_content(&id, false).unwrap() {
            ArtifactContent::Bytes { bytes } => assert_eq!(bytes, b"hello world\n"),
            other => panic!("expected bytes, got {:?}", other),
        }
    }

    #[test]
    fn test_store_file_infers_category_and_mime() {
        let (dir, store) = store();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, b"hello world\n").unwrap();

        let id = store
            .store_file(&file, Some("ws1".into()), None, vec![], None)
            .unwrap();
        let artifact = store.retrieve(&id).unwrap();
        assert_eq!(artifact.metadata.category, "document");
        assert_eq!(artifact.metadata.mime_type, "text/plain");
        assert_eq!(artifact.metadata.size_bytes, 12);
        assert_eq!(artifact.metadata.workspace_id.as_deref(), Some("ws1"));

        // The stored blob is byte-identical to the source file.
        let stored = std::fs::read(&artifact.storage_path).unwrap();
        assert_eq!(stored, std::fs::read(&file).unwrap());
    }

    #[test]
    fn test_retrieve_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.retrieve("does-not-exist"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_get_content_text_and_hex_fallback() {
        let (_dir, store) = store();
        let text_id = store
            .store_blob(b"plain text", blob_metadata("a.txt", "document"))
            .unwrap();
        match store.get_content(&text_id, true).unwrap() {
            ArtifactContent::Text { text } => assert_eq!(text, "plain text"),
            other => panic!("expected text, got {:?}", other),
        }

        let binary_id = store
            .store_blob(&[0xff, 0xfe, 0x00], blob_metadata("b.bin", "other"))
            .unwrap();
        match store.get_content(&binary_id, true).unwrap() {
            ArtifactContent::BinaryHex { hex } => assert_eq!(hex, "fffe00"),
            other => panic!("expected hex fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_list_filters_and_order() {
        let (_dir, store) = store();
        let mut m1 = blob_metadata("old.txt", "document");
        m1.created_at = Utc::now() - Duration::hours(2);
        m1.workspace_id = Some("ws1".to_string());
        let id1 = store.store_blob(b"1", m1).unwrap();

        let mut m2 = blob_metadata("new.csv", "data");
        m2.tags = vec!["important".to_string()];
        m2.workspace_id = Some("ws2".to_string());
        let id2 = store.store_blob(b"2", m2).unwrap();

        let all = store.list(&ArtifactFilter::default());
        assert_eq!(all.len(), 2);
        // Newest first
        assert_eq!(all[0].artifact_id, id2);

        let docs = store.list(&ArtifactFilter {
            category: Some("document".to_string()),
            ..Default::default()
        });
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].artifact_id, id1);

        let tagged = store.list(&ArtifactFilter {
            tags: Some(vec!["important".to_string()]),
            ..Default::default()
        });
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].artifact_id, id2);
    }

    #[test]
    fn test_cleanup_respects_preserve_tags() {
        let (_dir, store) = store();
        let mut pinned = blob_metadata("keep.tmp", "temporary");
        pinned.tags = vec!["keep".to_string()];
        let pinned_id = store.store_blob(b"keep me", pinned).unwrap();

        let doomed_id = store
            .store_blob(b"scratch", blob_metadata("x.tmp", "temporary"))
            .unwrap();

        let report = store.cleanup(&RetentionPolicy::auto(7));
        assert_eq!(report.deleted_artifacts, 1);
        assert_eq!(report.deleted_by_category.get("temporary"), Some(&1));

        assert!(store.retrieve(&pinned_id).is_ok());
        assert!(store.retrieve(&doomed_id).is_err());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let (_dir, store) = store();
        store
            .store_blob(b"scratch", blob_metadata("x.tmp", "temporary"))
            .unwrap();

        let policy = RetentionPolicy::auto(7);
        let first = store.cleanup(&policy);
        assert_eq!(first.deleted_artifacts, 1);

        let second = store.cleanup(&policy);
        assert_eq!(second.deleted_artifacts, 0);
        assert_eq!(second.freed_bytes, 0);
    }

    #[test]
    fn test_cleanup_size_pressure_deletes_oldest_first() {
        let (_dir, store) = store();
        let mut old = blob_metadata("old.bin", "other");
        old.created_at = Utc::now() - Duration::days(2);
        let old_id = store.store_blob(&vec![0u8; 1024 * 1024], old).unwrap();

        let new_id = store
            .store_blob(&vec![0u8; 512 * 1024], blob_metadata("new.bin", "other"))
            .unwrap();

        let report = store.cleanup(&RetentionPolicy {
            max_total_size_mib: Some(1),
            ..Default::default()
        });
        assert_eq!(report.deleted_artifacts, 1);
        assert!(store.retrieve(&old_id).is_err());
        assert!(store.retrieve(&new_id).is_ok());
    }

    #[test]
    fn test_versioning_links_parent() {
        let (_dir, store) = store();
        let v1 = store
            .store_blob(b"first", blob_metadata("doc.txt", "document"))
            .unwrap();
        let v2 = store.store_version(&v1, b"second").unwrap();

        let artifact = store.retrieve(&v2).unwrap();
        assert_eq!(artifact.metadata.version, 2);
        assert_eq!(artifact.metadata.parent_id.as_deref(), Some(v1.as_str()));
    }

    #[test]
    fn test_consistency_check_reports_orphans() {
        let (_dir, store) = store();
        let id = store
            .store_blob(b"x", blob_metadata("a.txt", "document"))
            .unwrap();
        assert!(store.verify_consistency().is_clean());

        // Orphan blob: present in storage/, absent from the index.
        std::fs::write(store.base_dir().join("storage/orphan_file"), b"o").unwrap();
        let report = store.verify_consistency();
        assert_eq!(report.orphan_blobs, vec!["orphan_file".to_string()]);

        // Missing blob: delete the file behind an index entry.
        let artifact = store.retrieve(&id).unwrap();
        std::fs::remove_file(&artifact.storage_path).unwrap();
        let report = store.verify_consistency();
        assert_eq!(report.missing_blobs, vec![id]);
    }

    #[test]
    fn test_storage_stats() {
        let (_dir, store) = store();
        store
            .store_blob(b"12345", blob_metadata("a.txt", "document"))
            .unwrap();
        store
            .store_blob(b"123", blob_metadata("b.csv", "data"))
            .unwrap();

        let stats = store.storage_stats();
        assert_eq!(stats.total_artifacts, 2);
        assert_eq!(stats.total_size_bytes, 8);
        assert_eq!(stats.by_category["document"].count, 1);
        assert_eq!(stats.by_category["data"].size_bytes, 3);
    }
}
