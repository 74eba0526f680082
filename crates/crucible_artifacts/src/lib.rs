//! Content-addressed artifact storage with a persistent metadata index.
//!
//! # Layout
//!
//! ```text
//! <base>/
//!   storage/<artifact_id>_<name>     # blob
//!   metadata/<artifact_id>.json      # metadata document
//!   artifact_index.json              # full index, rewritten atomically
//! ```
//!
//! The index is the source of truth for listings; blob and metadata files
//! are the source of truth for content. `verify_consistency` reports any
//! drift between the two.

mod category;
mod index;
mod metadata;
mod retention;
mod store;

pub use category::categorize;
pub use index::{ArtifactIndex, IndexEntry};
pub use metadata::{Artifact, ArtifactInfo, ArtifactMetadata};
pub use retention::{CleanupReport, RetentionPolicy};
pub use store::{ArtifactContent, ArtifactFilter, ArtifactStore, ConsistencyReport, StorageStats};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Index serialization error: {0}")]
    Index(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_string(),
            source,
        }
    }
}
