use async_trait::async_trait;

use crate::store::types::{ArtifactMeta, StoredArtifact};

/// Append-only artifact cache keyed by content hash.
///
/// Entries are never rewritten in place: a `put` for an existing hash replaces
/// the whole entry atomically.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get(&self, hash: &str) -> Result<Option<StoredArtifact>, StoreError>;

    async fn put(&self, artifact: StoredArtifact) -> Result<(), StoreError>;

    /// Metadata of every entry, ordered by hash.
    async fn list(&self) -> Result<Vec<ArtifactMeta>, StoreError>;

    /// Returns whether an entry was removed.
    async fn remove(&self, hash: &str) -> Result<bool, StoreError>;

    /// Removes every entry and returns how many there were.
    async fn clear(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("`{0}` is not a content hash (expected 64 lowercase hex characters)")]
    InvalidHash(String),
    #[error("i/o error on {path}: {message}")]
    Io { path: String, message: String },
    #[error("artifact {hash} is corrupt: {message}")]
    Corrupt { hash: String, message: String },
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for pipewright_core::BuildError {
    fn from(e: StoreError) -> Self {
        pipewright_core::BuildError::Io(e.to_string())
    }
}
