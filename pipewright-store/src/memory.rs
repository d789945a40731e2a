use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{check_hash, ArtifactMeta, ArtifactStore, StoreError, StoredArtifact};

/// Process-local store, mostly useful in tests.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    entries: RwLock<BTreeMap<String, StoredArtifact>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn get(&self, hash: &str) -> Result<Option<StoredArtifact>, StoreError> {
        check_hash(hash)?;
        Ok(self.entries.read().await.get(hash).cloned())
    }

    async fn put(&self, artifact: StoredArtifact) -> Result<(), StoreError> {
        check_hash(&artifact.hash)?;
        self.entries.write().await.insert(artifact.hash.clone(), artifact);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ArtifactMeta>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .map(|a| a.meta(a.payload.to_string().len() as u64))
            .collect())
    }

    async fn remove(&self, hash: &str) -> Result<bool, StoreError> {
        check_hash(hash)?;
        Ok(self.entries.write().await.remove(hash).is_some())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().await;
        let n = entries.len();
        entries.clear();
        Ok(n)
    }
}
