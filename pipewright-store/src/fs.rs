use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::store::{check_hash, ArtifactMeta, ArtifactStore, StoreError, StoredArtifact};

/// Filesystem store laid out as `<root>/<hash[..2]>/<hash>.json`.
///
/// Writes go to a uniquely named temporary file that is renamed into place, so
/// readers never observe a partially written artifact and concurrent writers of
/// the same hash cannot interleave.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, hash: &str) -> Result<PathBuf, StoreError> {
        check_hash(hash)?;
        Ok(self.root.join(&hash[..2]).join(format!("{hash}.json")))
    }

    /// Removes entries created more than `older_than` ago. Eviction is only
    /// ever explicit; nothing prunes in the background.
    pub async fn prune(&self, older_than: Duration) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - older_than;
        let mut removed = 0;
        for meta in self.list().await? {
            if meta.created_at < cutoff && self.remove(&meta.hash).await? {
                removed += 1;
            }
        }
        tracing::info!(removed, root = %self.root.display(), "pruned artifacts");
        Ok(removed)
    }

    /// Artifact files only: `<hash>.json` inside its own shard directory.
    /// Anything else under the root, including in-flight temporary files, is
    /// left alone.
    async fn entry_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut out = Vec::new();
        let mut shards = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };
        while let Some(shard) = shards.next_entry().await.map_err(|e| StoreError::io(&self.root, e))? {
            let shard_path = shard.path();
            let Some(prefix) = shard_path.file_name().and_then(|n| n.to_str()).filter(|n| is_shard(n)) else {
                continue;
            };
            let file_type = shard.file_type().await.map_err(|e| StoreError::io(&shard_path, e))?;
            if !file_type.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(&shard_path)
                .await
                .map_err(|e| StoreError::io(&shard_path, e))?;
            while let Some(file) = files.next_entry().await.map_err(|e| StoreError::io(&shard_path, e))? {
                let path = file.path();
                if hash_of(&path).is_some_and(|h| h.starts_with(prefix)) {
                    out.push(path);
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

fn is_shard(name: &str) -> bool {
    name.len() == 2 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn hash_of(path: &Path) -> Option<&str> {
    if path.extension()? != "json" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    pipewright_core::is_content_hash(stem).then_some(stem)
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn get(&self, hash: &str) -> Result<Option<StoredArtifact>, StoreError> {
        let path = self.path_for(hash)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let artifact: StoredArtifact = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            hash: hash.to_string(),
            message: e.to_string(),
        })?;
        if artifact.hash != hash {
            return Err(StoreError::Corrupt {
                hash: hash.to_string(),
                message: format!("file holds artifact {}", artifact.hash),
            });
        }
        Ok(Some(artifact))
    }

    async fn put(&self, artifact: StoredArtifact) -> Result<(), StoreError> {
        let path = self.path_for(&artifact.hash)?;
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let bytes = serde_json::to_vec_pretty(&artifact).map_err(|e| StoreError::Other(e.to_string()))?;
        let tmp = dir.join(format!(".{}.{}.tmp", artifact.hash, Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::io(&tmp, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::io(&path, e));
        }
        tracing::debug!(hash = %artifact.hash, module = %artifact.module_name, bytes = bytes.len(), "stored artifact");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ArtifactMeta>, StoreError> {
        let mut out = Vec::new();
        for path in self.entry_files().await? {
            let Some(hash) = hash_of(&path) else {
                continue;
            };
            match self.get(hash).await {
                Ok(Some(artifact)) => {
                    let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
                    out.push(artifact.meta(size));
                }
                Ok(None) => {}
                Err(StoreError::Corrupt { hash, message }) => {
                    tracing::warn!(%hash, %message, "skipping corrupt artifact");
                }
                Err(e) => return Err(e),
            }
        }
        out.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(out)
    }

    async fn remove(&self, hash: &str) -> Result<bool, StoreError> {
        let path = self.path_for(hash)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for path in self.entry_files().await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        tracing::info!(removed, root = %self.root.display(), "cleared artifact store");
        Ok(removed)
    }
}
