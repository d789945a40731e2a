use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pipewright_core::{BuildError, ContentHash};
use pipewright_store::{ArtifactStore, StoreError, StoredArtifact};
use tokio::sync::RwLock;

use crate::compile::toolchain::Toolchain;
use crate::image::{ModuleImage, IMAGE_FORMAT_VERSION};

/// Where compiled images come from and where they go.
#[async_trait]
pub trait CompilationStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// An already compiled image for `hash`, if the strategy holds one.
    async fn try_load_existing(&self, hash: &ContentHash, module_name: &str) -> Result<Option<ModuleImage>, BuildError>;

    /// Compiles `source` and keeps the image for later loads.
    async fn compile(&self, hash: &ContentHash, module_name: &str, source: &str) -> Result<ModuleImage, BuildError>;
}

/// Process-local table of images.
pub struct InMemoryStrategy {
    toolchain: Arc<dyn Toolchain>,
    images: RwLock<HashMap<ContentHash, ModuleImage>>,
}

impl InMemoryStrategy {
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            toolchain,
            images: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.images.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.images.read().await.is_empty()
    }
}

#[async_trait]
impl CompilationStrategy for InMemoryStrategy {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn try_load_existing(&self, hash: &ContentHash, _module_name: &str) -> Result<Option<ModuleImage>, BuildError> {
        Ok(self.images.read().await.get(hash).cloned())
    }

    async fn compile(&self, hash: &ContentHash, module_name: &str, source: &str) -> Result<ModuleImage, BuildError> {
        let image = self.toolchain.compile(module_name, hash, source).await?;
        self.images.write().await.insert(hash.clone(), image.clone());
        Ok(image)
    }
}

/// Images persisted in an [`ArtifactStore`], surviving restarts.
pub struct PersistentStrategy {
    toolchain: Arc<dyn Toolchain>,
    store: Arc<dyn ArtifactStore>,
}

impl PersistentStrategy {
    pub fn new(toolchain: Arc<dyn Toolchain>, store: Arc<dyn ArtifactStore>) -> Self {
        Self { toolchain, store }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }
}

#[async_trait]
impl CompilationStrategy for PersistentStrategy {
    fn name(&self) -> &str {
        "persistent"
    }

    async fn try_load_existing(&self, hash: &ContentHash, module_name: &str) -> Result<Option<ModuleImage>, BuildError> {
        let artifact = match self.store.get(hash.as_str()).await {
            Ok(Some(a)) => a,
            Ok(None) => return Ok(None),
            Err(StoreError::Corrupt { message, .. }) => {
                tracing::warn!(%hash, %message, "corrupt artifact, recompiling");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_value::<ModuleImage>(artifact.payload) {
            Ok(image)
                if image.format_version == IMAGE_FORMAT_VERSION
                    && image.content_hash == hash.as_str()
                    && image.name == module_name =>
            {
                tracing::debug!(%hash, module = %module_name, "artifact reused");
                Ok(Some(image))
            }
            Ok(_) => {
                tracing::warn!(%hash, module = %module_name, "stale artifact, recompiling");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(%hash, error = %e, "unreadable artifact payload, recompiling");
                Ok(None)
            }
        }
    }

    async fn compile(&self, hash: &ContentHash, module_name: &str, source: &str) -> Result<ModuleImage, BuildError> {
        let image = self.toolchain.compile(module_name, hash, source).await?;
        let payload = serde_json::to_value(&image).map_err(|e| BuildError::Io(e.to_string()))?;
        self.store
            .put(StoredArtifact::new(hash.as_str(), module_name, payload))
            .await?;
        Ok(image)
    }
}
