use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pipewright_core::{BuildError, ContentHash, SynthesizedModule};
use tokio::sync::OnceCell;

use crate::compile::strategy::CompilationStrategy;
use crate::runtime::{LoadedModule, OperationTable};

type LoadCell = Arc<OnceCell<Result<Arc<LoadedModule>, BuildError>>>;

/// Loads synthesized modules, compiling each content hash at most once per
/// process.
///
/// Concurrent callers for one hash share a single attempt and all observe its
/// outcome, error included. Successful loads are kept for the life of the
/// backend (until [`clear_memory`](Self::clear_memory)); a failed attempt is
/// dropped once it settles, so a later call starts over.
pub struct CompilationBackend {
    strategy: Arc<dyn CompilationStrategy>,
    operations: Arc<OperationTable>,
    loaded: Mutex<HashMap<ContentHash, LoadCell>>,
}

impl CompilationBackend {
    pub fn new(strategy: Arc<dyn CompilationStrategy>, operations: OperationTable) -> Self {
        Self {
            strategy,
            operations: Arc::new(operations),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn strategy(&self) -> &Arc<dyn CompilationStrategy> {
        &self.strategy
    }

    pub fn operations(&self) -> &OperationTable {
        &self.operations
    }

    pub async fn load(&self, module: &SynthesizedModule) -> Result<Arc<LoadedModule>, BuildError> {
        let hash = &module.content_hash;
        let cell = self.cell(hash);
        let outcome = cell.get_or_init(|| self.load_uncached(module)).await.clone();
        if outcome.is_err() {
            let mut table = self.table();
            if table.get(hash).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                table.remove(hash);
            }
        }
        outcome
    }

    /// Number of modules currently held in memory.
    pub fn loaded_count(&self) -> usize {
        self.table()
            .values()
            .filter(|c| matches!(c.get(), Some(Ok(_))))
            .count()
    }

    /// Forgets every loaded module. Modules already handed out stay valid.
    pub fn clear_memory(&self) {
        let mut table = self.table();
        let dropped = table.len();
        table.clear();
        tracing::debug!(dropped, "cleared in-memory module table");
    }

    fn cell(&self, hash: &ContentHash) -> LoadCell {
        self.table().entry(hash.clone()).or_default().clone()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<ContentHash, LoadCell>> {
        self.loaded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn load_uncached(&self, module: &SynthesizedModule) -> Result<Arc<LoadedModule>, BuildError> {
        self.compile_and_link(module)
            .await
            .map_err(|e| with_generated(e, &module.source))
    }

    async fn compile_and_link(&self, module: &SynthesizedModule) -> Result<Arc<LoadedModule>, BuildError> {
        let hash = &module.content_hash;
        let name = &module.module_name;
        if let Some(image) = self.strategy.try_load_existing(hash, name).await? {
            let loaded = LoadedModule::link(image, &self.operations, true)?;
            tracing::info!(module = %name, hash = %hash.short(), strategy = self.strategy.name(), "module loaded from cache");
            return Ok(Arc::new(loaded));
        }
        let image = self.strategy.compile(hash, name, &module.source).await?;
        let loaded = LoadedModule::link(image, &self.operations, false)?;
        tracing::info!(module = %name, hash = %hash.short(), strategy = self.strategy.name(), "module compiled");
        Ok(Arc::new(loaded))
    }
}

/// Fills in the generated source on inconsistencies raised below the
/// synthesizer, which only see the compiled image.
fn with_generated(err: BuildError, source: &str) -> BuildError {
    match err {
        BuildError::EmissionInconsistency {
            module,
            diagnostics,
            generated,
        } if generated.is_empty() => BuildError::EmissionInconsistency {
            module,
            diagnostics,
            generated: source.to_string(),
        },
        other => other,
    }
}
