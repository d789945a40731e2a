mod config;
pub mod events;
pub mod metrics;
mod pipeline;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use pipewright_core::{
    synthesize, BuildError, PipelineAssembler, PipelineMode, Registry, ShapeDescriptor, ShapeKey, SynthesizedModule,
};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::compile::CompilationBackend;
use crate::runtime::OperationTable;

pub use config::{EngineConfig, StrategyConfig, ToolchainConfig, CACHE_DIR_ENV, TOOLCHAIN_ENV};
pub use events::{BuildEvent, CompositeEventSink, EventSink, NoOpEventSink, TracingEventSink};
pub use metrics::{BuildMetrics, MetricsCollector, MetricsEventSink};
pub use pipeline::{BuildPhase, CompiledPipeline};

type Outcome = Result<Arc<CompiledPipeline>, BuildError>;

#[derive(Default)]
struct ShapeSlot {
    phase: Mutex<BuildPhase>,
    source: Mutex<Option<Arc<SynthesizedModule>>>,
    outcome: OnceCell<Outcome>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds pipelines on first use and hands out the compiled result.
///
/// Every `(shape, mode)` pair owns one slot. Concurrent callers of the same
/// slot share a single build and all observe its outcome, success or error.
/// A failed build stays failed until [`retry`](Self::retry) resets it; a
/// cancelled build is not recorded, so the next call starts a new one.
pub struct PipelineEngine {
    registry: Arc<Registry>,
    backend: Arc<CompilationBackend>,
    shapes: Mutex<HashMap<ShapeKey, Arc<ShapeSlot>>>,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
}

impl PipelineEngine {
    pub fn new(registry: Arc<Registry>, operations: OperationTable, config: &EngineConfig) -> Self {
        let backend = CompilationBackend::new(config.build_strategy(), operations);
        Self::with_backend(registry, Arc::new(backend))
    }

    pub fn with_backend(registry: Arc<Registry>, backend: Arc<CompilationBackend>) -> Self {
        Self {
            registry,
            backend,
            shapes: Mutex::new(HashMap::new()),
            events: Arc::new(TracingEventSink),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<CompilationBackend> {
        &self.backend
    }

    pub async fn pipeline(&self, shape: &ShapeDescriptor) -> Outcome {
        self.build(ShapeKey::new(shape.clone(), PipelineMode::TopLevel)).await
    }

    pub async fn nested(&self, shape: &ShapeDescriptor) -> Outcome {
        self.build(ShapeKey::new(shape.clone(), PipelineMode::Nested)).await
    }

    pub async fn build(&self, key: ShapeKey) -> Outcome {
        let slot = self.slot(&key);
        if let Some(done) = slot.outcome.get() {
            return done.clone();
        }
        if self.shutdown.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        slot.outcome.get_or_try_init(|| self.run(&key, &slot)).await?.clone()
    }

    pub fn phase(&self, key: &ShapeKey) -> BuildPhase {
        lock(&self.shapes)
            .get(key)
            .map(|s| *lock(&s.phase))
            .unwrap_or(BuildPhase::Unbuilt)
    }

    /// Generated source of the latest build attempt, kept even when
    /// compilation failed.
    pub fn source(&self, key: &ShapeKey) -> Option<Arc<SynthesizedModule>> {
        lock(&self.shapes).get(key).and_then(|s| lock(&s.source).clone())
    }

    /// Resets a shape whose build failed with a retryable error. Returns
    /// whether a reset happened.
    pub fn retry(&self, key: &ShapeKey) -> bool {
        let mut shapes = lock(&self.shapes);
        let retryable = matches!(
            shapes.get(key).and_then(|s| s.outcome.get()),
            Some(Err(e)) if e.is_retryable()
        );
        if retryable {
            shapes.insert(key.clone(), Arc::new(ShapeSlot::default()));
            tracing::info!(shape = %key, "build reset for retry");
        }
        retryable
    }

    /// Cancels in-flight builds. Pipelines that are already ready keep working;
    /// new builds fail with `Cancelled`.
    pub fn shutdown(&self) {
        tracing::info!("pipeline engine shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Drops every shape slot and the backend's module table.
    pub fn clear_memory(&self) {
        lock(&self.shapes).clear();
        self.backend.clear_memory();
    }

    fn slot(&self, key: &ShapeKey) -> Arc<ShapeSlot> {
        lock(&self.shapes).entry(key.clone()).or_default().clone()
    }

    async fn enter(&self, key: &ShapeKey, slot: &ShapeSlot, phase: BuildPhase) {
        *lock(&slot.phase) = phase;
        tracing::debug!(shape = %key, %phase, "build phase");
        self.events
            .emit(BuildEvent::PhaseChanged {
                shape: key.to_string(),
                phase,
            })
            .await;
    }

    /// The outer error is only ever `Cancelled`, which must not be memoized.
    async fn run(&self, key: &ShapeKey, slot: &ShapeSlot) -> Result<Outcome, BuildError> {
        let shape = key.to_string();
        let started = Instant::now();
        self.events.emit(BuildEvent::BuildStarted { shape: shape.clone() }).await;

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(BuildError::Cancelled),
            r = self.stages(key, slot) => r,
        };

        match outcome {
            Ok(pipeline) => {
                self.enter(key, slot, BuildPhase::Ready).await;
                self.events
                    .emit(BuildEvent::BuildSucceeded {
                        shape,
                        module: pipeline.module_name().to_string(),
                        hash: pipeline.content_hash().to_string(),
                        cached: pipeline.is_cached(),
                        duration_ms: started.elapsed().as_millis() as u64,
                    })
                    .await;
                Ok(Ok(pipeline))
            }
            Err(BuildError::Cancelled) => {
                *lock(&slot.phase) = BuildPhase::Unbuilt;
                self.events.emit(BuildEvent::BuildCancelled { shape }).await;
                Err(BuildError::Cancelled)
            }
            Err(e) => {
                self.enter(key, slot, BuildPhase::BuildFailed).await;
                self.events
                    .emit(BuildEvent::BuildFailed {
                        shape,
                        error: e.to_string(),
                        retryable: e.is_retryable(),
                    })
                    .await;
                Ok(Err(e))
            }
        }
    }

    async fn stages(&self, key: &ShapeKey, slot: &ShapeSlot) -> Outcome {
        self.enter(key, slot, BuildPhase::Assembling).await;
        let assembler = PipelineAssembler::new(self.registry.clone());
        let (shape, mode) = (key.shape.clone(), key.mode);
        let method = blocking(move || assembler.assemble(&shape, mode)).await?;

        self.enter(key, slot, BuildPhase::Synthesizing).await;
        let module = Arc::new(blocking(move || synthesize(&method)).await?);
        *lock(&slot.source) = Some(module.clone());

        self.enter(key, slot, BuildPhase::Compiling).await;
        let loaded = self.backend.load(&module).await?;
        if !loaded.has_routine(&module.method_name) {
            return Err(BuildError::EmissionInconsistency {
                module: module.module_name.clone(),
                diagnostics: vec![format!("routine `{}` is missing", module.method_name)],
                generated: module.source.clone(),
            });
        }
        Ok(Arc::new(CompiledPipeline::new(key.clone(), module, loaded)))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, BuildError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, BuildError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BuildError::TaskJoin(e.to_string()))?
}
