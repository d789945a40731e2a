use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pipewright_core::{
    load_manifest, BuildError, ContentHash, Manifest, PipelineAssembler, PipelineMode, ShapeDescriptor, ShapeKey,
};
use pipewright_exec::engine::{BuildEvent, EventSink, MetricsCollector, MetricsEventSink};
use pipewright_exec::{
    manifest_operations, BuildPhase, CompilationBackend, CompilationStrategy, Fault, FnOperation, InMemoryStrategy,
    ModuleImage, PersistentStrategy, PipelineEngine, ScriptToolchain, Toolchain,
};
use pipewright_store::FsArtifactStore;
use serde_json::{json, Value};
use tokio::sync::Notify;

const MANIFEST: &str = r#"
failures:
  - name: BaseError
  - name: SpecificError
    extends: BaseError
shapes:
  - name: orders
    parameters:
      - { name: envelope, type: Envelope }
    returns: Result
  - name: ping
    returns: Pong
  - name: broken
    returns: Missing
  - name: settle
    parameters:
      - { name: envelope, type: Envelope }
    returns: Result
sources:
  - name: user-id
    type: UserId
    kind: field
    context: Envelope
    field: user_id
  - name: pong
    type: Pong
    kind: constant
    value: pong
builders:
  - name: load
    stage: binding
    match: "^orders$"
    steps:
      - call: load_user
        args: [{ var: UserId }]
        creates: User
  - name: execute
    stage: execution
    match: "^orders$"
    steps:
      - call: execute
        args: [{ var: User }]
        creates: Result
    handlers:
      - category: BaseError
        steps:
          - call: on_base
            args: [{ var: Fault }]
      - category: SpecificError
        steps:
          - call: on_specific
            args: [{ var: Fault }]
    finally:
      - call: finish_span
  - name: settle
    stage: execution
    match: "^settle$"
    steps:
      - call: execute
        args: [{ var: UserId }]
        creates: Result
    handlers:
      - category: BaseError
        steps:
          - call: on_base
            args: [{ var: Fault }]
operations:
  - name: load_user
    kind: echo
"#;

type Log = Arc<Mutex<Vec<String>>>;

struct CountingToolchain {
    inner: ScriptToolchain,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingToolchain {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: ScriptToolchain::new(),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Toolchain for CountingToolchain {
    fn name(&self) -> &str {
        "counting"
    }

    async fn compile(&self, module_name: &str, hash: &ContentHash, source: &str) -> Result<ModuleImage, BuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.compile(module_name, hash, source).await
    }
}

/// Unavailable for the first `failures` calls.
struct FlakyToolchain {
    inner: ScriptToolchain,
    calls: AtomicUsize,
    failures: usize,
}

#[async_trait]
impl Toolchain for FlakyToolchain {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn compile(&self, module_name: &str, hash: &ContentHash, source: &str) -> Result<ModuleImage, BuildError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(BuildError::ToolchainUnavailable {
                toolchain: "flaky".into(),
                message: "not yet".into(),
            });
        }
        self.inner.compile(module_name, hash, source).await
    }
}

/// Always unavailable, after `delay`.
struct DownToolchain {
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl Toolchain for DownToolchain {
    fn name(&self) -> &str {
        "down"
    }

    async fn compile(&self, _module_name: &str, _hash: &ContentHash, _source: &str) -> Result<ModuleImage, BuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Err(BuildError::ToolchainUnavailable {
            toolchain: "down".into(),
            message: "offline".into(),
        })
    }
}

/// Produces images in a format the runtime does not accept.
struct FutureFormatToolchain {
    inner: ScriptToolchain,
}

#[async_trait]
impl Toolchain for FutureFormatToolchain {
    fn name(&self) -> &str {
        "future-format"
    }

    async fn compile(&self, module_name: &str, hash: &ContentHash, source: &str) -> Result<ModuleImage, BuildError> {
        let mut image = self.inner.compile(module_name, hash, source).await?;
        image.format_version += 1;
        Ok(image)
    }
}

/// Never finishes compiling `stall_on`.
struct StallingToolchain {
    inner: ScriptToolchain,
    stall_on: &'static str,
    entered: Notify,
}

#[async_trait]
impl Toolchain for StallingToolchain {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn compile(&self, module_name: &str, hash: &ContentHash, source: &str) -> Result<ModuleImage, BuildError> {
        if module_name == self.stall_on {
            self.entered.notify_one();
            return std::future::pending().await;
        }
        self.inner.compile(module_name, hash, source).await
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<BuildEvent>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: BuildEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn manifest() -> Manifest {
    load_manifest(MANIFEST).unwrap()
}

fn shape(name: &str) -> ShapeDescriptor {
    manifest().shape(name).unwrap().clone()
}

fn key(name: &str) -> ShapeKey {
    ShapeKey::new(shape(name), PipelineMode::TopLevel)
}

fn operations(manifest: &Manifest, log: &Log) -> pipewright_exec::OperationTable {
    let mut ops = manifest_operations(manifest);
    for name in ["on_base", "on_specific", "finish_span"] {
        let log = log.clone();
        ops.register(
            name,
            FnOperation::new(move |_args| {
                log.lock().unwrap().push(name.to_string());
                Ok(Value::Null)
            }),
        );
    }
    let log = log.clone();
    ops.register(
        "execute",
        FnOperation::new(move |args| {
            log.lock().unwrap().push("execute".to_string());
            match args.first().and_then(Value::as_str) {
                Some("specific") => Err(Fault::new("SpecificError", "specific")),
                Some("base") => Err(Fault::new("BaseError", "base")),
                Some("boom") => Err(Fault::new("Unrelated", "boom")),
                other => Ok(json!({ "ok": other })),
            }
        }),
    );
    ops
}

fn engine_with(strategy: Arc<dyn CompilationStrategy>, log: &Log) -> PipelineEngine {
    let manifest = manifest();
    let backend = CompilationBackend::new(strategy, operations(&manifest, log));
    PipelineEngine::with_backend(manifest.registry().unwrap(), Arc::new(backend))
}

fn in_memory(toolchain: Arc<dyn Toolchain>) -> Arc<dyn CompilationStrategy> {
    Arc::new(InMemoryStrategy::new(toolchain))
}

fn take(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_build() {
    let tc = CountingToolchain::new(Duration::from_millis(50));
    let engine = Arc::new(engine_with(in_memory(tc.clone()), &Log::default()));
    let orders = shape("orders");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            let orders = orders.clone();
            tokio::spawn(async move { engine.pipeline(&orders).await })
        })
        .collect();
    let mut pipelines = Vec::new();
    for h in handles {
        pipelines.push(h.await.unwrap().unwrap());
    }

    assert_eq!(tc.calls(), 1);
    assert!(pipelines.iter().all(|p| Arc::ptr_eq(p, &pipelines[0])));
    assert_eq!(engine.phase(&key("orders")), BuildPhase::Ready);
}

#[tokio::test]
async fn cleared_memory_reuses_compiled_images() {
    let tc = CountingToolchain::new(Duration::ZERO);
    let engine = engine_with(in_memory(tc.clone()), &Log::default());
    let orders = shape("orders");

    let first = engine.pipeline(&orders).await.unwrap();
    assert!(!first.is_cached());

    engine.clear_memory();
    assert_eq!(engine.phase(&key("orders")), BuildPhase::Unbuilt);
    assert_eq!(engine.backend().loaded_count(), 0);

    let second = engine.pipeline(&orders).await.unwrap();
    assert!(second.is_cached());
    assert_eq!(second.content_hash(), first.content_hash());
    assert_eq!(second.source().source, first.source().source);
    assert_eq!(tc.calls(), 1);

    // handed-out pipelines outlive the table
    let out = first.invoke(vec![json!({ "user_id": "u1" })]).await.unwrap();
    assert_eq!(out, json!({ "ok": "u1" }));
}

#[tokio::test]
async fn persistent_cache_survives_engines_and_heals_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let persistent = |tc: Arc<CountingToolchain>| -> Arc<dyn CompilationStrategy> {
        Arc::new(PersistentStrategy::new(tc, Arc::new(FsArtifactStore::new(dir.path()))))
    };
    let orders = shape("orders");

    let tc1 = CountingToolchain::new(Duration::ZERO);
    let built = engine_with(persistent(tc1.clone()), &Log::default())
        .pipeline(&orders)
        .await
        .unwrap();
    assert!(!built.is_cached());
    assert_eq!(tc1.calls(), 1);

    let tc2 = CountingToolchain::new(Duration::ZERO);
    let reused = engine_with(persistent(tc2.clone()), &Log::default())
        .pipeline(&orders)
        .await
        .unwrap();
    assert!(reused.is_cached());
    assert_eq!(reused.content_hash(), built.content_hash());
    assert_eq!(tc2.calls(), 0);

    let path = FsArtifactStore::new(dir.path()).path_for(built.content_hash()).unwrap();
    std::fs::write(&path, b"{ truncated").unwrap();
    let tc3 = CountingToolchain::new(Duration::ZERO);
    let healed = engine_with(persistent(tc3.clone()), &Log::default())
        .pipeline(&orders)
        .await
        .unwrap();
    assert!(!healed.is_cached());
    assert_eq!(tc3.calls(), 1);
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(serde_json::from_str::<Value>(&text).is_ok());
}

#[tokio::test]
async fn handlers_and_finally_run_at_runtime() {
    let log = Log::default();
    let engine = engine_with(in_memory(Arc::new(ScriptToolchain::new())), &log);
    let p = engine.pipeline(&shape("orders")).await.unwrap();

    let out = p.invoke(vec![json!({ "user_id": "u7" })]).await.unwrap();
    assert_eq!(out, json!({ "ok": "u7" }));
    assert_eq!(take(&log), vec!["execute", "finish_span"]);

    let out = p.invoke(vec![json!({ "user_id": "specific" })]).await.unwrap();
    assert_eq!(out, Value::Null);
    assert_eq!(take(&log), vec!["execute", "on_specific", "finish_span"]);

    p.invoke(vec![json!({ "user_id": "base" })]).await.unwrap();
    assert_eq!(take(&log), vec!["execute", "on_base", "finish_span"]);

    let fault = p.invoke(vec![json!({ "user_id": "boom" })]).await.unwrap_err();
    assert_eq!(fault.category, "Unrelated");
    assert_eq!(take(&log), vec!["execute", "finish_span"]);
}

#[tokio::test]
async fn parent_handler_catches_child_categories() {
    let log = Log::default();
    let engine = engine_with(in_memory(Arc::new(ScriptToolchain::new())), &log);
    let p = engine.pipeline(&shape("settle")).await.unwrap();
    assert!(
        p.source().source.contains("failure SpecificError : BaseError;"),
        "{}",
        p.source().source
    );

    let out = p.invoke(vec![json!({ "user_id": "specific" })]).await.unwrap();
    assert_eq!(out, Value::Null);
    assert_eq!(take(&log), vec!["execute", "on_base"]);

    let fault = p.invoke(vec![json!({ "user_id": "boom" })]).await.unwrap_err();
    assert_eq!(fault.category, "Unrelated");
    assert_eq!(take(&log), vec!["execute"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_loads_share_a_failed_attempt() {
    let tc = Arc::new(DownToolchain {
        calls: AtomicUsize::new(0),
        delay: Duration::from_millis(50),
    });
    let manifest = manifest();
    let backend = Arc::new(CompilationBackend::new(
        in_memory(tc.clone()),
        operations(&manifest, &Log::default()),
    ));
    let module = Arc::new(
        PipelineAssembler::new(manifest.registry().unwrap())
            .generate(&shape("orders"), PipelineMode::TopLevel)
            .unwrap(),
    );

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let backend = backend.clone();
            let module = module.clone();
            tokio::spawn(async move { backend.load(&module).await })
        })
        .collect();
    for h in handles {
        let err = h.await.unwrap().unwrap_err();
        assert!(matches!(err, BuildError::ToolchainUnavailable { .. }), "{err:?}");
    }
    assert_eq!(tc.calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.loaded_count(), 0);

    // a settled failure is not kept
    backend.load(&module).await.unwrap_err();
    assert_eq!(tc.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn link_failures_carry_the_generated_source() {
    let tc = Arc::new(FutureFormatToolchain {
        inner: ScriptToolchain::new(),
    });
    let engine = engine_with(in_memory(tc), &Log::default());
    let err = engine.pipeline(&shape("orders")).await.unwrap_err();
    match err {
        BuildError::EmissionInconsistency {
            module,
            diagnostics,
            generated,
        } => {
            assert_eq!(module, "pipeline_orders");
            assert!(diagnostics[0].contains("image format"), "{diagnostics:?}");
            assert!(generated.contains("module pipeline_orders {"), "{generated}");
        }
        other => panic!("expected emission inconsistency, got {other:?}"),
    }
    assert_eq!(engine.phase(&key("orders")), BuildPhase::BuildFailed);
}

#[tokio::test]
async fn failed_builds_are_isolated_and_terminal() {
    let tc = CountingToolchain::new(Duration::ZERO);
    let engine = engine_with(in_memory(tc.clone()), &Log::default());

    let err = engine.pipeline(&shape("broken")).await.unwrap_err();
    assert!(matches!(err, BuildError::MissingDependency { .. }), "{err:?}");
    assert_eq!(engine.phase(&key("broken")), BuildPhase::BuildFailed);
    assert_eq!(engine.pipeline(&shape("broken")).await.unwrap_err(), err);
    assert!(!engine.retry(&key("broken")));

    engine.pipeline(&shape("orders")).await.unwrap();
    engine.pipeline(&shape("ping")).await.unwrap();
    assert_eq!(tc.calls(), 2);
}

#[tokio::test]
async fn retryable_failures_can_be_reset() {
    let tc = Arc::new(FlakyToolchain {
        inner: ScriptToolchain::new(),
        calls: AtomicUsize::new(0),
        failures: 1,
    });
    let engine = engine_with(in_memory(tc.clone()), &Log::default());
    let ping = shape("ping");

    let err = engine.pipeline(&ping).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(engine.pipeline(&ping).await.unwrap_err(), err);
    assert_eq!(tc.calls.load(Ordering::SeqCst), 1);
    assert!(engine.source(&key("ping")).is_some());

    assert!(engine.retry(&key("ping")));
    let p = engine.pipeline(&ping).await.unwrap();
    assert_eq!(p.invoke(vec![]).await.unwrap(), json!("pong"));
    assert!(!engine.retry(&key("ping")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_cancels_in_flight_builds_only() {
    let tc = Arc::new(StallingToolchain {
        inner: ScriptToolchain::new(),
        stall_on: "pipeline_orders",
        entered: Notify::new(),
    });
    let engine = Arc::new(engine_with(in_memory(tc.clone()), &Log::default()));
    let ping = engine.pipeline(&shape("ping")).await.unwrap();

    let task = {
        let engine = engine.clone();
        let orders = shape("orders");
        tokio::spawn(async move { engine.pipeline(&orders).await })
    };
    tc.entered.notified().await;
    assert_eq!(engine.phase(&key("orders")), BuildPhase::Compiling);

    engine.shutdown();
    assert_eq!(task.await.unwrap().unwrap_err(), BuildError::Cancelled);
    assert_eq!(engine.phase(&key("orders")), BuildPhase::Unbuilt);
    assert_eq!(engine.pipeline(&shape("orders")).await.unwrap_err(), BuildError::Cancelled);

    assert_eq!(ping.invoke(vec![]).await.unwrap(), json!("pong"));
    assert!(engine.pipeline(&shape("ping")).await.is_ok());
}

#[tokio::test]
async fn nested_mode_builds_a_separate_module() {
    let engine = engine_with(in_memory(Arc::new(ScriptToolchain::new())), &Log::default());
    let top = engine.pipeline(&shape("ping")).await.unwrap();
    let nested = engine.nested(&shape("ping")).await.unwrap();
    assert_eq!(top.module_name(), "pipeline_ping");
    assert_eq!(nested.module_name(), "pipeline_ping_nested");
    assert_eq!(nested.invoke(vec![]).await.unwrap(), json!("pong"));
}

#[tokio::test]
async fn events_and_metrics_follow_the_build() {
    let recorder = Arc::new(RecordingSink::default());
    let collector = Arc::new(MetricsCollector::new());
    let engine = engine_with(in_memory(Arc::new(ScriptToolchain::new())), &Log::default())
        .with_event_sink(Arc::new(MetricsEventSink::new(collector.clone(), recorder.clone())));

    engine.pipeline(&shape("ping")).await.unwrap();
    engine.pipeline(&shape("ping")).await.unwrap();
    engine.pipeline(&shape("broken")).await.unwrap_err();

    let events = recorder.events.lock().unwrap().clone();
    let ping: Vec<_> = events.iter().filter(|e| e.shape().starts_with("ping")).collect();
    let phases: Vec<_> = ping
        .iter()
        .filter_map(|e| match e {
            BuildEvent::PhaseChanged { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            BuildPhase::Assembling,
            BuildPhase::Synthesizing,
            BuildPhase::Compiling,
            BuildPhase::Ready
        ]
    );
    assert!(matches!(ping.first(), Some(BuildEvent::BuildStarted { .. })));
    assert!(matches!(ping.last(), Some(BuildEvent::BuildSucceeded { cached: false, .. })));

    let m = collector.get_metrics().await;
    assert_eq!(m.builds_started, 2);
    assert_eq!(m.builds_succeeded, 1);
    assert_eq!(m.builds_failed, 1);
    assert_eq!(m.compiles, 1);
    assert_eq!(m.cache_hits, 0);
}
