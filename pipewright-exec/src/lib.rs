#![forbid(unsafe_code)]

//! Compilation and execution for pipewright pipelines.
//!
//! `pipewright-core` turns a shape into module text; this crate compiles that
//! text (in-process or through an external toolchain), caches the result by
//! content hash, and runs the compiled routine.

pub mod compile;
pub mod engine;
pub mod image;
pub mod lang;
pub mod runtime;

pub use crate::compile::{
    CompilationBackend, CompilationStrategy, InMemoryStrategy, PersistentStrategy, ProcessToolchain, ScriptToolchain,
    Toolchain,
};
pub use crate::engine::{
    BuildEvent, BuildPhase, CompiledPipeline, EngineConfig, EventSink, PipelineEngine, StrategyConfig, ToolchainConfig,
};
pub use crate::image::{ModuleImage, IMAGE_FORMAT_VERSION};
pub use crate::lang::{compile_module, Diagnostic};
pub use crate::runtime::{manifest_operations, Fault, FnOperation, LoadedModule, Operation, OperationTable, ServiceRegistry};
