use std::fmt;
use std::sync::Arc;

use pipewright_core::{ShapeKey, SynthesizedModule};
use serde::Serialize;
use serde_json::Value;

use crate::runtime::{Fault, LoadedModule};

/// Where a shape's build currently stands.
///
/// `Ready` and `BuildFailed` are terminal; a cancelled build drops back to
/// `Unbuilt`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    #[default]
    Unbuilt,
    Assembling,
    Synthesizing,
    Compiling,
    Ready,
    BuildFailed,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unbuilt => "unbuilt",
            Self::Assembling => "assembling",
            Self::Synthesizing => "synthesizing",
            Self::Compiling => "compiling",
            Self::Ready => "ready",
            Self::BuildFailed => "build_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::BuildFailed)
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ready-to-invoke pipeline for one shape and mode.
#[derive(Debug)]
pub struct CompiledPipeline {
    key: ShapeKey,
    source: Arc<SynthesizedModule>,
    module: Arc<LoadedModule>,
}

impl CompiledPipeline {
    pub(crate) fn new(key: ShapeKey, source: Arc<SynthesizedModule>, module: Arc<LoadedModule>) -> Self {
        Self { key, source, module }
    }

    pub fn key(&self) -> &ShapeKey {
        &self.key
    }

    pub fn module_name(&self) -> &str {
        &self.source.module_name
    }

    pub fn content_hash(&self) -> &str {
        self.source.content_hash.as_str()
    }

    pub fn source(&self) -> &SynthesizedModule {
        &self.source
    }

    pub fn module(&self) -> &Arc<LoadedModule> {
        &self.module
    }

    /// Whether the compiled image was reused rather than freshly compiled.
    pub fn is_cached(&self) -> bool {
        self.module.is_cached()
    }

    /// Runs the pipeline routine. Faults the routine does not catch come back
    /// as-is.
    pub async fn invoke(&self, args: Vec<Value>) -> Result<Value, Fault> {
        self.module.invoke(&self.source.method_name, args).await
    }
}
