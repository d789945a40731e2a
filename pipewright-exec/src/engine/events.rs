use async_trait::async_trait;
use serde::Serialize;

use crate::engine::pipeline::BuildPhase;

/// Build lifecycle notifications, one stream per engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    BuildStarted {
        shape: String,
    },
    PhaseChanged {
        shape: String,
        phase: BuildPhase,
    },
    BuildSucceeded {
        shape: String,
        module: String,
        hash: String,
        cached: bool,
        duration_ms: u64,
    },
    BuildFailed {
        shape: String,
        error: String,
        retryable: bool,
    },
    BuildCancelled {
        shape: String,
    },
}

impl BuildEvent {
    pub fn shape(&self) -> &str {
        match self {
            Self::BuildStarted { shape }
            | Self::PhaseChanged { shape, .. }
            | Self::BuildSucceeded { shape, .. }
            | Self::BuildFailed { shape, .. }
            | Self::BuildCancelled { shape } => shape,
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: BuildEvent);
}

pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: BuildEvent) {}
}

/// Forwards events to `tracing`.
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: BuildEvent) {
        match event {
            BuildEvent::BuildStarted { shape } => tracing::debug!(%shape, "build started"),
            BuildEvent::PhaseChanged { shape, phase } => tracing::trace!(%shape, %phase, "build phase"),
            BuildEvent::BuildSucceeded {
                shape,
                module,
                hash,
                cached,
                duration_ms,
            } => tracing::info!(%shape, %module, hash = &hash[..hash.len().min(12)], cached, duration_ms, "pipeline ready"),
            BuildEvent::BuildFailed { shape, error, retryable } => {
                tracing::warn!(%shape, %error, retryable, "pipeline build failed")
            }
            BuildEvent::BuildCancelled { shape } => tracing::info!(%shape, "pipeline build cancelled"),
        }
    }
}

#[derive(Default)]
pub struct CompositeEventSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl CompositeEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

#[async_trait]
impl EventSink for CompositeEventSink {
    async fn emit(&self, event: BuildEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}
