use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::engine::events::{BuildEvent, EventSink};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildMetrics {
    pub builds_started: usize,
    pub builds_succeeded: usize,
    pub builds_failed: usize,
    pub builds_cancelled: usize,
    pub cache_hits: usize,
    pub compiles: usize,
    pub total_build_time: Duration,
}

impl BuildMetrics {
    pub fn record_success(&mut self, cached: bool, duration: Duration) {
        self.builds_succeeded += 1;
        if cached {
            self.cache_hits += 1;
        } else {
            self.compiles += 1;
        }
        self.total_build_time += duration;
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "builds": {
                "started": self.builds_started,
                "succeeded": self.builds_succeeded,
                "failed": self.builds_failed,
                "cancelled": self.builds_cancelled,
            },
            "cache": {
                "hits": self.cache_hits,
                "compiles": self.compiles,
            },
            "build_time_ms": self.total_build_time.as_millis() as u64,
        })
    }
}

#[derive(Default)]
pub struct MetricsCollector {
    metrics: Mutex<BuildMetrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_metrics(&self) -> BuildMetrics {
        self.metrics.lock().await.clone()
    }
}

/// Counts build outcomes, then forwards every event to `base`.
pub struct MetricsEventSink {
    collector: Arc<MetricsCollector>,
    base: Arc<dyn EventSink>,
}

impl MetricsEventSink {
    pub fn new(collector: Arc<MetricsCollector>, base: Arc<dyn EventSink>) -> Self {
        Self { collector, base }
    }
}

#[async_trait]
impl EventSink for MetricsEventSink {
    async fn emit(&self, event: BuildEvent) {
        {
            let mut m = self.collector.metrics.lock().await;
            match &event {
                BuildEvent::BuildStarted { .. } => m.builds_started += 1,
                BuildEvent::BuildSucceeded {
                    cached, duration_ms, ..
                } => m.record_success(*cached, Duration::from_millis(*duration_ms)),
                BuildEvent::BuildFailed { .. } => m.builds_failed += 1,
                BuildEvent::BuildCancelled { .. } => m.builds_cancelled += 1,
                BuildEvent::PhaseChanged { .. } => {}
            }
        }
        self.base.emit(event).await;
    }
}
