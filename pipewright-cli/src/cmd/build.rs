use std::path::Path;
use std::sync::Arc;

use futures_util::future::join_all;
use pipewright_core::{BuildError, PipelineMode, ShapeDescriptor, ShapeKey};
use pipewright_exec::engine::{BuildMetrics, MetricsCollector, MetricsEventSink, TracingEventSink};
use serde::Serialize;

use crate::cmd::config::{build_engine, find_shape, load_manifest_file};
use crate::exit_codes;
use crate::output::{print_result, OutputFormat};
use crate::{EngineArgs, OutputArgs};

#[derive(Serialize)]
struct ShapeReport {
    shape: String,
    phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    diagnostics: Vec<String>,
}

#[derive(Serialize)]
struct BuildResult {
    built: usize,
    failed: usize,
    shapes: Vec<ShapeReport>,
    metrics: serde_json::Value,
}

pub async fn build_cmd(path: &Path, shape: Option<&str>, nested: bool, engine: EngineArgs, output: OutputArgs) -> i32 {
    let manifest = match load_manifest_file(path, &output) {
        Ok(m) => m,
        Err(code) => return code,
    };
    let shapes: Vec<ShapeDescriptor> = match shape {
        Some(name) => match find_shape(&manifest, name, &output) {
            Ok(s) => vec![s],
            Err(code) => return code,
        },
        None => manifest.shapes.clone(),
    };

    let collector = Arc::new(MetricsCollector::new());
    let engine = match build_engine(&manifest, &engine, &output) {
        Ok(e) => e.with_event_sink(Arc::new(MetricsEventSink::new(
            collector.clone(),
            Arc::new(TracingEventSink),
        ))),
        Err(code) => return code,
    };

    let mode = if nested {
        PipelineMode::Nested
    } else {
        PipelineMode::TopLevel
    };
    let keys: Vec<ShapeKey> = shapes.into_iter().map(|s| ShapeKey::new(s, mode)).collect();
    // distinct shapes build concurrently
    let outcomes = join_all(keys.iter().cloned().map(|k| engine.build(k))).await;

    let mut reports = Vec::with_capacity(keys.len());
    for (key, outcome) in keys.iter().zip(outcomes) {
        let phase = engine.phase(key).to_string();
        let report = match outcome {
            Ok(p) => ShapeReport {
                shape: key.to_string(),
                phase,
                module: Some(p.module_name().to_string()),
                hash: Some(p.content_hash().to_string()),
                cached: Some(p.is_cached()),
                error: None,
                diagnostics: vec![],
            },
            Err(e) => failed_report(key, phase, &e),
        };
        reports.push(report);
    }

    let metrics = collector.get_metrics().await;
    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    let result = BuildResult {
        built: reports.len() - failed,
        failed,
        shapes: reports,
        metrics: metrics.to_json(),
    };

    if output.format == OutputFormat::Text && !output.quiet {
        print_text(&result, &metrics);
    } else {
        print_result(output.format, output.quiet, &result);
    }

    if failed == 0 {
        exit_codes::SUCCESS
    } else {
        exit_codes::BUILD_FAILED
    }
}

fn failed_report(key: &ShapeKey, phase: String, err: &BuildError) -> ShapeReport {
    let diagnostics = match err {
        BuildError::EmissionInconsistency { diagnostics, .. } => diagnostics.clone(),
        _ => vec![],
    };
    ShapeReport {
        shape: key.to_string(),
        phase,
        module: None,
        hash: None,
        cached: None,
        error: Some(err.to_string()),
        diagnostics,
    }
}

fn print_text(result: &BuildResult, metrics: &BuildMetrics) {
    for r in &result.shapes {
        match (&r.module, &r.hash, &r.error) {
            (Some(module), Some(hash), _) => {
                let cached = if r.cached == Some(true) { " (cached)" } else { "" };
                println!("ok: {} -> {module} {}{cached}", r.shape, &hash[..12.min(hash.len())]);
            }
            (_, _, Some(error)) => {
                eprintln!("error: {}: {error}", r.shape);
                for d in &r.diagnostics {
                    eprintln!("  {d}");
                }
            }
            _ => {}
        }
    }
    println!(
        "{} built, {} failed ({} compiled, {} from cache, {} ms)",
        result.built,
        result.failed,
        metrics.compiles,
        metrics.cache_hits,
        metrics.total_build_time.as_millis()
    );
}
