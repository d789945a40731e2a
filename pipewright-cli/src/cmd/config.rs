use std::path::{Path, PathBuf};
use std::time::Duration;

use pipewright_core::manifest::{parse_manifest_str, validate_manifest, ManifestFormat, ParsedManifest};
use pipewright_core::{Manifest, ParseError, ShapeDescriptor};
use pipewright_exec::engine::CACHE_DIR_ENV;
use pipewright_exec::{manifest_operations, EngineConfig, PipelineEngine, StrategyConfig, ToolchainConfig};

use crate::exit_codes;
use crate::output::print_error;
use crate::{EngineArgs, OutputArgs};

/// Reads and parses a manifest. The error is the exit code, already reported.
pub fn read_manifest(path: &Path, output: &OutputArgs) -> Result<ParsedManifest, i32> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        print_error(output.format, output.quiet, &format!("failed to read {}: {e}", path.display()));
        exit_codes::RUNTIME_ERROR
    })?;

    parse_manifest_str(&content, ManifestFormat::Auto).map_err(|e| {
        let message = match e {
            ParseError::Json(e) => format!("JSON parse failed: {e}"),
            ParseError::Yaml(e) => format!("YAML parse failed: {e}"),
            ParseError::UnknownFormat => "input is neither valid JSON nor valid YAML".to_string(),
        };
        print_error(output.format, output.quiet, &message);
        exit_codes::VALIDATION_FAILED
    })
}

/// Reads, parses and validates a manifest.
pub fn load_manifest_file(path: &Path, output: &OutputArgs) -> Result<Manifest, i32> {
    let parsed = read_manifest(path, output)?;
    if let Err(err) = validate_manifest(&parsed.manifest) {
        for v in &err.violations {
            print_error(output.format, output.quiet, &format!("{}: {}", v.path, v.message));
        }
        return Err(exit_codes::VALIDATION_FAILED);
    }
    Ok(parsed.manifest)
}

pub fn find_shape(manifest: &Manifest, name: &str, output: &OutputArgs) -> Result<ShapeDescriptor, i32> {
    manifest.shape(name).cloned().ok_or_else(|| {
        print_error(output.format, output.quiet, &format!("shape `{name}` is not declared in the manifest"));
        exit_codes::VALIDATION_FAILED
    })
}

/// Environment defaults, then flags.
pub fn build_engine_config(engine: &EngineArgs) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if engine.in_memory {
        config.strategy = StrategyConfig::InMemory;
    }
    if let Some(dir) = &engine.cache_dir {
        config.strategy = StrategyConfig::Persistent { cache_dir: dir.clone() };
    }
    if let Some(tc) = engine.toolchain.as_deref().and_then(ToolchainConfig::process_from_command) {
        config.toolchain = tc;
    }
    if let ToolchainConfig::Process { timeout, .. } = &mut config.toolchain {
        *timeout = Duration::from_millis(engine.toolchain_timeout_ms);
    }
    config
}

pub fn build_engine(manifest: &Manifest, engine: &EngineArgs, output: &OutputArgs) -> Result<PipelineEngine, i32> {
    let registry = manifest.registry().map_err(|e| {
        print_error(output.format, output.quiet, &e.to_string());
        exit_codes::VALIDATION_FAILED
    })?;
    let config = build_engine_config(engine);
    tracing::debug!(?config, "engine configuration");
    Ok(PipelineEngine::new(registry, manifest_operations(manifest), &config))
}

pub fn get_cache_dir(cache_dir: Option<PathBuf>, output: &OutputArgs) -> Option<PathBuf> {
    let dir = cache_dir.or_else(|| {
        std::env::var(CACHE_DIR_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    });
    if dir.is_none() {
        print_error(
            output.format,
            output.quiet,
            &format!("missing cache directory. Set --cache-dir <dir> or {CACHE_DIR_ENV}"),
        );
    }
    dir
}
