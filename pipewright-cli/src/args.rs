use std::path::PathBuf;

use clap::Args;

use crate::output::OutputFormat;

#[derive(Debug, Args, Clone)]
pub struct OutputArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ShapeArgs {
    /// Shape name as declared in the manifest.
    #[arg(long)]
    pub shape: String,
    /// Build the nested variant of the pipeline.
    #[arg(long)]
    pub nested: bool,
}

#[derive(Debug, Args, Clone)]
pub struct EngineArgs {
    /// Persist compiled modules under this directory.
    #[arg(long, conflicts_with = "in_memory")]
    pub cache_dir: Option<PathBuf>,
    /// Keep compiled modules in memory only.
    #[arg(long)]
    pub in_memory: bool,
    /// External toolchain command, e.g. `pipewright toolchain`.
    #[arg(long, value_name = "COMMAND")]
    pub toolchain: Option<String>,
    #[arg(long, default_value_t = 30_000)]
    pub toolchain_timeout_ms: u64,
}

#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}
