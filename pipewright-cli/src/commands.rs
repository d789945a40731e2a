use std::path::PathBuf;

use clap::Subcommand;

use crate::args::*;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse and validate a manifest.
    Validate {
        path: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// List the shapes a manifest declares.
    Shapes {
        path: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Print the generated module for one shape without compiling it.
    Emit {
        path: PathBuf,
        #[command(flatten)]
        shape: ShapeArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Build pipelines, one shape or every shape in the manifest.
    Build {
        path: PathBuf,
        #[arg(long)]
        shape: Option<String>,
        #[arg(long)]
        nested: bool,
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Build a pipeline and invoke it once.
    Run {
        path: PathBuf,
        #[command(flatten)]
        shape: ShapeArgs,
        /// Arguments as a JSON array, or an object keyed by parameter name.
        #[arg(long, conflicts_with = "args_file")]
        args: Option<String>,
        /// Same as `--args`, read from a JSON or YAML file.
        #[arg(long)]
        args_file: Option<PathBuf>,
        #[command(flatten)]
        engine: EngineArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Inspect or evict the on-disk module cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Compile a module read from stdin and write its image to stdout.
    Toolchain {
        #[arg(long)]
        module: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheAction {
    List {
        #[command(flatten)]
        cache: CacheArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    Clear {
        #[command(flatten)]
        cache: CacheArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    Prune {
        #[command(flatten)]
        cache: CacheArgs,
        #[arg(long)]
        older_than_secs: u64,
        #[command(flatten)]
        output: OutputArgs,
    },
}
