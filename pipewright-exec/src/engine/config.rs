use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pipewright_store::FsArtifactStore;

use crate::compile::{CompilationStrategy, InMemoryStrategy, PersistentStrategy, ProcessToolchain, ScriptToolchain, Toolchain};

pub const CACHE_DIR_ENV: &str = "PIPEWRIGHT_CACHE_DIR";
pub const TOOLCHAIN_ENV: &str = "PIPEWRIGHT_TOOLCHAIN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyConfig {
    InMemory,
    Persistent { cache_dir: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolchainConfig {
    InProcess,
    Process {
        program: PathBuf,
        args: Vec<String>,
        timeout: Duration,
    },
}

impl ToolchainConfig {
    /// Parses a whitespace separated command line, program first.
    pub fn process_from_command(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self::Process {
            program: PathBuf::from(program),
            args: parts.map(str::to_string).collect(),
            timeout: ProcessToolchain::DEFAULT_TIMEOUT,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy: StrategyConfig,
    pub toolchain: ToolchainConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::InMemory,
            toolchain: ToolchainConfig::InProcess,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `PIPEWRIGHT_CACHE_DIR` and `PIPEWRIGHT_TOOLCHAIN`.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(CACHE_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.strategy = StrategyConfig::Persistent {
                cache_dir: PathBuf::from(dir),
            };
        }
        if let Some(tc) = lookup(TOOLCHAIN_ENV).and_then(|v| ToolchainConfig::process_from_command(&v)) {
            self.toolchain = tc;
        }
        self
    }

    pub fn build_toolchain(&self) -> Arc<dyn Toolchain> {
        match &self.toolchain {
            ToolchainConfig::InProcess => Arc::new(ScriptToolchain::new()),
            ToolchainConfig::Process { program, args, timeout } => Arc::new(
                ProcessToolchain::new(program.clone())
                    .with_args(args.clone())
                    .with_timeout(*timeout),
            ),
        }
    }

    pub fn build_strategy(&self) -> Arc<dyn CompilationStrategy> {
        let toolchain = self.build_toolchain();
        match &self.strategy {
            StrategyConfig::InMemory => Arc::new(InMemoryStrategy::new(toolchain)),
            StrategyConfig::Persistent { cache_dir } => Arc::new(PersistentStrategy::new(
                toolchain,
                Arc::new(FsArtifactStore::new(cache_dir.clone())),
            )),
        }
    }
}
