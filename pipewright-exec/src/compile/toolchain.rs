use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use pipewright_core::{BuildError, ContentHash};
use tokio::io::AsyncWriteExt;

use crate::image::ModuleImage;
use crate::lang::compile_module;

/// Turns generated module text into a [`ModuleImage`].
#[async_trait]
pub trait Toolchain: Send + Sync {
    fn name(&self) -> &str;

    async fn compile(&self, module_name: &str, hash: &ContentHash, source: &str) -> Result<ModuleImage, BuildError>;
}

/// Runs the built-in compiler on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct ScriptToolchain;

impl ScriptToolchain {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Toolchain for ScriptToolchain {
    fn name(&self) -> &str {
        "script"
    }

    async fn compile(&self, module_name: &str, hash: &ContentHash, source: &str) -> Result<ModuleImage, BuildError> {
        let (name, hash, src) = (module_name.to_string(), hash.to_string(), source.to_string());
        let result = tokio::task::spawn_blocking(move || {
            compile_module(&name, &hash, &src).map_err(|diags| BuildError::EmissionInconsistency {
                module: name.clone(),
                diagnostics: diags.iter().map(ToString::to_string).collect(),
                generated: src.clone(),
            })
        })
        .await
        .map_err(|e| BuildError::TaskJoin(e.to_string()))?;
        if let Err(BuildError::EmissionInconsistency { diagnostics, .. }) = &result {
            tracing::warn!(module = %module_name, errors = diagnostics.len(), "generated module rejected");
        }
        result
    }
}

/// Pipes the source into an external program that prints a JSON image.
///
/// The program is invoked as `<program> <args..> --module <name>`, reads the
/// module text from stdin and writes the image to stdout. Diagnostics go to
/// stderr, one per line, with a non-zero exit status.
#[derive(Debug, Clone)]
pub struct ProcessToolchain {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessToolchain {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        Self {
            name: format!("process:{}", program.display()),
            program,
            args: Vec::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn unavailable(&self, message: impl Into<String>) -> BuildError {
        BuildError::ToolchainUnavailable {
            toolchain: self.name.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Toolchain for ProcessToolchain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn compile(&self, module_name: &str, hash: &ContentHash, source: &str) -> Result<ModuleImage, BuildError> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg("--module")
            .arg(module_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.unavailable(format!("failed to spawn: {e}")))?;

        let mut stdin = child.stdin.take().ok_or_else(|| self.unavailable("stdin not captured"))?;
        let text = source.to_string();
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(text.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| self.unavailable(format!("timed out after {}s", self.timeout.as_secs_f64())))?
            .map_err(|e| self.unavailable(e.to_string()))?;
        let _ = writer.await;

        let rejected = |diagnostics: Vec<String>| BuildError::EmissionInconsistency {
            module: module_name.to_string(),
            diagnostics,
            generated: source.to_string(),
        };
        if !output.status.success() {
            let mut diagnostics: Vec<String> = String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            if diagnostics.is_empty() {
                diagnostics.push(format!("toolchain exited with {}", output.status));
            }
            tracing::warn!(toolchain = %self.name, module = %module_name, status = %output.status, "toolchain failed");
            return Err(rejected(diagnostics));
        }

        let image: ModuleImage = serde_json::from_slice(&output.stdout)
            .map_err(|e| rejected(vec![format!("toolchain produced an invalid image: {e}")]))?;
        if image.name != module_name || image.content_hash != hash.as_str() {
            return Err(rejected(vec![format!(
                "toolchain produced image `{}` ({}) for `{module_name}` ({hash})",
                image.name, image.content_hash
            )]));
        }
        Ok(image)
    }
}
