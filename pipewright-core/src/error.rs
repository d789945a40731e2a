use thiserror::Error;

use crate::ir::VarType;

/// Build-time failures for a single shape.
///
/// Cloneable so that every caller waiting on a shared build observes the same
/// error value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("missing dependency: nothing produces `{requested}` (needed by {step})")]
    MissingDependency { requested: VarType, step: String },

    #[error("cyclic dependency: {}", chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    #[error("duplicate provider for `{requested}`: {}", candidates.join(", "))]
    DuplicateProvider {
        requested: VarType,
        candidates: Vec<String>,
    },

    #[error("generated module `{module}` failed compilation: {}", diagnostics.join("; "))]
    EmissionInconsistency {
        module: String,
        diagnostics: Vec<String>,
        generated: String,
    },

    #[error("toolchain `{toolchain}` unavailable: {message}")]
    ToolchainUnavailable { toolchain: String, message: String },

    #[error("artifact i/o failure: {0}")]
    Io(String),

    #[error("invalid step {step}: {message}")]
    InvalidStep { step: String, message: String },

    #[error("duplicate terminal return: {step} returns from the pipeline body")]
    DuplicateReturn { step: String },

    #[error("operation `{operation}` used by module `{module}` is not registered")]
    UnresolvedOperation { module: String, operation: String },

    #[error("builder `{builder}` failed: {message}")]
    Builder { builder: String, message: String },

    #[error("build cancelled")]
    Cancelled,

    #[error("build task failed: {0}")]
    TaskJoin(String),
}

impl BuildError {
    pub fn invalid_step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidStep {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn builder(builder: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Builder {
            builder: builder.into(),
            message: message.into(),
        }
    }

    /// Whether a caller may reasonably try the same build again.
    ///
    /// Nothing retries automatically; this only gates `PipelineEngine::retry`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ToolchainUnavailable { .. } | Self::Io(_) | Self::Cancelled | Self::TaskJoin(_)
        )
    }

    /// Generated source attached to the error, if any.
    pub fn generated_source(&self) -> Option<&str> {
        match self {
            Self::EmissionInconsistency { generated, .. } => Some(generated),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to parse as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unable to auto-detect manifest format (neither valid JSON nor valid YAML)")]
    UnknownFormat,
}

#[derive(Debug, Error)]
#[error("manifest failed validation ({violations_len} violations)")]
pub struct ValidationError {
    pub violations: Vec<Violation>,
    violations_len: usize,
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>) -> Self {
        let violations_len = violations.len();
        Self {
            violations,
            violations_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Startup-time registration failures. The registry is frozen once built, so
/// these can only surface before the first pipeline is requested.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("step builder `{0}` is registered twice")]
    DuplicateBuilder(String),
    #[error("variable source `{0}` is registered twice")]
    DuplicateSource(String),
    #[error("failure category `{0}` is declared twice")]
    DuplicateCategory(String),
    #[error("`{0}` is not a valid failure category name")]
    InvalidCategory(String),
    #[error("failure category `{category}` extends undeclared `{parent}`")]
    UnknownParent { category: String, parent: String },
    #[error("`{0}` is reserved")]
    Reserved(String),
    #[error("builder `{builder}` is invalid: {message}")]
    InvalidBuilder { builder: String, message: String },
}
