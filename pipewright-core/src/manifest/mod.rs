mod builder;
mod model;
mod parser;
mod validate;

use std::sync::Arc;

use crate::error::{ManifestError, RegistryError};
use crate::ir::{Step, VarType};
use crate::registry::{Registry, RegistryBuilder};
use crate::source::{AvailableVariables, ConstantSource, ContextFieldSource, ServiceSource, VariableSource};

pub use builder::ManifestBuilder;
pub use model::{
    BuilderSpec, FailureSpec, HandlerSpec, Manifest, OperandSpec, OperationKind, OperationSpec, SourceKind,
    SourceSpec, StepSpec,
};
pub use parser::{parse_manifest_str, ManifestFormat, ParsedManifest};
pub use validate::validate_manifest;

/// Parses (format auto-detected) and validates a manifest.
pub fn load_manifest(input: &str) -> Result<Manifest, ManifestError> {
    let parsed = parse_manifest_str(input, ManifestFormat::Auto)?;
    validate_manifest(&parsed.manifest)?;
    Ok(parsed.manifest)
}

impl Manifest {
    /// Builds the frozen registry described by this manifest. The manifest is
    /// expected to have passed `validate_manifest`.
    pub fn registry(&self) -> Result<Arc<Registry>, ManifestError> {
        let mut rb = RegistryBuilder::new();
        for f in &self.failures {
            rb.add_failure(&f.name, f.extends.as_deref())?;
        }
        for s in &self.sources {
            match &s.kind {
                SourceKind::Constant { value } => {
                    rb.add_source(PrioritySource::new(
                        ConstantSource::new(&s.name, s.produces.as_str(), value.clone()),
                        s.priority,
                    ))?;
                }
                SourceKind::Field { context, field } => {
                    rb.add_source(PrioritySource::new(
                        ContextFieldSource::new(&s.name, s.produces.as_str(), context.as_str(), field),
                        s.priority,
                    ))?;
                }
                SourceKind::Service { service } => {
                    rb.add_source(PrioritySource::new(
                        ServiceSource::new(&s.name, s.produces.as_str(), service),
                        s.priority,
                    ))?;
                }
            }
        }
        for b in &self.builders {
            let builder = ManifestBuilder::from_spec(b).map_err(|message| RegistryError::InvalidBuilder {
                builder: b.name.clone(),
                message,
            })?;
            rb.add_builder(builder)?;
        }
        Ok(rb.build())
    }
}

/// Overrides the priority of a built-in source with the manifest's value.
struct PrioritySource<S> {
    inner: S,
    priority: i32,
}

impl<S> PrioritySource<S> {
    fn new(inner: S, priority: i32) -> Self {
        Self { inner, priority }
    }
}

impl<S: VariableSource> VariableSource for PrioritySource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn try_resolve(&self, requested: &VarType, available: &AvailableVariables<'_>) -> Option<Step> {
        self.inner.try_resolve(requested, available)
    }
}
