use std::collections::BTreeSet;
use std::sync::Arc;

use crate::builder::StepBuilder;
use crate::error::RegistryError;
use crate::failure::FailureHierarchy;
use crate::source::VariableSource;

/// Frozen set of builders, variable sources and failure categories.
///
/// Built once at startup; there is no way to register anything afterwards.
pub struct Registry {
    builders: Vec<Arc<dyn StepBuilder>>,
    sources: Vec<Arc<dyn VariableSource>>,
    failures: FailureHierarchy,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn builders(&self) -> &[Arc<dyn StepBuilder>] {
        &self.builders
    }

    /// Sources ordered by priority (highest first), registration order within
    /// a priority.
    pub fn sources(&self) -> &[Arc<dyn VariableSource>] {
        &self.sources
    }

    pub fn failures(&self) -> &FailureHierarchy {
        &self.failures
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("builders", &self.builders.iter().map(|b| b.name()).collect::<Vec<_>>())
            .field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("failures", &self.failures)
            .finish()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    builders: Vec<Arc<dyn StepBuilder>>,
    sources: Vec<Arc<dyn VariableSource>>,
    failures: FailureHierarchy,
    names: BTreeSet<String>,
    source_names: BTreeSet<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_builder(&mut self, builder: impl StepBuilder + 'static) -> Result<&mut Self, RegistryError> {
        self.add_shared_builder(Arc::new(builder))
    }

    pub fn add_shared_builder(&mut self, builder: Arc<dyn StepBuilder>) -> Result<&mut Self, RegistryError> {
        if !self.names.insert(builder.name().to_string()) {
            return Err(RegistryError::DuplicateBuilder(builder.name().to_string()));
        }
        self.builders.push(builder);
        Ok(self)
    }

    pub fn add_source(&mut self, source: impl VariableSource + 'static) -> Result<&mut Self, RegistryError> {
        self.add_shared_source(Arc::new(source))
    }

    pub fn add_shared_source(&mut self, source: Arc<dyn VariableSource>) -> Result<&mut Self, RegistryError> {
        if !self.source_names.insert(source.name().to_string()) {
            return Err(RegistryError::DuplicateSource(source.name().to_string()));
        }
        self.sources.push(source);
        Ok(self)
    }

    pub fn add_failure(&mut self, category: &str, parent: Option<&str>) -> Result<&mut Self, RegistryError> {
        self.failures.declare(category, parent)?;
        Ok(self)
    }

    pub fn build(self) -> Arc<Registry> {
        let mut sources = self.sources;
        // stable: registration order survives within a priority
        sources.sort_by_key(|s| std::cmp::Reverse(s.priority()));
        tracing::debug!(
            builders = self.builders.len(),
            sources = sources.len(),
            "registry frozen"
        );
        Arc::new(Registry {
            builders: self.builders,
            sources,
            failures: self.failures,
        })
    }
}
