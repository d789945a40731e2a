use std::collections::BTreeSet;
use std::sync::Arc;

use crate::builder::{BuildContext, MethodDraft};
use crate::error::BuildError;
use crate::ir::{Creator, FrameGraph, FrameKind, ScopeId, ScopeKind, VarId, VarType};
use crate::registry::Registry;
use crate::resolver::Resolver;
use crate::shape::{PipelineMode, ShapeDescriptor, METHOD_NAME};
use crate::synth::{is_keyword, synthesize, SynthesizedModule};

/// A method-level catch clause around the pipeline body.
#[derive(Debug, Clone)]
pub struct MethodCatch {
    pub category: String,
    pub fault: VarId,
    pub scope: ScopeId,
}

/// Fully resolved method, ready for synthesis.
#[derive(Debug, Clone)]
pub struct AssembledMethod {
    pub shape: ShapeDescriptor,
    pub mode: PipelineMode,
    pub module_name: String,
    pub method_name: String,
    pub graph: FrameGraph,
    /// Most specific category first.
    pub catches: Vec<MethodCatch>,
    pub finally: Option<ScopeId>,
    /// `(category, parent)` declarations the module needs, parents first.
    pub failures: Vec<(String, Option<String>)>,
    /// Variable returned by the terminal `return`.
    pub returns: Option<VarId>,
    /// Builders that contributed, in invocation order.
    pub contributors: Vec<String>,
}

impl AssembledMethod {
    pub fn has_failure_handling(&self) -> bool {
        !self.catches.is_empty() || self.finally.is_some()
    }

    pub fn to_dot(&self) -> String {
        self.graph.to_dot(&self.module_name)
    }
}

/// Runs matching builders for a shape and resolves the resulting graph.
#[derive(Debug, Clone)]
pub struct PipelineAssembler {
    registry: Arc<Registry>,
}

impl PipelineAssembler {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn generate(&self, shape: &ShapeDescriptor, mode: PipelineMode) -> Result<SynthesizedModule, BuildError> {
        let method = self.assemble(shape, mode)?;
        synthesize(&method)
    }

    pub fn assemble(&self, shape: &ShapeDescriptor, mode: PipelineMode) -> Result<AssembledMethod, BuildError> {
        let failures = self.registry.failures();
        let mut draft = MethodDraft::default();
        declare_parameters(&mut draft.graph, shape)?;

        let mut builders: Vec<_> = self
            .registry
            .builders()
            .iter()
            .filter(|b| b.matches(shape))
            .filter(|b| mode == PipelineMode::TopLevel || b.supports_nested_execution())
            .collect();
        builders.sort_by_key(|b| b.stage());

        let mut contributors = Vec::with_capacity(builders.len());
        for b in builders {
            tracing::trace!(shape = %shape, builder = b.name(), stage = %b.stage(), "contributing");
            let mut ctx = BuildContext::new(shape, mode, failures, b.name(), &mut draft);
            b.contribute(&mut ctx)?;
            contributors.push(b.name().to_string());
        }

        let MethodDraft {
            mut graph,
            handlers,
            finally: finally_steps,
            requests,
        } = draft;

        // group handler registrations per category, first registration wins the slot
        let mut order: Vec<String> = Vec::new();
        for h in &handlers {
            if !order.contains(&h.category) {
                order.push(h.category.clone());
            }
        }
        order.sort_by_key(|c| std::cmp::Reverse(failures.depth(c)));

        let mut catches = Vec::with_capacity(order.len());
        for category in order {
            let scope = graph.add_scope(ScopeKind::Catch, Some(FrameGraph::ROOT), None);
            let fault = graph.declare(scope, VarType::fault(), Creator::Binding(None), None);
            for h in handlers.iter().filter(|h| h.category == category) {
                graph.lower_all(h.steps.clone(), scope, &h.origin)?;
            }
            catches.push(MethodCatch { category, fault, scope });
        }

        let finally = if finally_steps.is_empty() {
            None
        } else {
            let scope = graph.add_scope(ScopeKind::Finally, Some(FrameGraph::ROOT), None);
            for (origin, step) in finally_steps {
                graph.lower_step(step, scope, None, &origin)?;
            }
            Some(scope)
        };

        let returns = {
            let mut resolver = Resolver::new(shape, mode, self.registry.sources(), &mut graph);
            resolver.resolve_scope(FrameGraph::ROOT)?;
            for c in &catches {
                resolver.resolve_scope(c.scope)?;
            }
            if let Some(scope) = finally {
                resolver.resolve_scope(scope)?;
            }
            for r in &requests {
                resolver.resolve(&r.ty, FrameGraph::BODY, None, &format!("request by {}", r.origin))?;
            }
            let returns = match &shape.returns {
                Some(ty) => Some(resolver.resolve(ty, FrameGraph::BODY, None, "terminal return")?),
                None => None,
            };
            resolver.resolve_scope(FrameGraph::BODY)?;
            returns
        };

        let mut used: BTreeSet<String> = catches.iter().map(|c| c.category.clone()).collect();
        for frame in graph.frames() {
            if let FrameKind::Try { catches, .. } = &frame.kind {
                for c in catches {
                    if !failures.contains(&c.category) {
                        return Err(BuildError::invalid_step(
                            frame.display(),
                            format!("failure category `{}` is not declared", c.category),
                        ));
                    }
                    used.insert(c.category.clone());
                }
            }
        }
        let declarations = failures.declarations(used.iter().map(String::as_str));

        tracing::debug!(
            shape = %shape,
            mode = %mode,
            frames = graph.frames().len(),
            catches = catches.len(),
            "assembled pipeline"
        );

        Ok(AssembledMethod {
            shape: shape.clone(),
            mode,
            module_name: shape.module_name(mode),
            method_name: METHOD_NAME.to_string(),
            graph,
            catches,
            finally,
            failures: declarations,
            returns,
            contributors,
        })
    }
}

fn declare_parameters(graph: &mut FrameGraph, shape: &ShapeDescriptor) -> Result<(), BuildError> {
    let mut seen = BTreeSet::new();
    for p in &shape.parameters {
        let label = format!("parameter `{}`", p.name);
        if !VarType::new(p.name.as_str()).is_valid() || is_keyword(&p.name) {
            return Err(BuildError::invalid_step(label, "not a valid identifier"));
        }
        if !p.ty.is_valid() {
            return Err(BuildError::invalid_step(label, format!("`{}` is not a valid type identifier", p.ty)));
        }
        if !seen.insert(p.name.clone()) {
            return Err(BuildError::invalid_step(label, "declared twice"));
        }
        graph.declare(FrameGraph::ROOT, p.ty.clone(), Creator::Parameter, Some(p.name.clone()));
    }
    Ok(())
}
