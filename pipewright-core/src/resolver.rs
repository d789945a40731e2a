use std::sync::Arc;

use crate::error::BuildError;
use crate::ir::{Creator, FrameGraph, FrameId, ScopeId, ScopeKind, VarId, VarType};
use crate::shape::{PipelineMode, ShapeDescriptor};
use crate::source::{AvailableVariables, VariableSource};

/// Binds every requested type in a frame graph, inserting producer steps from
/// variable sources where nothing in scope creates the type.
pub struct Resolver<'a> {
    shape: &'a ShapeDescriptor,
    mode: PipelineMode,
    sources: &'a [Arc<dyn VariableSource>],
    graph: &'a mut FrameGraph,
    in_progress: Vec<(VarType, FrameId)>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        shape: &'a ShapeDescriptor,
        mode: PipelineMode,
        sources: &'a [Arc<dyn VariableSource>],
        graph: &'a mut FrameGraph,
    ) -> Self {
        Self {
            shape,
            mode,
            sources,
            graph,
            in_progress: Vec::new(),
        }
    }

    /// Resolves every frame of `scope`, nested blocks included.
    pub fn resolve_scope(&mut self, scope: ScopeId) -> Result<(), BuildError> {
        let frames = self.graph.scope(scope).frames.clone();
        for f in frames {
            self.resolve_frame(f)?;
        }
        Ok(())
    }

    pub fn resolve_frame(&mut self, id: FrameId) -> Result<(), BuildError> {
        let (needs, scope, label) = {
            let frame = self.graph.frame(id);
            (frame.needs(), frame.scope, frame.display())
        };
        for ty in needs {
            if self.graph.frame(id).bindings.contains_key(&ty) {
                continue;
            }
            let var = self.resolve(&ty, scope, Some(id), &label)?;
            self.graph.frame_mut(id).bindings.insert(ty, var);
        }
        for child in self.graph.frame(id).child_scopes() {
            self.resolve_scope(child)?;
        }
        Ok(())
    }

    /// Finds the single variable of type `ty` visible from `scope`, creating a
    /// producer when none exists.
    pub fn resolve(
        &mut self,
        ty: &VarType,
        scope: ScopeId,
        requester: Option<FrameId>,
        label: &str,
    ) -> Result<VarId, BuildError> {
        if let Some(var) = self.lookup(ty, scope, requester)? {
            return Ok(var);
        }
        if let Some(var) = self.produce(ty, scope, requester)? {
            return Ok(var);
        }
        Err(BuildError::MissingDependency {
            requested: ty.clone(),
            step: label.to_string(),
        })
    }

    fn lookup(&self, ty: &VarType, scope: ScopeId, requester: Option<FrameId>) -> Result<Option<VarId>, BuildError> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let candidates = self.graph.candidates(id, ty, requester);
            match candidates.as_slice() {
                [] => cur = self.graph.scope(id).parent,
                [single] => {
                    self.check_not_in_progress(ty, *single)?;
                    return Ok(Some(*single));
                }
                many => {
                    return Err(BuildError::DuplicateProvider {
                        requested: ty.clone(),
                        candidates: many.iter().map(|v| self.graph.describe_var(*v)).collect(),
                    })
                }
            }
        }
        Ok(None)
    }

    fn check_not_in_progress(&self, ty: &VarType, var: VarId) -> Result<(), BuildError> {
        let Creator::Frame(creator) = self.graph.variable(var).creator else {
            return Ok(());
        };
        if let Some(pos) = self.in_progress.iter().position(|(_, f)| *f == creator) {
            let mut chain: Vec<String> = self.in_progress[pos..]
                .iter()
                .map(|(t, _)| t.to_string())
                .collect();
            chain.push(ty.to_string());
            return Err(BuildError::CyclicDependency { chain });
        }
        Ok(())
    }

    fn produce(&mut self, ty: &VarType, scope: ScopeId, requester: Option<FrameId>) -> Result<Option<VarId>, BuildError> {
        let target = match self.graph.scope(self.graph.method_scope(scope)).kind {
            ScopeKind::Body => FrameGraph::BODY,
            _ => FrameGraph::ROOT,
        };
        let position = match (target, requester) {
            (FrameGraph::BODY, Some(req)) => self
                .graph
                .enclosing_frame_in(req, FrameGraph::BODY)
                .and_then(|anchor| {
                    self.graph
                        .scope(FrameGraph::BODY)
                        .frames
                        .iter()
                        .position(|f| *f == anchor)
                }),
            _ => None,
        };

        let available = AvailableVariables::new(self.shape, self.mode, self.graph.visible_types(target));
        let mut answered = Vec::new();
        let mut answering_priority = None;
        for source in self.sources {
            if answering_priority.is_some_and(|p| p != source.priority()) {
                break;
            }
            if let Some(step) = source.try_resolve(ty, &available) {
                answering_priority = Some(source.priority());
                answered.push((source.name().to_string(), step));
            }
        }

        let (origin, step) = match answered.len() {
            0 => return Ok(None),
            1 => answered.remove(0),
            _ => {
                return Err(BuildError::DuplicateProvider {
                    requested: ty.clone(),
                    candidates: answered.into_iter().map(|(name, _)| format!("source `{name}`")).collect(),
                })
            }
        };
        if step.creates.as_ref() != Some(ty) {
            return Err(BuildError::invalid_step(
                step.describe(),
                format!("source `{origin}` was asked for `{ty}` but its step does not create it"),
            ));
        }

        let id = self.graph.lower_step(step, target, position, &origin)?;
        tracing::debug!(requested = %ty, source = %origin, scope = ?self.graph.scope(target).kind, "inserted producer");

        self.in_progress.push((ty.clone(), id));
        let resolved = self.resolve_frame(id);
        self.in_progress.pop();
        resolved?;

        let output = self.graph.frame(id).output.ok_or_else(|| {
            BuildError::invalid_step(self.graph.frame(id).display(), "producer has no output")
        })?;
        Ok(Some(output))
    }
}
