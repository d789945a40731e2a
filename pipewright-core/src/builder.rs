use crate::error::BuildError;
use crate::failure::FailureHierarchy;
use crate::ir::{FrameGraph, Operand, Step, VarType};
use crate::shape::{PipelineMode, ShapeDescriptor};
use crate::stage::Stage;

/// Extension point contributing steps to the pipelines of matching shapes.
pub trait StepBuilder: Send + Sync {
    fn name(&self) -> &str;

    fn stage(&self) -> Stage;

    fn matches(&self, shape: &ShapeDescriptor) -> bool;

    /// Whether the builder also applies when the pipeline runs nested inside
    /// another one.
    fn supports_nested_execution(&self) -> bool {
        false
    }

    fn contribute(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError>;
}

/// What a failure-handler factory gets to see.
#[derive(Debug, Clone)]
pub struct HandlerContext<'a> {
    category: &'a str,
    shape: &'a ShapeDescriptor,
}

impl<'a> HandlerContext<'a> {
    pub fn category(&self) -> &str {
        self.category
    }

    pub fn shape(&self) -> &ShapeDescriptor {
        self.shape
    }

    /// Operand bound to the caught fault inside the handler.
    pub fn fault(&self) -> Operand {
        Operand::Var(VarType::fault())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HandlerRegistration {
    pub category: String,
    pub origin: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub(crate) struct VariableRequest {
    pub ty: VarType,
    pub origin: String,
}

/// Everything contributed for one method before resolution.
#[derive(Debug, Default)]
pub(crate) struct MethodDraft {
    pub graph: FrameGraph,
    pub handlers: Vec<HandlerRegistration>,
    pub finally: Vec<(String, Step)>,
    pub requests: Vec<VariableRequest>,
}

/// Mutable view handed to a builder while it contributes.
pub struct BuildContext<'a> {
    shape: &'a ShapeDescriptor,
    mode: PipelineMode,
    failures: &'a FailureHierarchy,
    builder: &'a str,
    draft: &'a mut MethodDraft,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(
        shape: &'a ShapeDescriptor,
        mode: PipelineMode,
        failures: &'a FailureHierarchy,
        builder: &'a str,
        draft: &'a mut MethodDraft,
    ) -> Self {
        Self {
            shape,
            mode,
            failures,
            builder,
            draft,
        }
    }

    pub fn shape(&self) -> &ShapeDescriptor {
        self.shape
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn failures(&self) -> &FailureHierarchy {
        self.failures
    }

    /// Declares that the pipeline needs a `ty`, whether or not a step uses it.
    pub fn request_variable(&mut self, ty: impl Into<VarType>) -> Operand {
        let ty = ty.into();
        self.draft.requests.push(VariableRequest {
            ty: ty.clone(),
            origin: self.builder.to_string(),
        });
        Operand::Var(ty)
    }

    /// Appends a step to the pipeline body.
    pub fn append_step(&mut self, step: Step) -> Result<(), BuildError> {
        self.draft
            .graph
            .lower_step(step, FrameGraph::BODY, None, self.builder)?;
        Ok(())
    }

    /// Appends a step to the prologue, which runs before the body and is
    /// visible to failure handlers and finally steps.
    pub fn append_setup_step(&mut self, step: Step) -> Result<(), BuildError> {
        self.draft
            .graph
            .lower_step(step, FrameGraph::ROOT, None, self.builder)?;
        Ok(())
    }

    /// Registers handler steps for faults of `category` (or any subcategory).
    pub fn register_failure_handler<F>(&mut self, category: &str, factory: F) -> Result<(), BuildError>
    where
        F: FnOnce(&HandlerContext<'_>) -> Vec<Step>,
    {
        if !self.failures.contains(category) {
            return Err(BuildError::builder(
                self.builder,
                format!("failure category `{category}` is not declared"),
            ));
        }
        let hctx = HandlerContext {
            category,
            shape: self.shape,
        };
        let steps = factory(&hctx);
        self.draft.handlers.push(HandlerRegistration {
            category: category.to_string(),
            origin: self.builder.to_string(),
            steps,
        });
        Ok(())
    }

    /// Registers a step that runs after the body whatever its outcome.
    pub fn register_finally_step(&mut self, step: Step) {
        self.draft.finally.push((self.builder.to_string(), step));
    }
}
