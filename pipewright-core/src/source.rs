use serde_json::Value;

use crate::ir::{Operand, Step, VarType};
use crate::shape::{PipelineMode, ShapeDescriptor};

/// Variables visible at the point where a producer would be inserted.
#[derive(Debug, Clone)]
pub struct AvailableVariables<'a> {
    shape: &'a ShapeDescriptor,
    mode: PipelineMode,
    types: Vec<VarType>,
}

impl<'a> AvailableVariables<'a> {
    pub fn new(shape: &'a ShapeDescriptor, mode: PipelineMode, types: Vec<VarType>) -> Self {
        Self { shape, mode, types }
    }

    pub fn shape(&self) -> &ShapeDescriptor {
        self.shape
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn contains(&self, ty: &VarType) -> bool {
        self.types.contains(ty)
    }

    pub fn types(&self) -> &[VarType] {
        &self.types
    }
}

/// Synthesizes producer steps for variables nothing in scope creates.
pub trait VariableSource: Send + Sync {
    fn name(&self) -> &str;

    /// Higher priorities are consulted first.
    fn priority(&self) -> i32 {
        0
    }

    /// Returns a step creating `requested`, or `None` when this source cannot
    /// produce it here.
    fn try_resolve(&self, requested: &VarType, available: &AvailableVariables<'_>) -> Option<Step>;
}

/// Produces a type from a compile-time constant.
#[derive(Debug, Clone)]
pub struct ConstantSource {
    name: String,
    ty: VarType,
    value: Value,
}

impl ConstantSource {
    pub fn new(name: impl Into<String>, ty: impl Into<VarType>, value: Value) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            value,
        }
    }
}

impl VariableSource for ConstantSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_resolve(&self, requested: &VarType, _available: &AvailableVariables<'_>) -> Option<Step> {
        (requested == &self.ty).then(|| {
            Step::assign(&self.ty, Operand::Const(self.value.clone())).labeled(format!("constant {}", self.ty))
        })
    }
}

/// Reads a field of an ambient context value, e.g. a request envelope.
#[derive(Debug, Clone)]
pub struct ContextFieldSource {
    name: String,
    ty: VarType,
    context: VarType,
    field: String,
}

impl ContextFieldSource {
    pub fn new(
        name: impl Into<String>,
        ty: impl Into<VarType>,
        context: impl Into<VarType>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            context: context.into(),
            field: field.into(),
        }
    }
}

impl VariableSource for ContextFieldSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_resolve(&self, requested: &VarType, available: &AvailableVariables<'_>) -> Option<Step> {
        if requested != &self.ty || !available.contains(&self.context) {
            return None;
        }
        Some(
            Step::call("value.get")
                .var_arg(&self.context)
                .const_arg(self.field.as_str())
                .creates(&self.ty)
                .labeled(format!("{}.{} as {}", self.context, self.field, self.ty)),
        )
    }
}

/// Looks a type up in the host's service registry.
#[derive(Debug, Clone)]
pub struct ServiceSource {
    name: String,
    ty: VarType,
    service: String,
}

impl ServiceSource {
    pub fn new(name: impl Into<String>, ty: impl Into<VarType>, service: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            service: service.into(),
        }
    }
}

impl VariableSource for ServiceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        -10
    }

    fn try_resolve(&self, requested: &VarType, _available: &AvailableVariables<'_>) -> Option<Step> {
        (requested == &self.ty).then(|| {
            Step::call("services.resolve")
                .const_arg(self.service.as_str())
                .creates(&self.ty)
                .labeled(format!("service {}", self.service))
        })
    }
}

type ResolveFn = dyn Fn(&VarType, &AvailableVariables<'_>) -> Option<Step> + Send + Sync;

/// Closure-backed source.
pub struct FnSource {
    name: String,
    priority: i32,
    f: Box<ResolveFn>,
}

impl FnSource {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&VarType, &AvailableVariables<'_>) -> Option<Step> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority: 0,
            f: Box::new(f),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl std::fmt::Debug for FnSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSource")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

impl VariableSource for FnSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn try_resolve(&self, requested: &VarType, available: &AvailableVariables<'_>) -> Option<Step> {
        (self.f)(requested, available)
    }
}
