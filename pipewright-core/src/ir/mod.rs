mod graph;
mod step;
mod ty;
mod variable;

pub use graph::{CatchFrame, Frame, FrameGraph, FrameId, FrameKind, Scope, ScopeId, ScopeKind};
pub(crate) use graph::OPERATION_RE;
pub use step::{CatchStep, Operand, Step, StepKind};
pub use ty::VarType;
pub use variable::{Creator, VarId, Variable};
