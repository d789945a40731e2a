use crate::ir::{FrameId, ScopeId, VarType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creator {
    /// Declared method parameter, available without resolution.
    Parameter,
    /// Output of a frame.
    Frame(FrameId),
    /// Introduced by a block frame for its children (loop item, caught fault).
    /// `None` for the fault of a method-level catch clause.
    Binding(Option<FrameId>),
}

/// A typed value slot inside one generated method.
///
/// Variables carry no name: names are assigned during synthesis so that the
/// graph stays untouched once emission starts.
#[derive(Debug, Clone)]
pub struct Variable {
    pub ty: VarType,
    pub creator: Creator,
    pub scope: ScopeId,
    /// Preferred name (parameters keep their declared names).
    pub declared_name: Option<String>,
}
