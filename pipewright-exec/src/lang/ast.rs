use serde_json::Value;

use crate::lang::diagnostic::Pos;

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub pos: Pos,
    pub failures: Vec<FailureDecl>,
    pub routines: Vec<Routine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailureDecl {
    pub name: String,
    pub parent: Option<String>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: String,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Routine {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Option<String>,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let {
        name: String,
        ty: String,
        value: Expr,
    },
    Call(Call),
    If {
        condition: Operand,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    For {
        item: String,
        ty: String,
        items: Operand,
        body: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        catches: Vec<Catch>,
        finally: Option<Vec<Stmt>>,
    },
    Return(Option<Operand>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Catch {
    pub category: String,
    pub binding: String,
    pub body: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation: String,
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Call(Call),
    Operand(Operand),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Name(String, Pos),
    Literal(Value),
}
