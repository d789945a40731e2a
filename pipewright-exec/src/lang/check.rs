use std::collections::{BTreeMap, BTreeSet};

use pipewright_core::FailureHierarchy;

use crate::image::{CatchImage, FailureEntry, Instr, ModuleImage, ParamImage, RoutineImage, ValueRef, IMAGE_FORMAT_VERSION};
use crate::lang::ast::{Call, Expr, Module, Operand, Routine, Stmt, StmtKind};
use crate::lang::diagnostic::{Diagnostic, Pos};

/// Checks a parsed module and lowers it to a slot-based image.
///
/// All diagnostics are collected; an image is only produced when there are
/// none.
pub fn check_module(module: &Module, content_hash: &str) -> Result<ModuleImage, Vec<Diagnostic>> {
    let mut cx = Checker::default();
    let failures = cx.failures(module);

    let mut routines = Vec::new();
    let mut seen = BTreeSet::new();
    for r in &module.routines {
        if !seen.insert(r.name.as_str()) {
            cx.error(r.pos, format!("routine `{}` is defined twice", r.name));
        }
        routines.push(cx.routine(r));
    }

    if !cx.diagnostics.is_empty() {
        cx.diagnostics.sort_by_key(|d| d.pos);
        return Err(cx.diagnostics);
    }
    Ok(ModuleImage {
        format_version: IMAGE_FORMAT_VERSION,
        name: module.name.clone(),
        content_hash: content_hash.to_string(),
        failures,
        operations: cx.operations,
        routines,
    })
}

#[derive(Default)]
struct Checker {
    diagnostics: Vec<Diagnostic>,
    categories: BTreeSet<String>,
    operations: Vec<String>,
}

#[derive(Clone)]
struct Binding {
    slot: usize,
    ty: String,
}

struct Frame<'r> {
    routine: &'r Routine,
    scopes: Vec<BTreeMap<String, Binding>>,
    slots: usize,
}

impl<'r> Frame<'r> {
    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }
}

impl Checker {
    fn error(&mut self, pos: Pos, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(pos, message));
    }

    fn failures(&mut self, module: &Module) -> Vec<FailureEntry> {
        let mut out = Vec::new();
        for f in &module.failures {
            if f.name == FailureHierarchy::ROOT {
                self.error(f.pos, format!("failure category `{}` is reserved", f.name));
                continue;
            }
            if self.categories.contains(&f.name) {
                self.error(f.pos, format!("failure `{}` is declared twice", f.name));
                continue;
            }
            let parent = match f.parent.as_deref() {
                None | Some(FailureHierarchy::ROOT) => None,
                Some(p) if self.categories.contains(p) => Some(p.to_string()),
                Some(p) => {
                    self.error(f.pos, format!("failure `{}` extends undeclared category `{p}`", f.name));
                    None
                }
            };
            self.categories.insert(f.name.clone());
            out.push(FailureEntry {
                name: f.name.clone(),
                parent,
            });
        }
        out
    }

    fn routine(&mut self, r: &Routine) -> RoutineImage {
        let mut frame = Frame {
            routine: r,
            scopes: vec![BTreeMap::new()],
            slots: 0,
        };
        for p in &r.params {
            self.bind(&mut frame, &p.name, &p.ty, p.pos);
        }
        let body = self.stmts(&mut frame, &r.body);
        RoutineImage {
            name: r.name.clone(),
            params: r
                .params
                .iter()
                .map(|p| ParamImage {
                    name: p.name.clone(),
                    ty: p.ty.clone(),
                })
                .collect(),
            returns: r.returns.clone(),
            slots: frame.slots,
            body,
        }
    }

    fn bind(&mut self, frame: &mut Frame<'_>, name: &str, ty: &str, pos: Pos) -> usize {
        if frame.lookup(name).is_some() {
            self.error(pos, format!("`{name}` is already defined"));
        }
        let slot = frame.slots;
        frame.slots += 1;
        if let Some(scope) = frame.scopes.last_mut() {
            scope.insert(name.to_string(), Binding { slot, ty: ty.to_string() });
        }
        slot
    }

    fn block(&mut self, frame: &mut Frame<'_>, stmts: &[Stmt]) -> Vec<Instr> {
        frame.scopes.push(BTreeMap::new());
        let out = self.stmts(frame, stmts);
        frame.scopes.pop();
        out
    }

    fn stmts(&mut self, frame: &mut Frame<'_>, stmts: &[Stmt]) -> Vec<Instr> {
        let mut out = Vec::with_capacity(stmts.len());
        let mut returned = false;
        for s in stmts {
            if returned {
                self.error(s.pos, "unreachable statement after `return`");
                break;
            }
            returned = matches!(s.kind, StmtKind::Return(_));
            out.push(self.stmt(frame, s));
        }
        out
    }

    fn stmt(&mut self, frame: &mut Frame<'_>, s: &Stmt) -> Instr {
        match &s.kind {
            StmtKind::Let { name, ty, value } => match value {
                Expr::Call(call) => {
                    let (operation, args) = self.call(frame, call);
                    let out = self.bind(frame, name, ty, s.pos);
                    Instr::Call {
                        operation,
                        args,
                        out: Some(out),
                    }
                }
                Expr::Operand(op) => {
                    let value = self.operand(frame, op);
                    let out = self.bind(frame, name, ty, s.pos);
                    Instr::Assign { value, out }
                }
            },
            StmtKind::Call(call) => {
                let (operation, args) = self.call(frame, call);
                Instr::Call {
                    operation,
                    args,
                    out: None,
                }
            }
            StmtKind::If {
                condition,
                then,
                otherwise,
            } => Instr::If {
                condition: self.operand(frame, condition),
                then: self.block(frame, then),
                otherwise: self.block(frame, otherwise),
            },
            StmtKind::For { item, ty, items, body } => {
                let items = self.operand(frame, items);
                frame.scopes.push(BTreeMap::new());
                let item = self.bind(frame, item, ty, s.pos);
                let body = self.stmts(frame, body);
                frame.scopes.pop();
                Instr::For { items, item, body }
            }
            StmtKind::Try { body, catches, finally } => {
                if catches.is_empty() && finally.is_none() {
                    self.error(s.pos, "`try` without `catch` or `finally`");
                }
                let body = self.block(frame, body);
                let mut lowered = Vec::with_capacity(catches.len());
                for c in catches {
                    if c.category != FailureHierarchy::ROOT && !self.categories.contains(&c.category) {
                        self.error(c.pos, format!("undeclared failure category `{}`", c.category));
                    }
                    frame.scopes.push(BTreeMap::new());
                    let slot = self.bind(frame, &c.binding, FailureHierarchy::ROOT, c.pos);
                    let body = self.stmts(frame, &c.body);
                    frame.scopes.pop();
                    lowered.push(CatchImage {
                        category: c.category.clone(),
                        slot,
                        body,
                    });
                }
                let finally = finally.as_ref().map(|f| self.block(frame, f));
                Instr::Try {
                    body,
                    catches: lowered,
                    finally,
                }
            }
            StmtKind::Return(value) => {
                let routine = frame.routine;
                if let Some(v) = value {
                    match (&routine.returns, v) {
                        (None, _) => self.error(
                            s.pos,
                            format!("routine `{}` declares no result type but returns a value", routine.name),
                        ),
                        (Some(declared), Operand::Name(name, _)) => {
                            if let Some(b) = frame.lookup(name) {
                                if &b.ty != declared && b.ty != FailureHierarchy::ROOT {
                                    let message = format!("returns `{}` where `{declared}` is declared", b.ty);
                                    self.error(s.pos, message);
                                }
                            }
                        }
                        (Some(_), Operand::Literal(_)) => {}
                    }
                }
                Instr::Return {
                    value: value.as_ref().map(|v| self.operand(frame, v)),
                }
            }
        }
    }

    fn call(&mut self, frame: &Frame<'_>, call: &Call) -> (usize, Vec<ValueRef>) {
        let args = call.args.iter().map(|a| self.operand(frame, a)).collect();
        let idx = match self.operations.iter().position(|o| o == &call.operation) {
            Some(i) => i,
            None => {
                self.operations.push(call.operation.clone());
                self.operations.len() - 1
            }
        };
        (idx, args)
    }

    fn operand(&mut self, frame: &Frame<'_>, op: &Operand) -> ValueRef {
        match op {
            Operand::Literal(v) => ValueRef::Const(v.clone()),
            Operand::Name(name, pos) => match frame.lookup(name) {
                Some(b) => ValueRef::Slot(b.slot),
                None => {
                    self.error(*pos, format!("`{name}` is not defined"));
                    ValueRef::Const(serde_json::Value::Null)
                }
            },
        }
    }
}
