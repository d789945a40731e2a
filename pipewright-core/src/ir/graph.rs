use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::BuildError;
use crate::ir::{CatchStep, Creator, Operand, Step, StepKind, VarId, VarType, Variable};

pub(crate) static OPERATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Method prologue; declares the parameters.
    Root,
    /// Pipeline body, wrapped in `try` when handlers or finally steps exist.
    Body,
    /// Method-level catch clause.
    Catch,
    /// Method-level finally clause.
    Finally,
    /// Any block owned by a contributed frame.
    Block,
}

impl ScopeKind {
    pub fn is_method_level(self) -> bool {
        !matches!(self, Self::Block)
    }
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub owner: Option<FrameId>,
    pub frames: Vec<FrameId>,
    /// Variables introduced by the scope itself rather than by its frames.
    pub declared: Vec<VarId>,
}

#[derive(Debug, Clone)]
pub struct CatchFrame {
    pub category: String,
    pub fault: VarId,
    pub scope: ScopeId,
}

#[derive(Debug, Clone)]
pub enum FrameKind {
    Call {
        operation: String,
        args: Vec<Operand>,
    },
    Assign {
        value: Operand,
    },
    Conditional {
        condition: Operand,
        then_scope: ScopeId,
        else_scope: ScopeId,
    },
    Loop {
        items: VarType,
        item: VarId,
        body: ScopeId,
    },
    Try {
        body: ScopeId,
        catches: Vec<CatchFrame>,
        finally: Option<ScopeId>,
    },
    Return {
        value: Option<Operand>,
    },
    Raw {
        template: String,
        inputs: Vec<VarType>,
    },
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub scope: ScopeId,
    pub output: Option<VarId>,
    /// Resolved inputs, keyed by requested type.
    pub bindings: BTreeMap<VarType, VarId>,
    /// Builder or source that contributed the frame.
    pub origin: String,
    pub label: String,
}

impl Frame {
    /// Types consumed by this frame itself, in first-use order.
    pub fn needs(&self) -> Vec<VarType> {
        let mut out: Vec<VarType> = Vec::new();
        let mut push = |ty: &VarType| {
            if !out.contains(ty) {
                out.push(ty.clone());
            }
        };
        match &self.kind {
            FrameKind::Call { args, .. } => {
                for a in args {
                    if let Some(ty) = a.requested_type() {
                        push(ty);
                    }
                }
            }
            FrameKind::Assign { value } => {
                if let Some(ty) = value.requested_type() {
                    push(ty);
                }
            }
            FrameKind::Conditional { condition, .. } => {
                if let Some(ty) = condition.requested_type() {
                    push(ty);
                }
            }
            FrameKind::Loop { items, .. } => push(items),
            FrameKind::Try { .. } => {}
            FrameKind::Return { value } => {
                if let Some(ty) = value.as_ref().and_then(|v| v.requested_type()) {
                    push(ty);
                }
            }
            FrameKind::Raw { inputs, .. } => {
                for ty in inputs {
                    push(ty);
                }
            }
        }
        out
    }

    /// Child scopes in emission order.
    pub fn child_scopes(&self) -> Vec<ScopeId> {
        match &self.kind {
            FrameKind::Conditional {
                then_scope,
                else_scope,
                ..
            } => vec![*then_scope, *else_scope],
            FrameKind::Loop { body, .. } => vec![*body],
            FrameKind::Try {
                body,
                catches,
                finally,
            } => {
                let mut out = vec![*body];
                out.extend(catches.iter().map(|c| c.scope));
                out.extend(finally.iter().copied());
                out
            }
            _ => Vec::new(),
        }
    }

    pub fn display(&self) -> String {
        format!("{} [{}]", self.label, self.origin)
    }
}

/// Arena holding every frame, variable and scope of one method.
#[derive(Debug, Clone)]
pub struct FrameGraph {
    frames: Vec<Frame>,
    variables: Vec<Variable>,
    scopes: Vec<Scope>,
}

impl Default for FrameGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameGraph {
    pub const ROOT: ScopeId = ScopeId(0);
    pub const BODY: ScopeId = ScopeId(1);

    pub fn new() -> Self {
        let mut graph = Self {
            frames: Vec::new(),
            variables: Vec::new(),
            scopes: Vec::new(),
        };
        graph.add_scope(ScopeKind::Root, None, None);
        graph.add_scope(ScopeKind::Body, Some(Self::ROOT), None);
        graph
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0]
    }

    pub(crate) fn frame_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.frames[id.0]
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.0]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    pub fn add_scope(&mut self, kind: ScopeKind, parent: Option<ScopeId>, owner: Option<FrameId>) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            kind,
            parent,
            owner,
            frames: Vec::new(),
            declared: Vec::new(),
        });
        id
    }

    fn add_variable(&mut self, ty: VarType, creator: Creator, scope: ScopeId, declared_name: Option<String>) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(Variable {
            ty,
            creator,
            scope,
            declared_name,
        });
        id
    }

    /// Declares a variable owned by the scope itself (parameter, loop item, caught fault).
    pub fn declare(&mut self, scope: ScopeId, ty: VarType, creator: Creator, name: Option<String>) -> VarId {
        let id = self.add_variable(ty, creator, scope, name);
        self.scope_mut(scope).declared.push(id);
        id
    }

    /// Lowers a contributed step into frames of `scope`, at `position` or at the end.
    pub fn lower_step(
        &mut self,
        step: Step,
        scope: ScopeId,
        position: Option<usize>,
        origin: &str,
    ) -> Result<FrameId, BuildError> {
        let label = step.describe();
        self.check_step(&step, scope, &label)?;

        let id = FrameId(self.frames.len());
        self.frames.push(Frame {
            kind: FrameKind::Return { value: None },
            scope,
            output: None,
            bindings: BTreeMap::new(),
            origin: origin.to_string(),
            label: label.clone(),
        });

        let kind = match step.kind {
            StepKind::Call { operation, args } => FrameKind::Call { operation, args },
            StepKind::Assign { value } => FrameKind::Assign { value },
            StepKind::Return { value } => FrameKind::Return { value },
            StepKind::Raw { template, inputs } => FrameKind::Raw { template, inputs },
            StepKind::Conditional {
                condition,
                then_steps,
                else_steps,
            } => {
                let then_scope = self.add_scope(ScopeKind::Block, Some(scope), Some(id));
                self.lower_all(then_steps, then_scope, origin)?;
                let else_scope = self.add_scope(ScopeKind::Block, Some(scope), Some(id));
                self.lower_all(else_steps, else_scope, origin)?;
                FrameKind::Conditional {
                    condition,
                    then_scope,
                    else_scope,
                }
            }
            StepKind::Loop { items, item, body } => {
                let body_scope = self.add_scope(ScopeKind::Block, Some(scope), Some(id));
                let item_var = self.declare(body_scope, item, Creator::Binding(Some(id)), None);
                self.lower_all(body, body_scope, origin)?;
                FrameKind::Loop {
                    items,
                    item: item_var,
                    body: body_scope,
                }
            }
            StepKind::Try {
                body,
                catches,
                finally,
            } => {
                let body_scope = self.add_scope(ScopeKind::Block, Some(scope), Some(id));
                self.lower_all(body, body_scope, origin)?;
                let mut catch_frames = Vec::with_capacity(catches.len());
                for CatchStep { category, steps } in catches {
                    let catch_scope = self.add_scope(ScopeKind::Block, Some(scope), Some(id));
                    let fault = self.declare(catch_scope, VarType::fault(), Creator::Binding(Some(id)), None);
                    self.lower_all(steps, catch_scope, origin)?;
                    catch_frames.push(CatchFrame {
                        category,
                        fault,
                        scope: catch_scope,
                    });
                }
                let finally_scope = if finally.is_empty() {
                    None
                } else {
                    let s = self.add_scope(ScopeKind::Block, Some(scope), Some(id));
                    self.lower_all(finally, s, origin)?;
                    Some(s)
                };
                FrameKind::Try {
                    body: body_scope,
                    catches: catch_frames,
                    finally: finally_scope,
                }
            }
        };

        let output = step
            .creates
            .map(|ty| self.add_variable(ty, Creator::Frame(id), scope, None));

        let frame = self.frame_mut(id);
        frame.kind = kind;
        frame.output = output;

        let frames = &mut self.scope_mut(scope).frames;
        match position {
            Some(pos) if pos <= frames.len() => frames.insert(pos, id),
            _ => frames.push(id),
        }
        Ok(id)
    }

    pub(crate) fn lower_all(&mut self, steps: Vec<Step>, scope: ScopeId, origin: &str) -> Result<(), BuildError> {
        for step in steps {
            self.lower_step(step, scope, None, origin)?;
        }
        Ok(())
    }

    fn check_step(&self, step: &Step, scope: ScopeId, label: &str) -> Result<(), BuildError> {
        let invalid = |message: String| BuildError::invalid_step(label, message);

        if let Some(ty) = &step.creates {
            if !ty.is_valid() {
                return Err(invalid(format!("`{ty}` is not a valid type identifier")));
            }
        }
        let check_operand = |op: &Operand| match op {
            Operand::Var(ty) if !ty.is_valid() => {
                Err(invalid(format!("`{ty}` is not a valid type identifier")))
            }
            _ => Ok(()),
        };

        match &step.kind {
            StepKind::Call { operation, args } => {
                if !OPERATION_RE.is_match(operation) {
                    return Err(invalid(format!("`{operation}` is not a valid operation name")));
                }
                args.iter().try_for_each(check_operand)?;
            }
            StepKind::Assign { value } => {
                check_operand(value)?;
                if step.creates.is_none() {
                    return Err(invalid("an assignment must create a variable".to_string()));
                }
            }
            StepKind::Conditional { condition, .. } => {
                check_operand(condition)?;
                if step.creates.is_some() {
                    return Err(invalid("a conditional cannot create a variable".to_string()));
                }
            }
            StepKind::Loop { items, item, .. } => {
                for ty in [items, item] {
                    if !ty.is_valid() {
                        return Err(invalid(format!("`{ty}` is not a valid type identifier")));
                    }
                }
                if step.creates.is_some() {
                    return Err(invalid("a loop cannot create a variable".to_string()));
                }
            }
            StepKind::Try {
                catches, finally, ..
            } => {
                if catches.is_empty() && finally.is_empty() {
                    return Err(invalid("a try block needs a catch clause or a finally block".to_string()));
                }
                for c in catches {
                    if !VarType::new(c.category.as_str()).is_valid() {
                        return Err(invalid(format!("`{}` is not a valid failure category", c.category)));
                    }
                }
                if step.creates.is_some() {
                    return Err(invalid("a try block cannot create a variable".to_string()));
                }
            }
            StepKind::Return { value } => {
                if let Some(v) = value {
                    check_operand(v)?;
                }
                if step.creates.is_some() {
                    return Err(invalid("a return cannot create a variable".to_string()));
                }
                if matches!(self.scope(scope).kind, ScopeKind::Root | ScopeKind::Body) {
                    return Err(BuildError::DuplicateReturn {
                        step: label.to_string(),
                    });
                }
            }
            StepKind::Raw { template, inputs } => {
                if template.trim().is_empty() {
                    return Err(invalid("raw source is empty".to_string()));
                }
                if let Some(ty) = inputs.iter().find(|ty| !ty.is_valid()) {
                    return Err(invalid(format!("`{ty}` is not a valid type identifier")));
                }
                if step.creates.is_some() && !template.contains("{out}") {
                    return Err(invalid("raw source creating a variable must bind `{out}`".to_string()));
                }
            }
        }
        Ok(())
    }

    /// Variables of type `ty` directly available in `scope`, excluding the
    /// output of `exclude`.
    pub fn candidates(&self, scope: ScopeId, ty: &VarType, exclude: Option<FrameId>) -> Vec<VarId> {
        let s = self.scope(scope);
        let mut out: Vec<VarId> = s
            .declared
            .iter()
            .copied()
            .filter(|v| &self.variable(*v).ty == ty)
            .collect();
        for f in &s.frames {
            if Some(*f) == exclude {
                continue;
            }
            if let Some(v) = self.frame(*f).output {
                if &self.variable(v).ty == ty {
                    out.push(v);
                }
            }
        }
        out
    }

    /// Types visible from `scope`, innermost scope first.
    pub fn visible_types(&self, scope: ScopeId) -> Vec<VarType> {
        let mut out: Vec<VarType> = Vec::new();
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let s = self.scope(id);
            let vars = s
                .declared
                .iter()
                .copied()
                .chain(s.frames.iter().filter_map(|f| self.frame(*f).output));
            for v in vars {
                let ty = &self.variable(v).ty;
                if !out.contains(ty) {
                    out.push(ty.clone());
                }
            }
            cur = s.parent;
        }
        out
    }

    /// Nearest enclosing method-level scope.
    pub fn method_scope(&self, scope: ScopeId) -> ScopeId {
        let mut cur = scope;
        loop {
            let s = self.scope(cur);
            if s.kind.is_method_level() {
                return cur;
            }
            match s.parent {
                Some(p) => cur = p,
                None => return cur,
            }
        }
    }

    /// The frame of `scope` that is `frame` itself or contains it.
    pub fn enclosing_frame_in(&self, frame: FrameId, scope: ScopeId) -> Option<FrameId> {
        let mut cur = frame;
        loop {
            let f = self.frame(cur);
            if f.scope == scope {
                return Some(cur);
            }
            cur = self.scope(f.scope).owner?;
        }
    }

    /// Human-readable description of a variable's provenance.
    pub fn describe_var(&self, id: VarId) -> String {
        let v = self.variable(id);
        match v.creator {
            Creator::Parameter => format!(
                "parameter `{}`",
                v.declared_name.as_deref().unwrap_or(v.ty.as_str())
            ),
            Creator::Frame(f) => self.frame(f).display(),
            Creator::Binding(Some(f)) => format!("binding of {}", self.frame(f).display()),
            Creator::Binding(None) => format!("caught `{}`", v.ty),
        }
    }

    pub fn to_dot(&self, title: &str) -> String {
        let mut out = String::new();
        out.push_str("digraph pipeline {\n");
        out.push_str(&format!("  label=\"{}\";\n", escape_dot(title)));
        out.push_str("  labelloc=t;\n");
        out.push_str("  rankdir=LR;\n");

        for (idx, scope) in self.scopes.iter().enumerate() {
            if scope.frames.is_empty() {
                continue;
            }
            out.push_str(&format!("  subgraph cluster_{idx} {{\n"));
            out.push_str(&format!("    label=\"{:?}\";\n", scope.kind));
            for f in &scope.frames {
                out.push_str(&format!(
                    "    \"f{}\" [label=\"{}\"];\n",
                    f.0,
                    escape_dot(&self.frame(*f).label)
                ));
            }
            out.push_str("  }\n");
        }

        for (idx, frame) in self.frames.iter().enumerate() {
            for var in frame.bindings.values() {
                match self.variable(*var).creator {
                    Creator::Frame(src) | Creator::Binding(Some(src)) => {
                        out.push_str(&format!("  \"f{}\" -> \"f{idx}\";\n", src.0));
                    }
                    Creator::Parameter | Creator::Binding(None) => {}
                }
            }
        }

        out.push_str("}\n");
        out
    }
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
