use serde_json::Value;

use crate::assembler::AssembledMethod;
use crate::error::BuildError;
use crate::ir::{Frame, FrameGraph, FrameId, FrameKind, Operand, ScopeId, VarId};
use crate::synth::naming::NameTable;
use crate::synth::order::order_scope;

const INDENT: &str = "  ";

pub(crate) struct Emitter<'a> {
    method: &'a AssembledMethod,
    graph: &'a FrameGraph,
    names: NameTable,
    out: String,
    depth: usize,
    emitted: usize,
}

impl<'a> Emitter<'a> {
    pub fn new(method: &'a AssembledMethod) -> Self {
        Self {
            method,
            graph: &method.graph,
            names: NameTable::default(),
            out: String::new(),
            depth: 0,
            emitted: 0,
        }
    }

    pub fn emit(mut self) -> Result<String, BuildError> {
        let m = self.method;
        self.line(&format!("// {} ({})", m.shape, m.mode));
        if !m.contributors.is_empty() {
            self.line(&format!("// contributors: {}", m.contributors.join(", ")));
        }
        self.open(&format!("module {} {{", m.module_name));
        for (category, parent) in &m.failures {
            match parent {
                Some(p) => self.line(&format!("failure {category} : {p};")),
                None => self.line(&format!("failure {category};")),
            }
        }

        let mut params = Vec::new();
        for var in &self.graph.scope(FrameGraph::ROOT).declared {
            let v = self.graph.variable(*var);
            let stem = v.declared_name.clone().unwrap_or_else(|| v.ty.base_name());
            let name = self.names.assign(*var, &stem);
            params.push(format!("{name}: {}", v.ty));
        }
        let header = match &m.shape.returns {
            Some(ty) => format!("routine {}({}) -> {ty} {{", m.method_name, params.join(", ")),
            None => format!("routine {}({}) {{", m.method_name, params.join(", ")),
        };
        self.open(&header);

        self.scope(FrameGraph::ROOT)?;
        if m.has_failure_handling() {
            self.open("try {");
            self.scope(FrameGraph::BODY)?;
            self.terminal_return()?;
            for c in &m.catches {
                let name = self.names.assign(c.fault, "fault");
                self.reopen(&format!("}} catch {} as {name} {{", c.category));
                self.scope(c.scope)?;
            }
            if let Some(finally) = m.finally {
                self.reopen("} finally {");
                self.scope(finally)?;
            }
            self.close("}");
        } else {
            self.scope(FrameGraph::BODY)?;
            self.terminal_return()?;
        }

        self.close("}");
        self.close("}");

        let total = self.graph.frames().len();
        if self.emitted != total {
            return Err(BuildError::EmissionInconsistency {
                module: m.module_name.clone(),
                diagnostics: vec![format!("emitted {} of {total} steps", self.emitted)],
                generated: self.out,
            });
        }
        Ok(self.out)
    }

    fn terminal_return(&mut self) -> Result<(), BuildError> {
        if let Some(var) = self.method.returns {
            let name = self.var_name(var, "terminal return")?;
            self.line(&format!("return {name};"));
        }
        Ok(())
    }

    fn scope(&mut self, scope: ScopeId) -> Result<(), BuildError> {
        for frame in order_scope(self.graph, scope)? {
            self.frame(frame)?;
        }
        Ok(())
    }

    fn frame(&mut self, id: FrameId) -> Result<(), BuildError> {
        self.emitted += 1;
        let graph = self.graph;
        let frame = graph.frame(id);
        match &frame.kind {
            FrameKind::Call { operation, args } => {
                let args = args
                    .iter()
                    .map(|a| self.operand(frame, a))
                    .collect::<Result<Vec<_>, _>>()?
                    .join(", ");
                match frame.output {
                    Some(out) => {
                        let (name, ty) = self.define(out);
                        self.line(&format!("let {name}: {ty} = call {operation}({args});"));
                    }
                    None => self.line(&format!("call {operation}({args});")),
                }
            }
            FrameKind::Assign { value } => {
                let value = self.operand(frame, value)?;
                let out = frame
                    .output
                    .ok_or_else(|| BuildError::invalid_step(frame.display(), "assignment without output"))?;
                let (name, ty) = self.define(out);
                self.line(&format!("let {name}: {ty} = {value};"));
            }
            FrameKind::Conditional {
                condition,
                then_scope,
                else_scope,
            } => {
                let condition = self.operand(frame, condition)?;
                self.open(&format!("if {condition} {{"));
                self.scope(*then_scope)?;
                if !graph.scope(*else_scope).frames.is_empty() {
                    self.reopen("} else {");
                    self.scope(*else_scope)?;
                }
                self.close("}");
            }
            FrameKind::Loop { items, item, body } => {
                let items = self.operand(frame, &Operand::Var(items.clone()))?;
                let (name, ty) = self.define(*item);
                self.open(&format!("for {name}: {ty} in {items} {{"));
                self.scope(*body)?;
                self.close("}");
            }
            FrameKind::Try {
                body,
                catches,
                finally,
            } => {
                self.open("try {");
                self.scope(*body)?;
                for c in catches {
                    let name = self.names.assign(c.fault, "fault");
                    self.reopen(&format!("}} catch {} as {name} {{", c.category));
                    self.scope(c.scope)?;
                }
                if let Some(f) = finally {
                    self.reopen("} finally {");
                    self.scope(*f)?;
                }
                self.close("}");
            }
            FrameKind::Return { value } => match value {
                Some(v) => {
                    let v = self.operand(frame, v)?;
                    self.line(&format!("return {v};"));
                }
                None => self.line("return;"),
            },
            FrameKind::Raw { template, inputs } => {
                let mut text = template.clone();
                for (i, ty) in inputs.iter().enumerate() {
                    let name = self.operand(frame, &Operand::Var(ty.clone()))?;
                    text = text.replace(&format!("{{{i}}}"), &name);
                }
                if let Some(out) = frame.output {
                    let (name, _) = self.define(out);
                    text = text.replace("{out}", &name);
                }
                for l in text.lines() {
                    self.line(l.trim_end());
                }
            }
        }
        Ok(())
    }

    fn define(&mut self, var: VarId) -> (String, String) {
        let v = self.graph.variable(var);
        let name = self.names.assign(var, &v.ty.base_name());
        (name, v.ty.to_string())
    }

    fn var_name(&self, var: VarId, context: &str) -> Result<String, BuildError> {
        self.names.name(var).map(str::to_string).ok_or_else(|| {
            BuildError::invalid_step(
                context,
                format!("`{}` is used before it is defined", self.graph.variable(var).ty),
            )
        })
    }

    fn operand(&self, frame: &Frame, operand: &Operand) -> Result<String, BuildError> {
        match operand {
            Operand::Var(ty) => {
                let var = frame.bindings.get(ty).ok_or_else(|| BuildError::MissingDependency {
                    requested: ty.clone(),
                    step: frame.display(),
                })?;
                self.var_name(*var, &frame.display())
            }
            Operand::Const(value) => Ok(render_constant(value)),
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn open(&mut self, text: &str) {
        self.line(text);
        self.depth += 1;
    }

    fn reopen(&mut self, text: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.open(text);
    }

    fn close(&mut self, text: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
    }
}

/// Scalars inline as JSON literals; arrays and objects as `json "<text>"`.
pub fn render_constant(value: &Value) -> String {
    match value {
        Value::Array(_) | Value::Object(_) => {
            format!("json {}", Value::String(value.to_string()))
        }
        scalar => scalar.to_string(),
    }
}
