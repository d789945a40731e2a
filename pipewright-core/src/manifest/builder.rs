use std::collections::BTreeMap;

use regex::Regex;

use crate::builder::{BuildContext, StepBuilder};
use crate::error::BuildError;
use crate::ir::{Operand, Step, StepKind, VarType};
use crate::manifest::model::{BuilderSpec, OperandSpec, StepSpec};
use crate::shape::ShapeDescriptor;
use crate::stage::Stage;

impl OperandSpec {
    pub fn to_operand(&self) -> Result<Operand, String> {
        match (&self.var, &self.constant) {
            (Some(ty), None) => Ok(Operand::Var(VarType::new(ty.as_str()))),
            (None, Some(value)) => Ok(Operand::Const(value.clone())),
            (Some(_), Some(_)) => Err("operand sets both `var` and `const`".to_string()),
            (None, None) => Err("operand needs `var` or `const`".to_string()),
        }
    }
}

impl StepSpec {
    /// Names of the step-kind keys that are set.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.call.is_some() {
            out.push("call");
        }
        if self.assign.is_some() {
            out.push("assign");
        }
        if self.condition.is_some() {
            out.push("if");
        }
        if self.for_each.is_some() {
            out.push("for_each");
        }
        if self.attempt.is_some() {
            out.push("try");
        }
        if self.ret.is_some() {
            out.push("return");
        }
        if self.raw.is_some() {
            out.push("raw");
        }
        out
    }

    pub fn to_step(&self) -> Result<Step, String> {
        let kinds = self.kinds();
        if kinds.len() != 1 {
            return Err(format!(
                "a step needs exactly one of call, assign, if, for_each, try, return, raw (found {})",
                if kinds.is_empty() { "none".to_string() } else { kinds.join(", ") }
            ));
        }

        let mut step = if let Some(op) = &self.call {
            let args = self
                .args
                .iter()
                .map(OperandSpec::to_operand)
                .collect::<Result<Vec<_>, _>>()?;
            Step::new(StepKind::Call {
                operation: op.clone(),
                args,
            })
        } else if let Some(value) = &self.assign {
            Step::new(StepKind::Assign {
                value: value.to_operand()?,
            })
        } else if let Some(condition) = &self.condition {
            Step::when(condition.to_operand()?, to_steps(&self.then)?, to_steps(&self.otherwise)?)
        } else if let Some(items) = &self.for_each {
            let item = self.item.as_deref().ok_or("`for_each` needs `as`")?;
            Step::each(items.as_str(), item, to_steps(&self.body)?)
        } else if let Some(body) = &self.attempt {
            let mut s = Step::attempt(to_steps(body)?);
            for c in &self.catch {
                s = s.catch(c.category.as_str(), to_steps(&c.steps)?);
            }
            s.finally(to_steps(&self.finally)?)
        } else if let Some(value) = &self.ret {
            match value.to_operand()? {
                Operand::Const(serde_json::Value::Null) => Step::ret(None),
                other => Step::ret(Some(other)),
            }
        } else if let Some(template) = &self.raw {
            let mut s = Step::raw(template.as_str());
            for ty in &self.inputs {
                s = s.input(ty.as_str());
            }
            s
        } else {
            return Err("empty step".to_string());
        };

        if let Some(ty) = &self.creates {
            step = step.creates(ty.as_str());
        }
        if let Some(label) = &self.label {
            step = step.labeled(label.as_str());
        }
        Ok(step)
    }
}

pub(crate) fn to_steps(specs: &[StepSpec]) -> Result<Vec<Step>, String> {
    specs.iter().map(StepSpec::to_step).collect()
}

/// Step builder defined by a manifest entry.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    name: String,
    stage: Stage,
    pattern: Option<Regex>,
    attributes: BTreeMap<String, String>,
    nested: bool,
    requests: Vec<VarType>,
    setup: Vec<Step>,
    steps: Vec<Step>,
    handlers: Vec<(String, Vec<Step>)>,
    finally: Vec<Step>,
}

impl ManifestBuilder {
    /// Converts a validated `BuilderSpec`; errors name the offending part.
    pub fn from_spec(spec: &BuilderSpec) -> Result<Self, String> {
        let stage = spec.stage.parse::<Stage>()?;
        let pattern = spec
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| format!("invalid match pattern: {e}"))?;
        let handlers = spec
            .handlers
            .iter()
            .map(|h| Ok((h.category.clone(), to_steps(&h.steps)?)))
            .collect::<Result<Vec<_>, String>>()?;
        Ok(Self {
            name: spec.name.clone(),
            stage,
            pattern,
            attributes: spec.attributes.clone(),
            nested: spec.nested,
            requests: spec.requests.iter().map(|r| VarType::new(r.as_str())).collect(),
            setup: to_steps(&spec.setup)?,
            steps: to_steps(&spec.steps)?,
            handlers,
            finally: to_steps(&spec.finally)?,
        })
    }
}

impl StepBuilder for ManifestBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn matches(&self, shape: &ShapeDescriptor) -> bool {
        if let Some(re) = &self.pattern {
            if !re.is_match(&shape.name) {
                return false;
            }
        }
        self.attributes
            .iter()
            .all(|(k, v)| shape.get_attribute(k) == Some(v.as_str()))
    }

    fn supports_nested_execution(&self) -> bool {
        self.nested
    }

    fn contribute(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        for ty in &self.requests {
            ctx.request_variable(ty);
        }
        for step in &self.setup {
            ctx.append_setup_step(step.clone())?;
        }
        for step in &self.steps {
            ctx.append_step(step.clone())?;
        }
        for (category, steps) in &self.handlers {
            ctx.register_failure_handler(category, |_| steps.clone())?;
        }
        for step in &self.finally {
            ctx.register_finally_step(step.clone());
        }
        Ok(())
    }
}
