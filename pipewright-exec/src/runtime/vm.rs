use std::sync::Arc;

use futures_util::future::BoxFuture;
use pipewright_core::{BuildError, FailureHierarchy};
use serde_json::Value;

use crate::image::{Instr, ModuleImage, RoutineImage, ValueRef, IMAGE_FORMAT_VERSION};
use crate::runtime::fault::Fault;
use crate::runtime::ops::{kind_of, Operation, OperationTable};

/// A module image linked against an operation table, ready to invoke.
///
/// Loaded modules are immutable and shared through `Arc`; invocations never
/// touch shared state beyond the operations they call.
pub struct LoadedModule {
    image: ModuleImage,
    failures: FailureHierarchy,
    operations: Vec<Arc<dyn Operation>>,
    cached: bool,
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.image.name)
            .field("content_hash", &self.image.content_hash)
            .field("cached", &self.cached)
            .finish()
    }
}

impl LoadedModule {
    /// Links `image`; `cached` records whether it came from an existing
    /// artifact rather than a fresh compile.
    pub fn link(image: ModuleImage, table: &OperationTable, cached: bool) -> Result<Self, BuildError> {
        let inconsistent = |message: String| BuildError::EmissionInconsistency {
            module: image.name.clone(),
            diagnostics: vec![message],
            generated: String::new(),
        };
        if image.format_version != IMAGE_FORMAT_VERSION {
            return Err(inconsistent(format!(
                "image format {} is not supported (expected {IMAGE_FORMAT_VERSION})",
                image.format_version
            )));
        }

        let mut failures = FailureHierarchy::new();
        for f in &image.failures {
            failures
                .declare(&f.name, f.parent.as_deref())
                .map_err(|e| inconsistent(e.to_string()))?;
        }

        for r in &image.routines {
            check_routine(r, image.operations.len()).map_err(|m| inconsistent(format!("routine `{}`: {m}", r.name)))?;
        }

        let mut operations = Vec::with_capacity(image.operations.len());
        for name in &image.operations {
            let op = table.get(name).ok_or_else(|| BuildError::UnresolvedOperation {
                module: image.name.clone(),
                operation: name.clone(),
            })?;
            operations.push(op);
        }

        Ok(Self {
            image,
            failures,
            operations,
            cached,
        })
    }

    pub fn name(&self) -> &str {
        &self.image.name
    }

    pub fn content_hash(&self) -> &str {
        &self.image.content_hash
    }

    pub fn image(&self) -> &ModuleImage {
        &self.image
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn has_routine(&self, name: &str) -> bool {
        self.image.routine(name).is_some()
    }

    /// Runs `routine` with positional arguments. A routine that finishes
    /// without `return` yields `null`.
    pub async fn invoke(&self, routine: &str, args: Vec<Value>) -> Result<Value, Fault> {
        let r = self
            .image
            .routine(routine)
            .ok_or_else(|| Fault::invalid_arguments(format!("module `{}` has no routine `{routine}`", self.name())))?;
        if args.len() != r.params.len() {
            return Err(Fault::invalid_arguments(format!(
                "`{routine}` takes {} argument(s), got {}",
                r.params.len(),
                args.len()
            )));
        }
        let mut slots = vec![Value::Null; r.slots];
        for (slot, arg) in slots.iter_mut().zip(args) {
            *slot = arg;
        }
        match self.block(&mut slots, &r.body).await? {
            Flow::Return(v) => Ok(v),
            Flow::Next => Ok(Value::Null),
        }
    }

    fn block<'a>(&'a self, slots: &'a mut [Value], body: &'a [Instr]) -> BoxFuture<'a, Result<Flow, Fault>> {
        Box::pin(async move {
            for instr in body {
                if let Flow::Return(v) = self.instr(slots, instr).await? {
                    return Ok(Flow::Return(v));
                }
            }
            Ok(Flow::Next)
        })
    }

    async fn instr(&self, slots: &mut [Value], instr: &Instr) -> Result<Flow, Fault> {
        match instr {
            Instr::Call { operation, args, out } => {
                let args = args.iter().map(|a| read(&*slots, a)).collect();
                let Some(op) = self.operations.get(*operation) else {
                    return Err(Fault::invalid_arguments(format!("operation #{operation} is not linked")));
                };
                tracing::trace!(
                    module = %self.image.name,
                    operation = self.image.operations.get(*operation).map(String::as_str).unwrap_or("?"),
                    "call"
                );
                let value = op.call(args).await?;
                if let Some(out) = out {
                    write(slots, *out, value);
                }
            }
            Instr::Assign { value, out } => {
                let v = read(slots, value);
                write(slots, *out, v);
            }
            Instr::If {
                condition,
                then,
                otherwise,
            } => {
                let branch = if truthy(&read(slots, condition)) { then } else { otherwise };
                return self.block(slots, branch).await;
            }
            Instr::For { items, item, body } => {
                let items = match read(slots, items) {
                    Value::Array(items) => items,
                    other => return Err(Fault::type_mismatch(format!("cannot iterate over {}", kind_of(&other)))),
                };
                for v in items {
                    write(slots, *item, v);
                    if let Flow::Return(v) = self.block(slots, body).await? {
                        return Ok(Flow::Return(v));
                    }
                }
            }
            Instr::Try { body, catches, finally } => {
                let mut result = self.block(slots, body).await;
                if let Err(fault) = &result {
                    if let Some(c) = catches.iter().find(|c| self.failures.is_a(&fault.category, &c.category)) {
                        tracing::debug!(category = %fault.category, caught_as = %c.category, "fault caught");
                        write(slots, c.slot, fault.to_value());
                        result = self.block(slots, &c.body).await;
                    }
                }
                if let Some(finally) = finally {
                    // A return or fault inside `finally` replaces the outcome.
                    match self.block(slots, finally).await {
                        Ok(Flow::Next) => {}
                        overriding => return overriding,
                    }
                }
                return result;
            }
            Instr::Return { value } => {
                return Ok(Flow::Return(value.as_ref().map(|v| read(slots, v)).unwrap_or(Value::Null)));
            }
        }
        Ok(Flow::Next)
    }
}

enum Flow {
    Next,
    Return(Value),
}

fn read(slots: &[Value], v: &ValueRef) -> Value {
    match v {
        ValueRef::Slot(i) => slots.get(*i).cloned().unwrap_or(Value::Null),
        ValueRef::Const(c) => c.clone(),
    }
}

fn write(slots: &mut [Value], i: usize, v: Value) {
    if let Some(s) = slots.get_mut(i) {
        *s = v;
    }
}

/// `null`, `false`, `0`, `""`, `[]` and `{}` are false.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn check_routine(r: &RoutineImage, operations: usize) -> Result<(), String> {
    if r.params.len() > r.slots {
        return Err(format!("{} parameters exceed {} slots", r.params.len(), r.slots));
    }
    check_body(&r.body, r.slots, operations)
}

fn check_body(body: &[Instr], slots: usize, operations: usize) -> Result<(), String> {
    let slot = |v: &ValueRef| match v {
        ValueRef::Slot(i) if *i >= slots => Err(format!("slot {i} out of range")),
        _ => Ok(()),
    };
    let out = |i: usize| if i >= slots { Err(format!("slot {i} out of range")) } else { Ok(()) };
    for instr in body {
        match instr {
            Instr::Call { operation, args, out: o } => {
                if *operation >= operations {
                    return Err(format!("operation #{operation} out of range"));
                }
                args.iter().try_for_each(slot)?;
                if let Some(o) = o {
                    out(*o)?;
                }
            }
            Instr::Assign { value, out: o } => {
                slot(value)?;
                out(*o)?;
            }
            Instr::If {
                condition,
                then,
                otherwise,
            } => {
                slot(condition)?;
                check_body(then, slots, operations)?;
                check_body(otherwise, slots, operations)?;
            }
            Instr::For { items, item, body } => {
                slot(items)?;
                out(*item)?;
                check_body(body, slots, operations)?;
            }
            Instr::Try { body, catches, finally } => {
                check_body(body, slots, operations)?;
                for c in catches {
                    out(c.slot)?;
                    check_body(&c.body, slots, operations)?;
                }
                if let Some(f) = finally {
                    check_body(f, slots, operations)?;
                }
            }
            Instr::Return { value } => {
                if let Some(v) = value {
                    slot(v)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness() {
        for v in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(!truthy(&v), "{v}");
        }
        for v in [json!(true), json!(-1), json!("0"), json!([0]), json!({"a": null})] {
            assert!(truthy(&v), "{v}");
        }
    }
}
