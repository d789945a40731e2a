use std::collections::BTreeSet;

use regex::Regex;

use crate::error::{ValidationError, Violation};
use crate::failure::FailureHierarchy;
use crate::ir::{VarType, OPERATION_RE};
use crate::manifest::model::{BuilderSpec, Manifest, OperandSpec, SourceKind, StepSpec};
use crate::stage::Stage;
use crate::synth::is_keyword;

struct Validator {
    violations: Vec<Violation>,
}

impl Validator {
    fn new() -> Self {
        Self {
            violations: Vec::new(),
        }
    }

    fn finish(self) -> Result<(), ValidationError> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(self.violations))
        }
    }

    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation::new(path, message));
    }

    fn ty(&mut self, path: &str, ty: &str) {
        if !VarType::new(ty).is_valid() {
            self.push(path, format!("`{ty}` is not a valid type identifier"));
        }
    }

    fn operand(&mut self, path: String, o: &OperandSpec) {
        match o.to_operand() {
            Ok(_) => {
                if let Some(ty) = &o.var {
                    self.ty(&path, ty);
                }
            }
            Err(e) => self.push(path, e),
        }
    }

    fn unique<'a>(&mut self, path: &str, what: &str, names: impl Iterator<Item = &'a String>) {
        let mut seen = BTreeSet::new();
        for (i, n) in names.enumerate() {
            if n.trim().is_empty() {
                self.push(format!("{path}[{i}].name"), format!("{what} name must not be empty"));
            } else if !seen.insert(n.as_str()) {
                self.push(format!("{path}[{i}].name"), format!("duplicate {what} `{n}`"));
            }
        }
    }
}

pub fn validate_manifest(manifest: &Manifest) -> Result<(), ValidationError> {
    let mut v = Validator::new();

    v.unique("failures", "failure category", manifest.failures.iter().map(|f| &f.name));
    let mut declared: BTreeSet<&str> = BTreeSet::new();
    for (i, f) in manifest.failures.iter().enumerate() {
        let path = format!("failures[{i}]");
        if f.name == FailureHierarchy::ROOT {
            v.push(format!("{path}.name"), "`Fault` is reserved");
        } else {
            v.ty(&format!("{path}.name"), &f.name);
        }
        if let Some(parent) = &f.extends {
            if parent != FailureHierarchy::ROOT && !declared.contains(parent.as_str()) {
                v.push(
                    format!("{path}.extends"),
                    format!("`{parent}` must be declared before `{}`", f.name),
                );
            }
        }
        declared.insert(f.name.as_str());
    }
    let categories: BTreeSet<&str> = declared;

    v.unique("shapes", "shape", manifest.shapes.iter().map(|s| &s.name));
    for (i, s) in manifest.shapes.iter().enumerate() {
        let mut params = BTreeSet::new();
        for (j, p) in s.parameters.iter().enumerate() {
            let path = format!("shapes[{i}].parameters[{j}]");
            if !VarType::new(p.name.as_str()).is_valid() || is_keyword(&p.name) {
                v.push(format!("{path}.name"), format!("`{}` is not a valid parameter name", p.name));
            }
            if !params.insert(p.name.as_str()) {
                v.push(format!("{path}.name"), format!("duplicate parameter `{}`", p.name));
            }
            v.ty(&format!("{path}.type"), p.ty.as_str());
        }
        if let Some(r) = &s.returns {
            v.ty(&format!("shapes[{i}].returns"), r.as_str());
        }
    }

    v.unique("sources", "source", manifest.sources.iter().map(|s| &s.name));
    for (i, s) in manifest.sources.iter().enumerate() {
        let path = format!("sources[{i}]");
        v.ty(&format!("{path}.type"), &s.produces);
        match &s.kind {
            SourceKind::Field { context, field } => {
                v.ty(&format!("{path}.context"), context);
                if field.is_empty() {
                    v.push(format!("{path}.field"), "field must not be empty");
                }
            }
            SourceKind::Service { service } => {
                if service.is_empty() {
                    v.push(format!("{path}.service"), "service must not be empty");
                }
            }
            SourceKind::Constant { .. } => {}
        }
    }

    v.unique("builders", "builder", manifest.builders.iter().map(|b| &b.name));
    for (i, b) in manifest.builders.iter().enumerate() {
        validate_builder(&mut v, &format!("builders[{i}]"), b, &categories);
    }

    v.unique("operations", "operation", manifest.operations.iter().map(|o| &o.name));
    for (i, o) in manifest.operations.iter().enumerate() {
        if !OPERATION_RE.is_match(&o.name) {
            v.push(
                format!("operations[{i}].name"),
                format!("`{}` is not a valid operation name", o.name),
            );
        }
    }

    v.finish()
}

fn validate_builder(v: &mut Validator, path: &str, b: &BuilderSpec, categories: &BTreeSet<&str>) {
    if let Err(e) = b.stage.parse::<Stage>() {
        v.push(format!("{path}.stage"), e);
    }
    if let Some(p) = &b.pattern {
        if let Err(e) = Regex::new(p) {
            v.push(format!("{path}.match"), format!("invalid regex: {e}"));
        }
    }
    for (i, r) in b.requests.iter().enumerate() {
        v.ty(&format!("{path}.requests[{i}]"), r);
    }
    validate_steps(v, &format!("{path}.setup"), &b.setup, categories);
    validate_steps(v, &format!("{path}.steps"), &b.steps, categories);
    for (i, h) in b.handlers.iter().enumerate() {
        let hpath = format!("{path}.handlers[{i}]");
        if h.category != FailureHierarchy::ROOT && !categories.contains(h.category.as_str()) {
            v.push(
                format!("{hpath}.category"),
                format!("undeclared failure category `{}`", h.category),
            );
        }
        validate_steps(v, &format!("{hpath}.steps"), &h.steps, categories);
    }
    validate_steps(v, &format!("{path}.finally"), &b.finally, categories);
}

fn validate_steps(v: &mut Validator, path: &str, steps: &[StepSpec], categories: &BTreeSet<&str>) {
    for (i, s) in steps.iter().enumerate() {
        validate_step(v, &format!("{path}[{i}]"), s, categories);
    }
}

fn validate_step(v: &mut Validator, path: &str, s: &StepSpec, categories: &BTreeSet<&str>) {
    let kinds = s.kinds();
    if kinds.len() != 1 {
        v.push(
            path,
            match kinds.len() {
                0 => "step needs one of call, assign, if, for_each, try, return, raw".to_string(),
                _ => format!("step sets more than one kind: {}", kinds.join(", ")),
            },
        );
        return;
    }

    if let Some(ty) = &s.creates {
        v.ty(&format!("{path}.creates"), ty);
    }
    match kinds[0] {
        "call" => {
            if let Some(op) = &s.call {
                if !OPERATION_RE.is_match(op) {
                    v.push(format!("{path}.call"), format!("`{op}` is not a valid operation name"));
                }
            }
            for (i, a) in s.args.iter().enumerate() {
                v.operand(format!("{path}.args[{i}]"), a);
            }
        }
        "assign" => {
            if let Some(o) = &s.assign {
                v.operand(format!("{path}.assign"), o);
            }
            if s.creates.is_none() {
                v.push(path, "`assign` needs `creates`");
            }
        }
        "if" => {
            if let Some(o) = &s.condition {
                v.operand(format!("{path}.if"), o);
            }
            validate_steps(v, &format!("{path}.then"), &s.then, categories);
            validate_steps(v, &format!("{path}.else"), &s.otherwise, categories);
        }
        "for_each" => {
            if let Some(items) = &s.for_each {
                v.ty(&format!("{path}.for_each"), items);
            }
            match &s.item {
                Some(item) => v.ty(&format!("{path}.as"), item),
                None => v.push(path, "`for_each` needs `as`"),
            }
            validate_steps(v, &format!("{path}.do"), &s.body, categories);
        }
        "try" => {
            if s.catch.is_empty() && s.finally.is_empty() {
                v.push(path, "`try` needs `catch` or `finally`");
            }
            if let Some(body) = &s.attempt {
                validate_steps(v, &format!("{path}.try"), body, categories);
            }
            for (i, c) in s.catch.iter().enumerate() {
                if c.category != FailureHierarchy::ROOT && !categories.contains(c.category.as_str()) {
                    v.push(
                        format!("{path}.catch[{i}].category"),
                        format!("undeclared failure category `{}`", c.category),
                    );
                }
                validate_steps(v, &format!("{path}.catch[{i}].steps"), &c.steps, categories);
            }
            validate_steps(v, &format!("{path}.finally"), &s.finally, categories);
        }
        "return" => {
            if let Some(o) = &s.ret {
                v.operand(format!("{path}.return"), o);
            }
        }
        "raw" => {
            if s.raw.as_deref().is_some_and(|t| t.trim().is_empty()) {
                v.push(format!("{path}.raw"), "raw source must not be empty");
            }
            for (i, ty) in s.inputs.iter().enumerate() {
                v.ty(&format!("{path}.inputs[{i}]"), ty);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{parse_manifest_str, ManifestFormat};

    fn violations(yaml: &str) -> Vec<String> {
        let m = parse_manifest_str(yaml, ManifestFormat::Yaml).unwrap().manifest;
        match validate_manifest(&m) {
            Ok(()) => Vec::new(),
            Err(e) => e.violations.into_iter().map(|v| format!("{}: {}", v.path, v.message)).collect(),
        }
    }

    #[test]
    fn reports_paths_for_bad_entries() {
        let got = violations(
            r#"
failures:
  - name: Child
    extends: Parent
builders:
  - name: b
    stage: teardown
    match: "("
    steps:
      - call: "not an op"
      - assign: { var: User }
      - {}
"#,
        );
        assert!(got.iter().any(|v| v.starts_with("failures[0].extends:")), "{got:?}");
        assert!(got.iter().any(|v| v.starts_with("builders[0].stage: unknown stage")), "{got:?}");
        assert!(got.iter().any(|v| v.starts_with("builders[0].match: invalid regex")), "{got:?}");
        assert!(got.iter().any(|v| v.starts_with("builders[0].steps[0].call:")), "{got:?}");
        assert!(got.iter().any(|v| v == "builders[0].steps[1]: `assign` needs `creates`"), "{got:?}");
        assert!(got.iter().any(|v| v.starts_with("builders[0].steps[2]: step needs one of")), "{got:?}");
    }

    #[test]
    fn accepts_a_minimal_manifest() {
        let got = violations(
            r#"
failures:
  - name: NotFound
shapes:
  - name: users
    parameters:
      - { name: request, type: Request }
    returns: User
builders:
  - name: load
    stage: execution
    steps:
      - call: load_user
        args: [{ var: Request }]
        creates: User
    handlers:
      - category: NotFound
        steps:
          - call: log
            args: [{ var: Fault }]
"#,
        );
        assert!(got.is_empty(), "{got:?}");
    }
}
