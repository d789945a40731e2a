//! Front end for generated pipeline modules: lexing, parsing, checking and
//! lowering to a [`ModuleImage`].

pub mod ast;
mod check;
mod diagnostic;
mod parser;
mod token;

pub use check::check_module;
pub use diagnostic::{Diagnostic, Pos};
pub use parser::parse_module;
pub use token::{tokenize, Token, TokenKind};

use crate::image::ModuleImage;

/// Compiles module text into an image, or returns every diagnostic found.
///
/// Lexing and parsing stop at the first error; semantic checks report all
/// problems at once.
pub fn compile_module(expected_name: &str, content_hash: &str, source: &str) -> Result<ModuleImage, Vec<Diagnostic>> {
    let tokens = tokenize(source).map_err(|d| vec![d])?;
    let module = parse_module(&tokens).map_err(|d| vec![d])?;
    let image = check_module(&module, content_hash);
    if module.name != expected_name {
        let mismatch = Diagnostic::new(
            module.pos,
            format!("module is named `{}`, expected `{expected_name}`", module.name),
        );
        return Err(match image {
            Ok(_) => vec![mismatch],
            Err(mut diags) => {
                diags.insert(0, mismatch);
                diags
            }
        });
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Instr, ValueRef};

    const SAMPLE: &str = r#"// users (top-level)
module pipeline_users {
  failure Base;
  failure Specific : Base;
  routine handle(request: Request) -> Result {
    let user_id: UserId = call value.get(request, "user_id");
    try {
      let result: Result = call load(user_id);
      return result;
    } catch Specific as fault {
      call report(fault);
    } finally {
      call value.get(request, "done");
    }
  }
}
"#;

    #[test]
    fn lowers_to_slots_and_operation_indices() {
        let image = compile_module("pipeline_users", "h", SAMPLE).unwrap();
        assert_eq!(image.operations, vec!["value.get", "load", "report"]);
        assert_eq!(image.failures[1].parent.as_deref(), Some("Base"));
        let r = image.routine("handle").unwrap();
        assert_eq!(r.slots, 4);
        assert_eq!(
            r.body[0],
            Instr::Call {
                operation: 0,
                args: vec![ValueRef::Slot(0), ValueRef::Const("user_id".into())],
                out: Some(1),
            }
        );
        match &r.body[1] {
            Instr::Try { catches, finally, .. } => {
                assert_eq!(catches[0].slot, 3);
                assert!(finally.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn errors(src: &str) -> Vec<String> {
        compile_module("m", "h", src)
            .unwrap_err()
            .into_iter()
            .map(|d| d.to_string())
            .collect()
    }

    #[test]
    fn semantic_errors_are_all_reported() {
        let errs = errors(
            r#"module m {
  failure A : Missing;
  routine handle(x: X) -> Y {
    call use(nope);
    let x: X = call make();
    try { call a(); }
    try { call b(); } catch Other as f { }
    return x;
  }
}"#,
        );
        assert_eq!(
            errs,
            vec![
                "2:3: failure `A` extends undeclared category `Missing`",
                "4:14: `nope` is not defined",
                "5:5: `x` is already defined",
                "6:5: `try` without `catch` or `finally`",
                "7:23: undeclared failure category `Other`",
                "8:5: returns `X` where `Y` is declared",
            ]
        );
    }

    #[test]
    fn unreachable_code_and_stray_results() {
        let errs = errors("module m {\n  routine handle() {\n    return 1;\n    call a();\n  }\n}");
        assert_eq!(
            errs,
            vec![
                "3:5: routine `handle` declares no result type but returns a value",
                "4:5: unreachable statement after `return`",
            ]
        );
    }

    #[test]
    fn module_name_must_match() {
        let errs = errors("module other { }");
        assert_eq!(errs, vec!["1:8: module is named `other`, expected `m`"]);
    }

    #[test]
    fn parse_errors_stop_early() {
        let errs = errors("module m { routine handle() { let x: X = ; } }");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].starts_with("1:42: expected a variable or literal"), "{errs:?}");
    }
}
