use std::path::Path;

use pipewright_core::ShapeDescriptor;
use serde::Serialize;
use serde_json::Value;

use crate::cmd::config::{build_engine, find_shape, load_manifest_file};
use crate::exit_codes;
use crate::output::{print_error, print_result, OutputFormat};
use crate::{EngineArgs, OutputArgs, ShapeArgs};

#[derive(Serialize)]
struct RunResult<'a> {
    shape: &'a str,
    module: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fault: Option<Value>,
}

pub async fn run_cmd(
    path: &Path,
    shape: ShapeArgs,
    args: Option<&str>,
    args_file: Option<&Path>,
    engine: EngineArgs,
    output: OutputArgs,
) -> i32 {
    let manifest = match load_manifest_file(path, &output) {
        Ok(m) => m,
        Err(code) => return code,
    };
    let descriptor = match find_shape(&manifest, &shape.shape, &output) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let raw = match read_args(args, args_file) {
        Ok(v) => v,
        Err(message) => {
            print_error(output.format, output.quiet, &message);
            return exit_codes::VALIDATION_FAILED;
        }
    };
    let args = match positional_args(&descriptor, raw) {
        Ok(a) => a,
        Err(message) => {
            print_error(output.format, output.quiet, &message);
            return exit_codes::VALIDATION_FAILED;
        }
    };

    let engine = match build_engine(&manifest, &engine, &output) {
        Ok(e) => e,
        Err(code) => return code,
    };
    let built = if shape.nested {
        engine.nested(&descriptor).await
    } else {
        engine.pipeline(&descriptor).await
    };
    let pipeline = match built {
        Ok(p) => p,
        Err(e) => {
            print_error(output.format, output.quiet, &e.to_string());
            return exit_codes::BUILD_FAILED;
        }
    };

    let outcome = pipeline.invoke(args).await;
    let (result, fault) = match &outcome {
        Ok(v) => (Some(v.clone()), None),
        Err(f) => (None, Some(f.to_value())),
    };
    let report = RunResult {
        shape: &descriptor.name,
        module: pipeline.module_name(),
        result,
        fault,
    };

    if output.format == OutputFormat::Text && !output.quiet {
        match &outcome {
            Ok(v) => println!("{}", serde_json::to_string_pretty(v).unwrap_or_default()),
            Err(f) => eprintln!("fault: {f}"),
        }
    } else {
        print_result(output.format, output.quiet, &report);
    }

    match outcome {
        Ok(_) => exit_codes::SUCCESS,
        Err(_) => exit_codes::ROUTINE_FAULT,
    }
}

/// Reads `--args` or `--args-file`; a file may be JSON or YAML.
fn read_args(args: Option<&str>, args_file: Option<&Path>) -> Result<Option<Value>, String> {
    if let Some(text) = args {
        return serde_json::from_str(text)
            .map(Some)
            .map_err(|e| format!("--args is not valid JSON: {e}"));
    }
    let Some(path) = args_file else {
        return Ok(None);
    };
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    if let Ok(v) = serde_json::from_str(&content) {
        return Ok(Some(v));
    }
    if let Ok(v) = serde_yaml::from_str(&content) {
        return Ok(Some(v));
    }
    Err(format!("{} is neither valid JSON nor YAML", path.display()))
}

/// Orders arguments by the shape's parameter list.
fn positional_args(shape: &ShapeDescriptor, raw: Option<Value>) -> Result<Vec<Value>, String> {
    let expected = shape.parameters.len();
    match raw {
        None if expected == 0 => Ok(vec![]),
        None => Err(format!("shape `{}` takes {expected} arguments; pass --args", shape.name)),
        Some(Value::Array(items)) if items.len() == expected => Ok(items),
        Some(Value::Array(items)) => Err(format!(
            "shape `{}` takes {expected} arguments, got {}",
            shape.name,
            items.len()
        )),
        Some(Value::Object(mut map)) => {
            let mut args = Vec::with_capacity(expected);
            for p in &shape.parameters {
                let value = map
                    .remove(&p.name)
                    .ok_or_else(|| format!("missing argument `{}`", p.name))?;
                args.push(value);
            }
            if let Some(extra) = map.keys().next() {
                return Err(format!("shape `{}` has no parameter `{extra}`", shape.name));
            }
            Ok(args)
        }
        Some(_) => Err("arguments must be a JSON array or an object keyed by parameter name".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shape() -> ShapeDescriptor {
        ShapeDescriptor::new("orders")
            .parameter("envelope", "Envelope")
            .parameter("limit", "Limit")
    }

    #[test]
    fn objects_are_ordered_by_parameter() {
        let args = positional_args(&shape(), Some(json!({ "limit": 3, "envelope": { "user_id": "u1" } }))).unwrap();
        assert_eq!(args, vec![json!({ "user_id": "u1" }), json!(3)]);
    }

    #[test]
    fn argument_count_and_names_are_checked() {
        assert!(positional_args(&shape(), Some(json!([1]))).is_err());
        assert!(positional_args(&shape(), None).is_err());
        let err = positional_args(&shape(), Some(json!({ "envelope": 1, "limit": 2, "extra": 3 }))).unwrap_err();
        assert_eq!(err, "shape `orders` has no parameter `extra`");
        assert_eq!(positional_args(&ShapeDescriptor::new("ping"), None).unwrap(), Vec::<Value>::new());
    }
}
