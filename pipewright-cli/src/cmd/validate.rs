use std::path::Path;

use pipewright_core::manifest::validate_manifest;
use serde::Serialize;

use crate::cmd::config::read_manifest;
use crate::exit_codes;
use crate::output::{print_result, OutputFormat};
use crate::OutputArgs;

#[derive(Serialize)]
struct ValidateResult {
    valid: bool,
    format: String,
    shapes: usize,
    builders: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

pub async fn validate_cmd(path: &Path, output: OutputArgs) -> i32 {
    let parsed = match read_manifest(path, &output) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let manifest = &parsed.manifest;

    // the registry also rejects builders it cannot construct
    let errors: Vec<String> = match validate_manifest(manifest) {
        Ok(()) => match manifest.registry() {
            Ok(_) => vec![],
            Err(e) => vec![e.to_string()],
        },
        Err(err) => err
            .violations
            .iter()
            .map(|v| format!("{}: {}", v.path, v.message))
            .collect(),
    };

    let result = ValidateResult {
        valid: errors.is_empty(),
        format: format!("{:?}", parsed.format),
        shapes: manifest.shapes.len(),
        builders: manifest.builders.len(),
        errors,
    };

    if output.format == OutputFormat::Text && !output.quiet {
        if result.valid {
            println!(
                "ok: valid manifest ({}, {} shapes, {} builders)",
                result.format, result.shapes, result.builders
            );
        } else {
            eprintln!("error: validation failed");
            for e in &result.errors {
                eprintln!("- {e}");
            }
        }
    } else {
        print_result(output.format, output.quiet, &result);
    }

    if result.valid {
        exit_codes::SUCCESS
    } else {
        exit_codes::VALIDATION_FAILED
    }
}
