use std::path::Path;

use pipewright_core::{synthesize, AssembledMethod, PipelineAssembler, PipelineMode, SynthesizedModule};
use serde::Serialize;

use crate::cmd::config::{find_shape, load_manifest_file};
use crate::exit_codes;
use crate::output::{print_error, print_result, OutputFormat};
use crate::{OutputArgs, ShapeArgs};

#[derive(Serialize)]
struct EmitResult<'a> {
    module: &'a str,
    hash: &'a str,
    contributors: &'a [String],
    failures: Vec<String>,
    source: &'a str,
}

pub async fn emit_cmd(path: &Path, shape: ShapeArgs, output: OutputArgs) -> i32 {
    let manifest = match load_manifest_file(path, &output) {
        Ok(m) => m,
        Err(code) => return code,
    };
    let descriptor = match find_shape(&manifest, &shape.shape, &output) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let registry = match manifest.registry() {
        Ok(r) => r,
        Err(e) => {
            print_error(output.format, output.quiet, &e.to_string());
            return exit_codes::VALIDATION_FAILED;
        }
    };

    let mode = if shape.nested {
        PipelineMode::Nested
    } else {
        PipelineMode::TopLevel
    };
    let method = match PipelineAssembler::new(registry).assemble(&descriptor, mode) {
        Ok(m) => m,
        Err(e) => {
            print_error(output.format, output.quiet, &e.to_string());
            return exit_codes::BUILD_FAILED;
        }
    };

    if output.format == OutputFormat::Dot {
        if !output.quiet {
            print!("{}", method.to_dot());
        }
        return exit_codes::SUCCESS;
    }

    match synthesize(&method) {
        Ok(module) => {
            print_module(&method, &module, &output);
            exit_codes::SUCCESS
        }
        Err(e) => {
            print_error(output.format, output.quiet, &e.to_string());
            if let Some(generated) = e.generated_source() {
                if output.format == OutputFormat::Text && !output.quiet {
                    eprintln!("{generated}");
                }
            }
            exit_codes::BUILD_FAILED
        }
    }
}

fn print_module(method: &AssembledMethod, module: &SynthesizedModule, output: &OutputArgs) {
    if output.format == OutputFormat::Text {
        if !output.quiet {
            print!("{}", module.source);
        }
        return;
    }
    let result = EmitResult {
        module: &module.module_name,
        hash: module.content_hash.as_str(),
        contributors: &method.contributors,
        failures: method
            .failures
            .iter()
            .map(|(c, parent)| match parent {
                Some(p) => format!("{c} : {p}"),
                None => c.clone(),
            })
            .collect(),
        source: &module.source,
    };
    print_result(output.format, output.quiet, &result);
}
