use std::collections::BTreeMap;
use std::path::Path;

use pipewright_core::PipelineMode;
use serde::Serialize;

use crate::cmd::config::load_manifest_file;
use crate::exit_codes;
use crate::output::{print_result, OutputFormat};
use crate::OutputArgs;

#[derive(Serialize)]
struct ShapeInfo {
    name: String,
    module: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
    parameters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    returns: Option<String>,
}

#[derive(Serialize)]
struct ShapesResult {
    shapes: Vec<ShapeInfo>,
}

pub async fn shapes_cmd(path: &Path, output: OutputArgs) -> i32 {
    let manifest = match load_manifest_file(path, &output) {
        Ok(m) => m,
        Err(code) => return code,
    };

    let shapes: Vec<ShapeInfo> = manifest
        .shapes
        .iter()
        .map(|s| ShapeInfo {
            name: s.name.clone(),
            module: s.module_name(PipelineMode::TopLevel),
            attributes: s.attributes.clone(),
            parameters: s.parameters.iter().map(|p| format!("{}: {}", p.name, p.ty)).collect(),
            returns: s.returns.as_ref().map(ToString::to_string),
        })
        .collect();
    let result = ShapesResult { shapes };

    if output.format == OutputFormat::Text && !output.quiet {
        println!("Shapes in {}:", path.display());
        for s in &result.shapes {
            let returns = s.returns.as_deref().map(|r| format!(" -> {r}")).unwrap_or_default();
            println!("  - {}({}){returns}  [{}]", s.name, s.parameters.join(", "), s.module);
            for (k, v) in &s.attributes {
                println!("    {k}={v}");
            }
        }
    } else {
        print_result(output.format, output.quiet, &result);
    }

    exit_codes::SUCCESS
}
