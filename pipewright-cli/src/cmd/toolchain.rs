use pipewright_core::ContentHash;
use pipewright_exec::compile_module;
use tokio::io::AsyncReadExt;

use crate::exit_codes;

/// External toolchain protocol: module text on stdin, image JSON on stdout,
/// one `line:column: message` diagnostic per stderr line.
pub async fn toolchain_cmd(module: &str) -> i32 {
    let mut source = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut source).await {
        eprintln!("error: failed to read module from stdin: {e}");
        return exit_codes::RUNTIME_ERROR;
    }

    let hash = ContentHash::of(&source);
    match compile_module(module, hash.as_str(), &source) {
        Ok(image) => match serde_json::to_string(&image) {
            Ok(json) => {
                println!("{json}");
                exit_codes::SUCCESS
            }
            Err(e) => {
                eprintln!("error: failed to serialize image: {e}");
                exit_codes::RUNTIME_ERROR
            }
        },
        Err(diagnostics) => {
            tracing::debug!(module, count = diagnostics.len(), "module rejected");
            for d in &diagnostics {
                eprintln!("{d}");
            }
            exit_codes::VALIDATION_FAILED
        }
    }
}
