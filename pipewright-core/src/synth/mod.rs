mod emit;
mod naming;
mod order;

use serde::{Deserialize, Serialize};

use crate::assembler::AssembledMethod;
use crate::error::BuildError;
use crate::hash::ContentHash;

pub use emit::render_constant;
pub use naming::{is_keyword, KEYWORDS};

/// Generated module text and its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedModule {
    pub module_name: String,
    pub method_name: String,
    pub source: String,
    pub content_hash: ContentHash,
}

/// Emits the source of an assembled method.
///
/// Emission is a pure function of the method: the same method always yields
/// byte-identical text and therefore the same hash.
pub fn synthesize(method: &AssembledMethod) -> Result<SynthesizedModule, BuildError> {
    let source = emit::Emitter::new(method).emit()?;
    let content_hash = ContentHash::of(&source);
    tracing::debug!(
        module = %method.module_name,
        hash = %content_hash.short(),
        bytes = source.len(),
        "synthesized module"
    );
    Ok(SynthesizedModule {
        module_name: method.module_name.clone(),
        method_name: method.method_name.clone(),
        source,
        content_hash,
    })
}
