#![forbid(unsafe_code)]

pub mod assembler;
pub mod builder;
pub mod error;
pub mod failure;
pub mod hash;
pub mod ir;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod shape;
pub mod source;
pub mod stage;
pub mod synth;

pub use crate::assembler::{AssembledMethod, MethodCatch, PipelineAssembler};
pub use crate::builder::{BuildContext, HandlerContext, StepBuilder};
pub use crate::error::{BuildError, ManifestError, ParseError, RegistryError, ValidationError, Violation};
pub use crate::failure::FailureHierarchy;
pub use crate::hash::{is_content_hash, ContentHash};
pub use crate::ir::{Operand, Step, StepKind, VarType};
pub use crate::manifest::{load_manifest, Manifest, ManifestBuilder};
pub use crate::registry::{Registry, RegistryBuilder};
pub use crate::shape::{Parameter, PipelineMode, ShapeDescriptor, ShapeKey, METHOD_NAME};
pub use crate::source::{AvailableVariables, ConstantSource, ContextFieldSource, FnSource, ServiceSource, VariableSource};
pub use crate::stage::Stage;
pub use crate::synth::{synthesize, SynthesizedModule};
