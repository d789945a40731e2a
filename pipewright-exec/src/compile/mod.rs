mod backend;
mod strategy;
mod toolchain;

pub use backend::CompilationBackend;
pub use strategy::{CompilationStrategy, InMemoryStrategy, PersistentStrategy};
pub use toolchain::{ProcessToolchain, ScriptToolchain, Toolchain};
