//! Interpreter for linked module images and the operations they call.

mod fault;
mod ops;
mod vm;

pub use fault::Fault;
pub use ops::{manifest_operations, FnOperation, Operation, OperationTable, ServiceRegistry};
pub use vm::{truthy, LoadedModule};
