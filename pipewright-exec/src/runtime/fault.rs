use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A runtime failure raised by an operation or by the interpreter itself.
///
/// Faults are values: routines catch them by category and the engine hands
/// uncaught ones back to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{category}: {message}")]
pub struct Fault {
    pub category: String,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl Fault {
    pub const TYPE_MISMATCH: &'static str = "TypeMismatch";
    pub const INVALID_ARGUMENTS: &'static str = "InvalidArguments";
    pub const UNKNOWN_SERVICE: &'static str = "UnknownService";

    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(Self::TYPE_MISMATCH, message)
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_ARGUMENTS, message)
    }

    /// The value a `catch` clause binds.
    pub fn to_value(&self) -> Value {
        json!({
            "category": self.category,
            "message": self.message,
            "data": self.data,
        })
    }
}
