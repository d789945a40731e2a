use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const IMAGE_FORMAT_VERSION: u32 = 1;

/// Compiled, serializable form of a generated module.
///
/// Images are what the compilation cache stores: variables are resolved to
/// slot indices and operations to indices into `operations`, so loading an
/// image only has to link operation names against an operation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleImage {
    pub format_version: u32,
    pub name: String,
    pub content_hash: String,
    #[serde(default)]
    pub failures: Vec<FailureEntry>,
    #[serde(default)]
    pub operations: Vec<String>,
    pub routines: Vec<RoutineImage>,
}

impl ModuleImage {
    pub fn routine(&self, name: &str) -> Option<&RoutineImage> {
        self.routines.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamImage {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// Parameters occupy slots `0..params.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineImage {
    pub name: String,
    pub params: Vec<ParamImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    pub slots: usize,
    pub body: Vec<Instr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instr {
    Call {
        operation: usize,
        args: Vec<ValueRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        out: Option<usize>,
    },
    Assign {
        value: ValueRef,
        out: usize,
    },
    If {
        condition: ValueRef,
        then: Vec<Instr>,
        #[serde(default)]
        otherwise: Vec<Instr>,
    },
    For {
        items: ValueRef,
        item: usize,
        body: Vec<Instr>,
    },
    Try {
        body: Vec<Instr>,
        #[serde(default)]
        catches: Vec<CatchImage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finally: Option<Vec<Instr>>,
    },
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<ValueRef>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchImage {
    pub category: String,
    pub slot: usize,
    pub body: Vec<Instr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRef {
    Slot(usize),
    Const(Value),
}
