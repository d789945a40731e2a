use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ir::VarType;

/// Name of the single routine every generated module exposes.
pub const METHOD_NAME: &str = "handle";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: VarType,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: impl Into<VarType>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// Structural description of one kind of work unit (for example, one endpoint).
///
/// Two descriptors with equal fields always produce the same pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<VarType>,
}

impl ShapeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            parameters: Vec::new(),
            returns: None,
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, ty: impl Into<VarType>) -> Self {
        self.parameters.push(Parameter::new(name, ty));
        self
    }

    pub fn returns(mut self, ty: impl Into<VarType>) -> Self {
        self.returns = Some(ty.into());
        self
    }

    pub fn get_attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Deterministic module name for this shape in `mode`.
    ///
    /// Names that do not survive slugging unchanged, and shapes carrying
    /// attributes, get a digest suffix so distinct shapes never share a module.
    pub fn module_name(&self, mode: PipelineMode) -> String {
        let mut name = format!("pipeline_{}", slug(&self.name));
        if !is_plain(&self.name) || !self.attributes.is_empty() {
            name.push('_');
            name.push_str(&self.identity_digest());
        }
        if mode == PipelineMode::Nested {
            name.push_str("_nested");
        }
        name
    }

    fn identity_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(b"\0");
        for (k, v) in &self.attributes {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b";");
        }
        let digest = hex::encode(hasher.finalize());
        digest[..8].to_string()
    }
}

impl fmt::Display for ShapeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.attributes.is_empty() {
            let attrs: Vec<String> = self.attributes.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, "[{}]", attrs.join(","))?;
        }
        Ok(())
    }
}

/// Lowercase ASCII alphanumerics only; such names are their own slug.
fn is_plain(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn slug(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if s.is_empty() {
        "unnamed".to_string()
    } else {
        s
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Invoked directly by the host.
    TopLevel,
    /// Invoked from inside another pipeline; only builders that opt in apply.
    Nested,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopLevel => f.write_str("top-level"),
            Self::Nested => f.write_str("nested"),
        }
    }
}

/// Identity of one buildable pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeKey {
    pub shape: ShapeDescriptor,
    pub mode: PipelineMode,
}

impl ShapeKey {
    pub fn new(shape: ShapeDescriptor, mode: PipelineMode) -> Self {
        Self { shape, mode }
    }

    pub fn module_name(&self) -> String {
        self.shape.module_name(self.mode)
    }
}

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.shape, self.mode)
    }
}
