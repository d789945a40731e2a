use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Type identifier of a pipeline variable.
///
/// Types are nominal: two variables share a type exactly when their identifiers
/// are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct VarType(String);

impl VarType {
    /// Type given to the value bound by a `catch` clause.
    pub const FAULT: &'static str = "Fault";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn fault() -> Self {
        Self(Self::FAULT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        TYPE_RE.is_match(&self.0)
    }

    /// Snake-case stem used when naming variables of this type.
    pub fn base_name(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let mut out = String::with_capacity(chars.len() + 4);
        for (i, c) in chars.iter().enumerate() {
            if c.is_ascii_uppercase() {
                let prev_lower = i > 0 && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
                let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
                let prev_upper = i > 0 && chars[i - 1].is_ascii_uppercase();
                if i > 0 && !out.ends_with('_') && (prev_lower || (prev_upper && next_lower)) {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
            } else {
                out.push(*c);
            }
        }
        let trimmed = out.trim_matches('_');
        if trimmed.is_empty() {
            "value".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VarType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for VarType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&VarType> for VarType {
    fn from(value: &VarType) -> Self {
        value.clone()
    }
}
