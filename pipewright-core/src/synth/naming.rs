use std::collections::{HashMap, HashSet};

use crate::ir::VarId;

/// Reserved words of the emission language.
pub const KEYWORDS: &[&str] = &[
    "module", "routine", "failure", "let", "call", "if", "else", "for", "in", "try", "catch", "as",
    "finally", "return", "true", "false", "null", "json",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

/// Per-method variable names. Every variable gets a distinct name, so nothing
/// is ever shadowed.
#[derive(Debug, Default)]
pub(crate) struct NameTable {
    names: HashMap<VarId, String>,
    used: HashSet<String>,
}

impl NameTable {
    pub fn name(&self, var: VarId) -> Option<&str> {
        self.names.get(&var).map(String::as_str)
    }

    /// Names `var` after `stem`, suffixing `_2`, `_3`... on collision.
    pub fn assign(&mut self, var: VarId, stem: &str) -> String {
        if let Some(existing) = self.names.get(&var) {
            return existing.clone();
        }
        let base = if is_keyword(stem) {
            format!("{stem}_value")
        } else {
            stem.to_string()
        };
        let mut candidate = base.clone();
        let mut n = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        self.used.insert(candidate.clone());
        self.names.insert(var, candidate.clone());
        candidate
    }
}
