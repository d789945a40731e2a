use std::collections::{BTreeMap, BTreeSet};

use crate::error::RegistryError;
use crate::ir::VarType;

/// Category tree for runtime faults, rooted at the reserved `Fault`.
///
/// Parents must be declared before their children, so the tree is acyclic by
/// construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureHierarchy {
    parents: BTreeMap<String, Option<String>>,
    order: Vec<String>,
}

impl FailureHierarchy {
    pub const ROOT: &'static str = VarType::FAULT;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, category: &str, parent: Option<&str>) -> Result<(), RegistryError> {
        if category == Self::ROOT {
            return Err(RegistryError::Reserved(category.to_string()));
        }
        if !VarType::new(category).is_valid() {
            return Err(RegistryError::InvalidCategory(category.to_string()));
        }
        if self.parents.contains_key(category) {
            return Err(RegistryError::DuplicateCategory(category.to_string()));
        }
        let parent = match parent {
            None | Some(Self::ROOT) => None,
            Some(p) if self.parents.contains_key(p) => Some(p.to_string()),
            Some(p) => {
                return Err(RegistryError::UnknownParent {
                    category: category.to_string(),
                    parent: p.to_string(),
                })
            }
        };
        self.parents.insert(category.to_string(), parent);
        self.order.push(category.to_string());
        Ok(())
    }

    pub fn contains(&self, category: &str) -> bool {
        category == Self::ROOT || self.parents.contains_key(category)
    }

    pub fn parent(&self, category: &str) -> Option<&str> {
        self.parents.get(category).and_then(|p| p.as_deref())
    }

    /// `category` followed by its ancestors, ending with `Fault`.
    pub fn lineage(&self, category: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut cur = Some(category);
        while let Some(c) = cur {
            if c == Self::ROOT {
                break;
            }
            out.push(c.to_string());
            cur = self.parent(c);
        }
        out.push(Self::ROOT.to_string());
        out
    }

    /// Distance from the root; `Fault` is 0, its direct children 1.
    pub fn depth(&self, category: &str) -> usize {
        self.lineage(category).len() - 1
    }

    pub fn is_a(&self, category: &str, ancestor: &str) -> bool {
        self.lineage(category).iter().any(|c| c == ancestor)
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.order
            .iter()
            .map(|c| (c.as_str(), self.parent(c)))
    }

    /// Declarations needed by a module catching `used`: each used category,
    /// every category beneath one, and all their ancestors, parents first.
    /// A handler for a parent must match faults raised with a child category.
    pub fn declarations<'a>(&self, used: impl IntoIterator<Item = &'a str>) -> Vec<(String, Option<String>)> {
        let used: BTreeSet<&str> = used.into_iter().collect();
        let mut needed = BTreeSet::new();
        for c in used.iter().copied().chain(self.order.iter().map(String::as_str)) {
            let lineage = self.lineage(c);
            if !lineage.iter().any(|l| used.contains(l.as_str())) {
                continue;
            }
            needed.extend(lineage.into_iter().filter(|l| l != Self::ROOT));
        }
        self.order
            .iter()
            .filter(|c| needed.contains(*c))
            .map(|c| (c.clone(), self.parent(c).map(str::to_string)))
            .collect()
    }
}
