use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordering bucket for step builders. Builders run in stage order; within a
/// stage they keep registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    Binding,
    Authorization,
    Validation,
    Execution,
    Persistence,
    Completion,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Setup,
        Stage::Binding,
        Stage::Authorization,
        Stage::Validation,
        Stage::Execution,
        Stage::Persistence,
        Stage::Completion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Binding => "binding",
            Stage::Authorization => "authorization",
            Stage::Validation => "validation",
            Stage::Execution => "execution",
            Stage::Persistence => "persistence",
            Stage::Completion => "completion",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown stage `{s}`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_totally_ordered() {
        for pair in Stage::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!("Validation".parse::<Stage>().unwrap(), Stage::Validation);
        assert!("teardown".parse::<Stage>().is_err());
    }
}
