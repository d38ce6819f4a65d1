//! Task identity keys and lifecycle policies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a task within a plan: the task kind plus its name.
///
/// Keys order by kind first and then by name. The dependency resolver uses
/// this ordering to break ties between tasks that become ready together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskKey {
    /// Task kind, e.g. `vpc`.
    pub kind: &'static str,
    /// Task name, unique per kind.
    pub name: String,
}

impl TaskKey {
    /// Creates a new task key.
    #[must_use]
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// How a task reacts to differences between actual and expected state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Create or update the resource until it matches.
    #[default]
    Sync,
    /// The resource must exist and match exactly; never mutated.
    ExistsAndValidates,
    /// The resource must exist; differences are logged but not applied.
    ExistsAndWarnIfChanges,
}

impl Lifecycle {
    /// Returns true if this policy allows mutating the resource.
    #[must_use]
    pub const fn allows_mutation(self) -> bool {
        matches!(self, Self::Sync)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::ExistsAndValidates => write!(f, "exists-and-validates"),
            Self::ExistsAndWarnIfChanges => write!(f, "exists-and-warn-if-changes"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_by_kind_then_name() {
        let mut keys = vec![
            TaskKey::new("vpc", "b"),
            TaskKey::new("subnet", "z"),
            TaskKey::new("vpc", "a"),
        ];
        keys.sort();
        assert_eq!(keys[0], TaskKey::new("subnet", "z"));
        assert_eq!(keys[1], TaskKey::new("vpc", "a"));
        assert_eq!(keys[2].to_string(), "vpc/b");
    }

    #[test]
    fn test_lifecycle_parse() {
        let lifecycle: Lifecycle =
            serde_yaml::from_str("exists_and_warn_if_changes").expect("parse lifecycle");
        assert_eq!(lifecycle, Lifecycle::ExistsAndWarnIfChanges);
        assert!(!lifecycle.allows_mutation());
        assert!(Lifecycle::default().allows_mutation());
    }
}
