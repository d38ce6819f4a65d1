//! Plans: the set of tasks for one reconciliation pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{PlanError, Result};
use crate::task::{PlanNode, TaskKey, TaskKind, TaskNode};

use super::DependencyGraph;

/// The tasks of one reconciliation pass, keyed by identity.
///
/// A plan is built fresh for every run and never persisted.
#[derive(Debug, Default)]
pub struct Plan {
    nodes: BTreeMap<TaskKey, Arc<dyn PlanNode>>,
}

impl Plan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a task to the plan.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::DuplicateTask` if a task with the same key exists.
    pub fn add<T: TaskKind>(&mut self, task: T) -> Result<Arc<TaskNode<T>>> {
        let node = Arc::new(TaskNode::new(task));
        let key = node.key().clone();
        if self.nodes.contains_key(&key) {
            return Err(PlanError::DuplicateTask { key }.into());
        }
        self.nodes.insert(key, Arc::clone(&node) as Arc<dyn PlanNode>);
        Ok(node)
    }

    /// Returns a task by key.
    #[must_use]
    pub fn get(&self, key: &TaskKey) -> Option<&Arc<dyn PlanNode>> {
        self.nodes.get(key)
    }

    /// Returns true if the plan contains the key.
    #[must_use]
    pub fn contains(&self, key: &TaskKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Returns the resolved server-side identifier of a task.
    #[must_use]
    pub fn resolved_identity(&self, key: &TaskKey) -> Option<String> {
        self.nodes.get(key).and_then(|node| node.resolved_identity())
    }

    /// Iterates over the tasks in key order.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<dyn PlanNode>> {
        self.nodes.values()
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the plan has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the dependency-respecting execution order.
    ///
    /// # Errors
    ///
    /// Returns a plan error on missing dependencies or cycles.
    pub fn execution_order(&self) -> Result<Vec<TaskKey>> {
        DependencyGraph::build(self)?.topological_order()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergeError;
    use crate::testing::Disk;

    #[test]
    fn test_duplicate_key_rejected() {
        let mut plan = Plan::new();
        plan.add(Disk::new("a", 5)).expect("first add");
        let err = plan.add(Disk::new("a", 6)).expect_err("duplicate");
        assert!(matches!(
            err,
            ConvergeError::Plan(PlanError::DuplicateTask { .. })
        ));
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_resolved_identity_visible_through_plan() {
        let mut plan = Plan::new();
        let node = plan.add(Disk::new("a", 5)).expect("add");
        let key = node.key().clone();
        assert!(plan.resolved_identity(&key).is_none());

        node.set_resolved_identity("disk-7");
        assert_eq!(plan.resolved_identity(&key).as_deref(), Some("disk-7"));
    }
}
