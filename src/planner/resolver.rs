//! Dependency resolution.
//!
//! Builds the depends-on graph from the references each task declares and
//! produces a deterministic topological order (Kahn's algorithm, ties broken
//! by task key). Cycles are reported with the full cycle path.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{PlanError, Result};
use crate::task::TaskKey;

use super::Plan;

/// Depends-on graph of a plan.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Task -> tasks it depends on.
    dependencies: BTreeMap<TaskKey, BTreeSet<TaskKey>>,
    /// Task -> tasks that depend on it.
    dependents: BTreeMap<TaskKey, BTreeSet<TaskKey>>,
}

impl DependencyGraph {
    /// Builds the graph for a plan.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::MissingDependency` if a task references a key that
    /// is not part of the plan.
    pub fn build(plan: &Plan) -> Result<Self> {
        let mut graph = Self::default();

        for node in plan.nodes() {
            let key = node.key();
            graph.dependencies.entry(key.clone()).or_default();
            graph.dependents.entry(key.clone()).or_default();

            for dependency in node.dependencies() {
                if !plan.contains(dependency) {
                    return Err(PlanError::MissingDependency {
                        task: key.clone(),
                        dependency: dependency.clone(),
                    }
                    .into());
                }
                graph
                    .dependencies
                    .entry(key.clone())
                    .or_default()
                    .insert(dependency.clone());
                graph
                    .dependents
                    .entry(dependency.clone())
                    .or_default()
                    .insert(key.clone());
            }
        }

        Ok(graph)
    }

    /// Returns the tasks a task depends on.
    #[must_use]
    pub fn dependencies_of(&self, key: &TaskKey) -> Option<&BTreeSet<TaskKey>> {
        self.dependencies.get(key)
    }

    /// Returns the tasks that directly depend on a task.
    #[must_use]
    pub fn dependents_of(&self, key: &TaskKey) -> Option<&BTreeSet<TaskKey>> {
        self.dependents.get(key)
    }

    /// Returns every task that transitively depends on a task.
    #[must_use]
    pub fn transitive_dependents(&self, key: &TaskKey) -> BTreeSet<TaskKey> {
        let mut found = BTreeSet::new();
        let mut queue: VecDeque<&TaskKey> = VecDeque::from([key]);

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents.get(current).into_iter().flatten() {
                if found.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }
        }

        found
    }

    /// Returns the number of tasks in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Returns true if the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Returns a topological order: every task after all of its dependencies.
    ///
    /// Among tasks that are ready at the same time, the smallest key comes
    /// first, so the order is fully determined by the plan.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Cycle` naming the cycle path if the graph is not
    /// acyclic.
    pub fn topological_order(&self) -> Result<Vec<TaskKey>> {
        let mut remaining: BTreeMap<&TaskKey, usize> = self
            .dependencies
            .iter()
            .map(|(key, deps)| (key, deps.len()))
            .collect();

        let mut ready: BTreeSet<&TaskKey> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| *key)
            .collect();

        let mut order = Vec::with_capacity(self.dependencies.len());

        while let Some(key) = ready.pop_first() {
            remaining.remove(key);
            order.push(key.clone());

            for dependent in self.dependents.get(key).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() < self.dependencies.len() {
            let blocked: BTreeSet<&TaskKey> = remaining.keys().copied().collect();
            return Err(PlanError::Cycle {
                cycle: self.find_cycle(&blocked),
            }
            .into());
        }

        Ok(order)
    }

    /// Extracts one cycle among the tasks Kahn's algorithm could not order.
    ///
    /// Every blocked task has at least one blocked dependency, so walking
    /// blocked dependencies from any blocked task must revisit a task.
    fn find_cycle(&self, blocked: &BTreeSet<&TaskKey>) -> Vec<TaskKey> {
        let Some(&start) = blocked.first() else {
            return Vec::new();
        };

        let mut path: Vec<&TaskKey> = vec![start];
        let mut current: &TaskKey = start;

        loop {
            let next = self
                .dependencies
                .get(current)
                .into_iter()
                .flatten()
                .find(|dep| blocked.contains(dep));

            let Some(next) = next else {
                return path.into_iter().cloned().collect();
            };

            if let Some(position) = path.iter().position(|k| *k == next) {
                let mut cycle: Vec<TaskKey> =
                    path[position..].iter().map(|k| (*k).clone()).collect();
                cycle.push(next.clone());
                return cycle;
            }

            path.push(next);
            current = next;
        }
    }
}

/// Returns the execution order of a plan.
///
/// # Errors
///
/// Returns a plan error on missing dependencies or cycles.
pub fn order(plan: &Plan) -> Result<Vec<TaskKey>> {
    DependencyGraph::build(plan)?.topological_order()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergeError;
    use crate::task::TaskKind;
    use crate::testing::Disk;

    fn key(name: &str) -> TaskKey {
        TaskKey::new(Disk::KIND, name)
    }

    #[test]
    fn test_dependencies_come_first() {
        let mut plan = Plan::new();
        plan.add(Disk::new("app", 1).with_parent("net")).expect("add");
        plan.add(Disk::new("net", 1)).expect("add");
        plan.add(Disk::new("db", 1).with_parent("net")).expect("add");
        plan.add(Disk::new("web", 1).with_parent("app").with_peers(&["db"]))
            .expect("add");

        let order = order(&plan).expect("order");
        let position = |name: &str| order.iter().position(|k| *k == key(name)).expect("present");

        assert_eq!(order.len(), 4);
        assert!(position("net") < position("app"));
        assert!(position("net") < position("db"));
        assert!(position("app") < position("web"));
        assert!(position("db") < position("web"));
    }

    #[test]
    fn test_ties_broken_by_key() {
        let mut plan = Plan::new();
        for name in ["c", "a", "b"] {
            plan.add(Disk::new(name, 1)).expect("add");
        }
        let order = order(&plan).expect("order");
        assert_eq!(order, vec![key("a"), key("b"), key("c")]);
    }

    #[test]
    fn test_cycle_reports_path() {
        let mut plan = Plan::new();
        plan.add(Disk::new("a", 1).with_parent("b")).expect("add");
        plan.add(Disk::new("b", 1).with_parent("c")).expect("add");
        plan.add(Disk::new("c", 1).with_parent("a")).expect("add");
        plan.add(Disk::new("free", 1)).expect("add");

        let err = order(&plan).expect_err("cycle");
        let cycle = match err {
            ConvergeError::Plan(PlanError::Cycle { cycle }) => cycle,
            other => panic!("expected cycle error, got {other}"),
        };
        assert_eq!(cycle, vec![key("a"), key("b"), key("c"), key("a")]);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut plan = Plan::new();
        plan.add(Disk::new("a", 1).with_parent("a")).expect("add");
        let err = order(&plan).expect_err("cycle");
        assert!(matches!(err, ConvergeError::Plan(PlanError::Cycle { .. })));
    }

    #[test]
    fn test_missing_dependency() {
        let mut plan = Plan::new();
        plan.add(Disk::new("a", 1).with_parent("ghost")).expect("add");
        let err = order(&plan).expect_err("missing");
        assert!(matches!(
            err,
            ConvergeError::Plan(PlanError::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_transitive_dependents() {
        let mut plan = Plan::new();
        plan.add(Disk::new("root", 1)).expect("add");
        plan.add(Disk::new("mid", 1).with_parent("root")).expect("add");
        plan.add(Disk::new("leaf", 1).with_parent("mid")).expect("add");
        plan.add(Disk::new("other", 1)).expect("add");

        let graph = DependencyGraph::build(&plan).expect("graph");
        let dependents = graph.transitive_dependents(&key("root"));
        assert_eq!(dependents, BTreeSet::from([key("mid"), key("leaf")]));
        assert!(graph.transitive_dependents(&key("other")).is_empty());
    }
}
