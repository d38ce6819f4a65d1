//! Plan nodes wrapping typed tasks.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::error::Result;
use crate::planner::{DiffEngine, TaskRun};
use crate::render::RenderDispatcher;

use super::{Lifecycle, TaskContext, TaskKey, TaskKind};

/// Type-erased view of a task used by the resolver and the executor.
#[async_trait]
pub trait PlanNode: Debug + Send + Sync {
    /// Returns the identity key.
    fn key(&self) -> &TaskKey;

    /// Returns the lifecycle policy.
    fn lifecycle(&self) -> Lifecycle;

    /// Returns the keys this task depends on.
    fn dependencies(&self) -> &[TaskKey];

    /// Returns the server-side identifier, if resolved.
    fn resolved_identity(&self) -> Option<String>;

    /// Reconciles this task and renders the result to the active target.
    ///
    /// # Errors
    ///
    /// Returns an error if lookup, validation or rendering fails.
    async fn run(&self, cx: &TaskContext) -> Result<TaskRun>;
}

/// A typed task in a plan.
///
/// The expected state is read-only for the whole pass except for the
/// server-side identifier, which is written through
/// [`set_resolved_identity`](Self::set_resolved_identity).
#[derive(Debug)]
pub struct TaskNode<T: TaskKind> {
    key: TaskKey,
    deps: Vec<TaskKey>,
    lifecycle: Lifecycle,
    spec: RwLock<T>,
}

impl<T: TaskKind> TaskNode<T> {
    /// Creates a new node for the given task.
    #[must_use]
    pub fn new(task: T) -> Self {
        let mut deps = task.dependencies();
        deps.sort();
        deps.dedup();
        Self {
            key: task.key(),
            deps,
            lifecycle: task.lifecycle(),
            spec: RwLock::new(task),
        }
    }

    /// Returns a copy of the current expected state.
    #[must_use]
    pub fn snapshot(&self) -> T {
        self.spec
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records the server-side identifier of this task.
    ///
    /// Dependents started after this call observe the identifier.
    pub fn set_resolved_identity(&self, id: impl Into<String>) {
        let id = id.into();
        debug!("Resolved identity of {} to {}", self.key, id);
        self.spec
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_identity(id);
    }
}

#[async_trait]
impl<T: TaskKind> PlanNode for TaskNode<T> {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> &[TaskKey] {
        &self.deps
    }

    fn resolved_identity(&self) -> Option<String> {
        self.spec
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .identity()
            .map(ToOwned::to_owned)
    }

    async fn run(&self, cx: &TaskContext) -> Result<TaskRun> {
        let reconciled = DiffEngine::reconcile(self, cx).await?;
        RenderDispatcher::apply(self, reconciled, cx).await
    }
}
