//! Per-execution context shared by every task in a pass.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cloud::CloudApi;
use crate::error::{CloudError, Result, TaskError};
use crate::planner::Plan;
use crate::render::{Artifact, Literal, ResourceDeclaration, Target};
use crate::retry::{with_retry, Attempt, RetryPolicies, RetryPolicy};

use super::TaskKey;

/// Shared context handed to every task of a plan execution.
///
/// Holds the cloud API, the plan (for identity lookups of dependencies), the
/// active target, retry policies, the cancellation token and, for artifact
/// targets, the declaration sink.
#[derive(Debug, Clone)]
pub struct TaskContext {
    cloud: Arc<dyn CloudApi>,
    plan: Arc<Plan>,
    target: Target,
    retry: RetryPolicies,
    cancel: CancellationToken,
    artifact: Option<Arc<Mutex<Artifact>>>,
}

impl TaskContext {
    /// Creates a new context.
    #[must_use]
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        plan: Arc<Plan>,
        target: Target,
        retry: RetryPolicies,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cloud,
            plan,
            target,
            retry,
            cancel,
            artifact: None,
        }
    }

    /// Attaches the artifact sink used by artifact targets.
    #[must_use]
    pub fn with_artifact(mut self, artifact: Arc<Mutex<Artifact>>) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// Returns the cloud API.
    #[must_use]
    pub fn cloud(&self) -> &dyn CloudApi {
        self.cloud.as_ref()
    }

    /// Returns the active target.
    #[must_use]
    pub const fn target(&self) -> Target {
        self.target
    }

    /// Returns the retry policies.
    #[must_use]
    pub const fn retry(&self) -> &RetryPolicies {
        &self.retry
    }

    /// Returns the cancellation token.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the resolved server-side identifier of another task.
    #[must_use]
    pub fn identity_of(&self, key: &TaskKey) -> Option<String> {
        self.plan.resolved_identity(key)
    }

    /// Returns the resolved identifier of a dependency or fails.
    ///
    /// # Errors
    ///
    /// Returns `MissingIdentity` if the dependency has no identifier yet.
    pub fn require_identity(&self, task: &TaskKey, dependency: &TaskKey) -> Result<String> {
        self.identity_of(dependency).ok_or_else(|| {
            TaskError::MissingIdentity {
                task: task.clone(),
                dependency: dependency.clone(),
            }
            .into()
        })
    }

    /// Maps an observed reference id back to a task key.
    ///
    /// The observed id resolves to `expected` when it matches the identity
    /// of that task; any other id yields a key that never equals `expected`,
    /// so the reference shows up as changed.
    #[must_use]
    pub fn observed_reference(
        &self,
        expected: &TaskKey,
        observed_id: Option<&str>,
    ) -> Option<TaskKey> {
        let observed_id = observed_id?;
        if self.identity_of(expected).as_deref() == Some(observed_id) {
            Some(expected.clone())
        } else {
            Some(TaskKey::new(expected.kind, format!("id:{observed_id}")))
        }
    }

    /// Runs a cloud read under the read retry policy.
    ///
    /// # Errors
    ///
    /// Returns the terminal cloud error, `Timeout` or `Cancelled`.
    pub async fn read<T, F, Fut>(&self, operation: &str, call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, CloudError>> + Send,
        T: Send,
    {
        self.call(operation, &self.retry.read, call).await
    }

    /// Runs a cloud mutation under the write retry policy.
    ///
    /// # Errors
    ///
    /// Returns the terminal cloud error, `Timeout` or `Cancelled`.
    pub async fn write<T, F, Fut>(&self, operation: &str, call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, CloudError>> + Send,
        T: Send,
    {
        self.call(operation, &self.retry.write, call).await
    }

    async fn call<T, F, Fut>(&self, operation: &str, policy: &RetryPolicy, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, CloudError>> + Send,
        T: Send,
    {
        with_retry(operation, policy, &self.cancel, || {
            let attempt = call();
            async move { Attempt::from_cloud(attempt.await) }
        })
        .await
    }

    /// Builds a symbolic reference to another task for artifact output.
    ///
    /// The reference carries the task's resolved identifier so that it can
    /// fall back to a literal when the task is not declared in the artifact.
    #[must_use]
    pub fn reference(&self, key: &TaskKey) -> Literal {
        Literal::Reference {
            key: key.clone(),
            fallback: self.identity_of(key),
        }
    }

    /// Appends a declaration to the artifact sink.
    ///
    /// # Errors
    ///
    /// Returns an error if no sink is attached or the declaration is a duplicate.
    pub async fn declare(&self, declaration: ResourceDeclaration) -> Result<()> {
        let sink = self.artifact.as_ref().ok_or_else(|| {
            crate::error::ConvergeError::internal(format!(
                "no artifact sink attached for the {} target",
                self.target
            ))
        })?;
        sink.lock().await.push(declaration)
    }
}
