//! Render targets and the render dispatcher.
//!
//! A task kind opts into a target by implementing the matching capability
//! trait and returning it from its `as_*` accessor. The dispatcher routes
//! each reconciled task to the capability of the active target.

mod artifact;
mod cloudformation;
mod terraform;

pub use artifact::{Artifact, ArtifactFormat, Literal, ResourceDeclaration};

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{Result, TaskError};
use crate::planner::{Delta, PolicyDecision, Reconciled, TaskOutcome, TaskRun};
use crate::task::{TaskContext, TaskKind, TaskNode};

/// Rendering mode of a plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Create and update resources through the cloud API.
    Live,
    /// Emit a Terraform JSON configuration.
    Terraform,
    /// Emit a `CloudFormation` JSON template.
    #[value(name = "cloudformation")]
    CloudFormation,
    /// Compute and report deltas without rendering anything.
    #[value(name = "dry-run")]
    #[serde(rename = "dry-run")]
    DryRun,
}

impl Target {
    /// Returns the artifact format produced by this target, if any.
    #[must_use]
    pub const fn artifact_format(self) -> Option<ArtifactFormat> {
        match self {
            Self::Terraform => Some(ArtifactFormat::Terraform),
            Self::CloudFormation => Some(ArtifactFormat::CloudFormation),
            Self::Live | Self::DryRun => None,
        }
    }

    /// Returns true if this target mutates cloud resources.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Terraform => write!(f, "terraform"),
            Self::CloudFormation => write!(f, "cloudformation"),
            Self::DryRun => write!(f, "dry-run"),
        }
    }
}

/// What a live render did with a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveChange {
    /// The resource was created with this server-assigned identifier.
    Created(String),
    /// The resource was updated.
    Updated,
    /// The live target cannot apply the delta; nothing was sent.
    Unapplied,
}

/// Renders a task by calling the cloud API.
#[async_trait]
pub trait LiveRenderable<T: TaskKind>: Send + Sync {
    /// Creates or updates the resource.
    ///
    /// Only fields that change in `delta` may be sent.
    ///
    /// # Errors
    ///
    /// Returns an error if an API call fails.
    async fn render_live(
        &self,
        cx: &TaskContext,
        actual: Option<&T>,
        delta: &Delta,
    ) -> Result<LiveChange>;
}

/// Renders a task as Terraform resource declarations.
#[async_trait]
pub trait TerraformRenderable<T: TaskKind>: Send + Sync {
    /// Declares the resource in the artifact sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot express the resource.
    async fn render_terraform(
        &self,
        cx: &TaskContext,
        actual: Option<&T>,
        delta: &Delta,
    ) -> Result<()>;
}

/// Renders a task as `CloudFormation` resource declarations.
#[async_trait]
pub trait CloudFormationRenderable<T: TaskKind>: Send + Sync {
    /// Declares the resource in the artifact sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot express the resource.
    async fn render_cloudformation(
        &self,
        cx: &TaskContext,
        actual: Option<&T>,
        delta: &Delta,
    ) -> Result<()>;
}

/// Routes reconciled tasks to the active target.
#[derive(Debug, Default, Clone, Copy)]
pub struct RenderDispatcher;

impl RenderDispatcher {
    /// Renders a reconciled task and classifies its outcome.
    ///
    /// - suppressed deltas are reported as skipped and never rendered
    /// - the live target issues no call for an existing resource with an
    ///   empty delta, and a delta it cannot apply is reported as skipped
    /// - artifact targets render every task
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedTarget` if the kind has no renderer for the
    /// active target, or the renderer's error.
    pub async fn apply<T: TaskKind>(
        node: &TaskNode<T>,
        reconciled: Reconciled<T>,
        cx: &TaskContext,
    ) -> Result<TaskRun> {
        let Reconciled {
            expected,
            actual,
            delta,
            decision,
        } = reconciled;

        if let PolicyDecision::Suppressed(suppressed) = decision {
            return Ok(TaskRun::new(TaskOutcome::SkippedPolicy, suppressed.summary()));
        }

        let mut outcome = if actual.is_none() {
            TaskOutcome::Created
        } else if delta.is_empty() {
            TaskOutcome::NoChange
        } else {
            TaskOutcome::Updated
        };
        let target = cx.target();

        match target {
            Target::DryRun => {}
            Target::Live => {
                let renderer = expected.as_live().ok_or_else(|| unsupported::<T>(target))?;
                if actual.is_some() && delta.is_empty() {
                    debug!("{} is up to date", expected.key());
                } else {
                    match renderer.render_live(cx, actual.as_ref(), &delta).await? {
                        LiveChange::Created(id) => node.set_resolved_identity(id),
                        LiveChange::Updated => {}
                        LiveChange::Unapplied => outcome = TaskOutcome::SkippedPolicy,
                    }
                }
            }
            Target::Terraform => {
                let renderer = expected
                    .as_terraform()
                    .ok_or_else(|| unsupported::<T>(target))?;
                renderer.render_terraform(cx, actual.as_ref(), &delta).await?;
            }
            Target::CloudFormation => {
                let renderer = expected
                    .as_cloudformation()
                    .ok_or_else(|| unsupported::<T>(target))?;
                renderer
                    .render_cloudformation(cx, actual.as_ref(), &delta)
                    .await?;
            }
        }

        Ok(TaskRun::new(outcome, delta.summary()))
    }
}

fn unsupported<T: TaskKind>(target: Target) -> crate::error::ConvergeError {
    TaskError::UnsupportedTarget {
        kind: T::KIND,
        target,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MemoryCloud;
    use crate::error::ConvergeError;
    use crate::planner::{DiffEngine, Plan};
    use crate::task::{Lifecycle, PlanNode};
    use crate::testing::{context, Disk};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_empty_delta_issues_no_mutation() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert("disk", Disk::remote("disk-1", "data", 5));

        let mut plan = Plan::new();
        plan.add(Disk::new("data", 5)).expect("add");
        let plan = Arc::new(plan);
        let cx = context(Arc::clone(&cloud), Arc::clone(&plan), Target::Live);

        let node = plan.nodes().next().expect("node");
        let run = node.run(&cx).await.expect("run");

        assert_eq!(run.outcome, TaskOutcome::NoChange);
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_update_sends_only_changed_fields() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert("disk", Disk::remote("disk-1", "data", 3));

        let mut plan = Plan::new();
        let node = plan.add(Disk::new("data", 5)).expect("add");
        let cx = context(Arc::clone(&cloud), Arc::new(plan), Target::Live);

        let run = node.run(&cx).await.expect("run");

        assert_eq!(run.outcome, TaskOutcome::Updated);
        assert_eq!(run.changes, vec![String::from("Size: changed(3,5)")]);
        match cloud.last_mutation() {
            Some(crate::cloud::Mutation::Update { attributes, .. }) => {
                assert_eq!(attributes.len(), 1);
                assert_eq!(attributes["size"], 5);
            }
            other => panic!("unexpected mutation: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_writes_back_identity() {
        let cloud = Arc::new(MemoryCloud::default());
        let mut plan = Plan::new();
        let node = plan.add(Disk::new("data", 5)).expect("add");
        let cx = context(Arc::clone(&cloud), Arc::new(plan), Target::Live);

        let run = node.run(&cx).await.expect("run");

        assert_eq!(run.outcome, TaskOutcome::Created);
        assert_eq!(node.snapshot().id.as_deref(), Some("disk-0001"));
        assert_eq!(cloud.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_validation_policy_never_renders() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert("disk", Disk::remote("disk-1", "data", 3));

        let mut plan = Plan::new();
        let node = plan
            .add(Disk::new("data", 5).with_lifecycle(Lifecycle::ExistsAndValidates))
            .expect("add");
        let cx = context(Arc::clone(&cloud), Arc::new(plan), Target::Live);

        let err = node.run(&cx).await.expect_err("validation error");

        assert!(matches!(err, ConvergeError::Task(TaskError::Validation { .. })));
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_capability_is_unsupported_target() {
        let cloud = Arc::new(MemoryCloud::default());
        let mut plan = Plan::new();
        let node = plan.add(Disk::new("data", 5)).expect("add");
        let cx = context(cloud, Arc::new(plan), Target::CloudFormation);

        let reconciled = DiffEngine::reconcile(&node, &cx).await.expect("reconcile");
        let err = RenderDispatcher::apply(&node, reconciled, &cx)
            .await
            .expect_err("unsupported");

        assert!(matches!(
            err,
            ConvergeError::Task(TaskError::UnsupportedTarget { kind: "disk", .. })
        ));
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_mutation() {
        let cloud = Arc::new(MemoryCloud::default());
        let mut plan = Plan::new();
        let node = plan.add(Disk::new("data", 5)).expect("add");
        let cx = context(Arc::clone(&cloud), Arc::new(plan), Target::DryRun);

        let run = node.run(&cx).await.expect("run");

        assert_eq!(run.outcome, TaskOutcome::Created);
        assert!(run.changes.contains(&String::from("Size: to-be-set(5)")));
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!(
            Target::from_str("cloudformation", true).expect("parse"),
            Target::CloudFormation
        );
        assert_eq!(Target::from_str("dry-run", true).expect("parse"), Target::DryRun);
        assert_eq!(Target::Terraform.artifact_format(), Some(ArtifactFormat::Terraform));
        assert!(Target::Live.artifact_format().is_none());
    }
}
