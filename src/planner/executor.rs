//! Plan executor.
//!
//! Runs the tasks of a plan on a bounded worker pool while respecting the
//! dependency order: a task starts only after every dependency succeeded,
//! unrelated tasks run concurrently, and ready tasks are launched in key
//! order. A failed task blocks all of its transitive dependents; unrelated
//! branches continue. Nothing is rolled back.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cloud::CloudApi;
use crate::error::{ConvergeError, Result};
use crate::render::{Artifact, Target};
use crate::retry::RetryPolicies;
use crate::task::{TaskContext, TaskKey};

use super::report::{FailureReason, RenderedArtifact, ReportEntry, TaskOutcome, TaskRun};
use super::{DependencyGraph, ExecutionReport, Plan};

/// Default number of tasks running at the same time.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Executor for plans.
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    /// Cloud API used by every task.
    cloud: Arc<dyn CloudApi>,
    /// Active target.
    target: Target,
    /// Maximum number of concurrently running tasks.
    parallelism: usize,
    /// Retry policies for reads and writes.
    retry: RetryPolicies,
    /// Overall deadline.
    timeout: Option<Duration>,
    /// Hash of the spec the plan was built from.
    spec_hash: Option<String>,
}

type Finished = (TaskKey, Result<TaskRun>, Duration);

impl PlanExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(cloud: Arc<dyn CloudApi>, target: Target) -> Self {
        Self {
            cloud,
            target,
            parallelism: DEFAULT_PARALLELISM,
            retry: RetryPolicies::default(),
            timeout: None,
            spec_hash: None,
        }
    }

    /// Sets the maximum number of concurrently running tasks.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Sets the retry policies.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicies) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the overall deadline after which the run is cancelled.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Records the spec hash in the report.
    #[must_use]
    pub fn with_spec_hash(mut self, spec_hash: impl Into<String>) -> Self {
        self.spec_hash = Some(spec_hash.into());
        self
    }

    /// Executes a plan.
    ///
    /// Task failures are recorded in the report; the returned error is
    /// reserved for failures of the plan as a whole.
    ///
    /// # Errors
    ///
    /// Returns a plan error (cycle, missing dependency) before any task runs,
    /// or an artifact error if the rendered artifact cannot be serialized.
    pub async fn execute(
        &self,
        plan: Arc<Plan>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        let started_at = Utc::now();
        let graph = DependencyGraph::build(&plan)?;
        let order = graph.topological_order()?;

        info!(
            "Executing {} tasks against the {} target",
            order.len(),
            self.target
        );

        let cancel = cancel.child_token();
        let deadline = self.timeout.map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Execution deadline of {:?} reached, cancelling", timeout);
                cancel.cancel();
            })
        });

        let artifact = self
            .target
            .artifact_format()
            .map(|format| Arc::new(Mutex::new(Artifact::new(format, self.cloud.region()))));

        let mut cx = TaskContext::new(
            Arc::clone(&self.cloud),
            Arc::clone(&plan),
            self.target,
            self.retry.clone(),
            cancel.clone(),
        );
        if let Some(artifact) = &artifact {
            cx = cx.with_artifact(Arc::clone(artifact));
        }
        let cx = Arc::new(cx);

        let mut pending: BTreeMap<TaskKey, usize> = order
            .iter()
            .map(|key| (key.clone(), graph.dependencies_of(key).map_or(0, BTreeSet::len)))
            .collect();
        let mut ready: BTreeSet<TaskKey> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| key.clone())
            .collect();
        pending.retain(|_, count| *count > 0);

        let mut entries: BTreeMap<TaskKey, ReportEntry> = BTreeMap::new();
        let mut running: JoinSet<Finished> = JoinSet::new();

        loop {
            while running.len() < self.parallelism && !cancel.is_cancelled() {
                let Some(key) = ready.pop_first() else {
                    break;
                };
                let Some(node) = plan.get(&key).cloned() else {
                    continue;
                };
                let cx = Arc::clone(&cx);
                debug!("Starting {}", key);
                running.spawn(async move {
                    let started = Instant::now();
                    let result = match tokio::spawn(async move { node.run(&cx).await }).await {
                        Ok(result) => result,
                        Err(e) => Err(ConvergeError::internal(format!("task aborted: {e}"))),
                    };
                    (key, result, started.elapsed())
                });
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (key, result, elapsed) = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    error!("Worker failed: {e}");
                    continue;
                }
            };
            let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(run) => {
                    info!("{} {}", key, run.outcome);
                    for dependent in graph.dependents_of(&key).into_iter().flatten() {
                        if let Some(count) = pending.get_mut(dependent) {
                            *count -= 1;
                            if *count == 0 {
                                pending.remove(dependent);
                                ready.insert(dependent.clone());
                            }
                        }
                    }
                    entries.insert(
                        key.clone(),
                        ReportEntry {
                            key,
                            outcome: run.outcome,
                            changes: run.changes,
                            duration_ms,
                        },
                    );
                }
                Err(e) => {
                    let reason = if e.is_cancelled() {
                        FailureReason::Cancelled
                    } else {
                        FailureReason::Error(e.to_string())
                    };
                    error!("{} failed: {}", key, e);

                    for dependent in graph.transitive_dependents(&key) {
                        pending.remove(&dependent);
                        ready.remove(&dependent);
                        if !entries.contains_key(&dependent) {
                            warn!("Skipping {} due to failed dependency {}", dependent, key);
                            entries.insert(
                                dependent.clone(),
                                ReportEntry {
                                    key: dependent,
                                    outcome: TaskOutcome::Failed(FailureReason::DependencyFailed(
                                        key.clone(),
                                    )),
                                    changes: Vec::new(),
                                    duration_ms: 0,
                                },
                            );
                        }
                    }

                    entries.insert(
                        key.clone(),
                        ReportEntry {
                            key,
                            outcome: TaskOutcome::Failed(reason),
                            changes: Vec::new(),
                            duration_ms,
                        },
                    );
                }
            }
        }

        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let cancelled = cancel.is_cancelled();
        let entries: Vec<ReportEntry> = order
            .into_iter()
            .map(|key| {
                entries.remove(&key).unwrap_or_else(|| ReportEntry {
                    outcome: TaskOutcome::Failed(if cancelled {
                        FailureReason::Cancelled
                    } else {
                        FailureReason::Error(String::from("task was not started"))
                    }),
                    key,
                    changes: Vec::new(),
                    duration_ms: 0,
                })
            })
            .collect();

        let mut report = ExecutionReport {
            target: self.target,
            spec_hash: self.spec_hash.clone(),
            started_at,
            finished_at: Utc::now(),
            entries,
            artifact: None,
        };

        if let Some(artifact) = artifact
            && report.success()
        {
            let artifact = artifact.lock().await;
            report.artifact = Some(RenderedArtifact {
                file_name: artifact.format().file_name().to_owned(),
                contents: artifact.render()?,
            });
        }

        if report.success() {
            info!("Execution finished: {}", summary(&report));
        } else {
            warn!("Execution finished with failures: {}", summary(&report));
        }

        Ok(report)
    }
}

fn summary(report: &ExecutionReport) -> String {
    format!(
        "{} created, {} updated, {} unchanged, {} skipped, {} failed",
        report.created(),
        report.updated(),
        report.unchanged(),
        report.skipped(),
        report.failed()
    )
}
