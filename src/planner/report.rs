//! Execution reports.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::render::Target;
use crate::task::TaskKey;

/// Why a task failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The task itself failed.
    Error(String),
    /// The task was not attempted because a dependency failed.
    DependencyFailed(TaskKey),
    /// The task was not attempted, or aborted, because the run was cancelled.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(message) => write!(f, "{message}"),
            Self::DependencyFailed(key) => write!(f, "blocked by failed dependency {key}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The resource already matched.
    NoChange,
    /// The resource was created (or declared for creation).
    Created,
    /// The resource was updated (or declared with changes).
    Updated,
    /// A difference was found but the lifecycle policy suppressed it.
    SkippedPolicy,
    /// The task failed.
    Failed(FailureReason),
}

impl TaskOutcome {
    /// Returns true unless the task failed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// Returns true if the task created or updated something.
    #[must_use]
    pub const fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoChange => write!(f, "no-change"),
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::SkippedPolicy => write!(f, "skipped-policy"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Result of running one task, before timing is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRun {
    /// Outcome.
    pub outcome: TaskOutcome,
    /// Human-readable field changes.
    pub changes: Vec<String>,
}

impl TaskRun {
    /// Creates a run result.
    #[must_use]
    pub const fn new(outcome: TaskOutcome, changes: Vec<String>) -> Self {
        Self { outcome, changes }
    }
}

/// Report line for one task.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    /// Task key.
    pub key: TaskKey,
    /// Outcome.
    pub outcome: TaskOutcome,
    /// Human-readable field changes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
    /// Time spent on the task.
    pub duration_ms: u64,
}

/// Artifact produced by an artifact target.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedArtifact {
    /// Conventional file name (`main.tf.json`, `template.json`).
    pub file_name: String,
    /// Serialized artifact.
    pub contents: String,
}

/// Report of a whole plan execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// Target the plan was executed against.
    pub target: Target,
    /// Hash of the cluster spec the plan was built from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,
    /// Start of the execution.
    pub started_at: DateTime<Utc>,
    /// End of the execution.
    pub finished_at: DateTime<Utc>,
    /// One entry per task, in execution order.
    pub entries: Vec<ReportEntry>,
    /// Rendered artifact, for artifact targets that completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<RenderedArtifact>,
}

impl ExecutionReport {
    /// Returns true if no task failed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.entries.iter().all(|e| e.outcome.is_success())
    }

    /// Returns true if any task created or updated something.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.outcome.is_change())
    }

    /// Returns the entry of a task.
    #[must_use]
    pub fn entry(&self, key: &TaskKey) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| &e.key == key)
    }

    /// Returns the outcome of a task.
    #[must_use]
    pub fn outcome(&self, key: &TaskKey) -> Option<&TaskOutcome> {
        self.entry(key).map(|e| &e.outcome)
    }

    fn count(&self, predicate: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| predicate(&e.outcome)).count()
    }

    /// Number of created tasks.
    #[must_use]
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Created))
    }

    /// Number of updated tasks.
    #[must_use]
    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Updated))
    }

    /// Number of unchanged tasks.
    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::NoChange))
    }

    /// Number of tasks skipped by policy.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::SkippedPolicy))
    }

    /// Number of failed tasks.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| !o.is_success())
    }

    /// Wall-clock duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Execution against the {} target:", self.target)?;
        for entry in &self.entries {
            writeln!(f, "  {} {}", entry.key, entry.outcome)?;
            for change in &entry.changes {
                writeln!(f, "      {change}")?;
            }
        }
        write!(
            f,
            "{} created, {} updated, {} unchanged, {} skipped, {} failed",
            self.created(),
            self.updated(),
            self.unchanged(),
            self.skipped(),
            self.failed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, outcome: TaskOutcome) -> ReportEntry {
        ReportEntry {
            key: TaskKey::new("vpc", name),
            outcome,
            changes: Vec::new(),
            duration_ms: 1,
        }
    }

    fn report(entries: Vec<ReportEntry>) -> ExecutionReport {
        let now = Utc::now();
        ExecutionReport {
            target: Target::Live,
            spec_hash: None,
            started_at: now,
            finished_at: now,
            entries,
            artifact: None,
        }
    }

    #[test]
    fn test_counts_and_success() {
        let report = report(vec![
            entry("a", TaskOutcome::Created),
            entry("b", TaskOutcome::NoChange),
            entry("c", TaskOutcome::SkippedPolicy),
        ]);
        assert!(report.success());
        assert!(report.has_changes());
        assert_eq!(report.created(), 1);
        assert_eq!(report.unchanged(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 0);
    }

    #[test]
    fn test_failure_makes_report_fail() {
        let report = report(vec![
            entry("a", TaskOutcome::Failed(FailureReason::Error(String::from("boom")))),
            entry(
                "b",
                TaskOutcome::Failed(FailureReason::DependencyFailed(TaskKey::new("vpc", "a"))),
            ),
        ]);
        assert!(!report.success());
        assert_eq!(report.failed(), 2);
        assert_eq!(
            report.outcome(&TaskKey::new("vpc", "b")).map(ToString::to_string),
            Some(String::from("failed: blocked by failed dependency vpc/a"))
        );
    }

    #[test]
    fn test_json_shape() {
        let report = report(vec![entry("a", TaskOutcome::Failed(FailureReason::Cancelled))]);
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["target"], "live");
        assert_eq!(json["entries"][0]["key"]["kind"], "vpc");
        assert_eq!(json["entries"][0]["outcome"]["status"], "failed");
        assert_eq!(json["entries"][0]["outcome"]["reason"]["kind"], "cancelled");
    }
}
