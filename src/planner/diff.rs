//! Diff engine for comparing expected vs actual task state.
//!
//! Reconciling a task runs four steps:
//!
//! 1. **Find**: the kind looks up the actual resource (`None` if absent)
//! 2. **Backfill**: a found identifier is copied into the expected task
//! 3. **Compare**: fields are compared one by one, honoring each field's
//!    comparison policy
//! 4. **Gate**: the task's lifecycle decides whether the delta may be applied

use std::fmt;
use tracing::{debug, warn};

use crate::error::{Result, TaskError};
use crate::task::{
    Field, FieldValue, Lifecycle, PlanNode, TaskContext, TaskKey, TaskKind, TaskNode,
};

/// Per-field change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    /// Field is unmanaged or already matches.
    Unchanged,
    /// Field must be set on a resource that does not exist yet.
    ToBeSet(FieldValue),
    /// Field differs on an existing resource.
    Changed {
        /// Actual value (`None` if unset).
        old: Option<FieldValue>,
        /// Expected value.
        new: FieldValue,
    },
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::ToBeSet(value) => write!(f, "to-be-set({value})"),
            Self::Changed { old: Some(old), new } => write!(f, "changed({old},{new})"),
            Self::Changed { old: None, new } => write!(f, "changed(<unset>,{new})"),
        }
    }
}

/// Change of a single named field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDelta {
    /// Field name.
    pub name: &'static str,
    /// Change.
    pub change: FieldChange,
}

impl fmt::Display for FieldDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.change)
    }
}

/// Field-by-field difference between an expected and an actual task.
///
/// Only meaningful together with the pair that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    fields: Vec<FieldDelta>,
    creation: bool,
}

impl Delta {
    /// Returns true if no field changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields
            .iter()
            .all(|f| matches!(f.change, FieldChange::Unchanged))
    }

    /// Returns true if the delta describes a resource that does not exist.
    #[must_use]
    pub const fn is_creation(&self) -> bool {
        self.creation
    }

    /// Returns the change of a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldChange> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.change)
    }

    /// Returns true if the named field changes.
    #[must_use]
    pub fn has_change(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|c| !matches!(c, FieldChange::Unchanged))
    }

    /// Returns the value to send for a field, if it changes.
    #[must_use]
    pub fn new_value(&self, name: &str) -> Option<&FieldValue> {
        match self.get(name)? {
            FieldChange::Unchanged => None,
            FieldChange::ToBeSet(value) | FieldChange::Changed { new: value, .. } => Some(value),
        }
    }

    /// Iterates over the changed fields.
    pub fn changes(&self) -> impl Iterator<Item = &FieldDelta> {
        self.fields
            .iter()
            .filter(|f| !matches!(f.change, FieldChange::Unchanged))
    }

    /// Iterates over every field, changed or not.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDelta> {
        self.fields.iter()
    }

    /// Returns one line per changed field.
    #[must_use]
    pub fn summary(&self) -> Vec<String> {
        self.changes().map(ToString::to_string).collect()
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.fields.iter().map(ToString::to_string).collect();
        write!(f, "{}", lines.join(", "))
    }
}

/// Decision of the lifecycle gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The delta may be rendered.
    Apply,
    /// The delta was logged and must not be rendered.
    Suppressed(Delta),
}

impl PolicyDecision {
    /// Returns true if the delta may be rendered.
    #[must_use]
    pub const fn applies(&self) -> bool {
        matches!(self, Self::Apply)
    }
}

/// Result of reconciling one task.
#[derive(Debug, Clone)]
pub struct Reconciled<T> {
    /// Expected state, after identity backfill.
    pub expected: T,
    /// Actual state, `None` if the resource does not exist.
    pub actual: Option<T>,
    /// Difference to apply; empty when suppressed.
    pub delta: Delta,
    /// Lifecycle gate decision.
    pub decision: PolicyDecision,
}

/// Engine computing deltas between expected and actual task state.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Runs find, backfill, compare and the lifecycle gate for one task.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails, or a validation error if the
    /// lifecycle forbids the observed state or the kind rejects the change.
    pub async fn reconcile<T: TaskKind>(
        node: &TaskNode<T>,
        cx: &TaskContext,
    ) -> Result<Reconciled<T>> {
        let key = node.key();
        let mut expected = node.snapshot();

        let actual = expected.find(cx).await?;

        if expected.identity().is_none()
            && let Some(id) = actual.as_ref().and_then(TaskKind::identity)
        {
            node.set_resolved_identity(id);
            expected = node.snapshot();
        }

        let delta = Self::compute_delta(
            &expected.fields(),
            actual.as_ref().map(TaskKind::fields).as_deref(),
        );
        debug!("{} delta: {}", key, delta);

        let decision = Self::gate(key, node.lifecycle(), actual.is_some(), delta.clone())?;

        let delta = match &decision {
            PolicyDecision::Apply => {
                expected.check_changes(actual.as_ref(), &delta)?;
                delta
            }
            PolicyDecision::Suppressed(_) => Delta::default(),
        };

        Ok(Reconciled {
            expected,
            actual,
            delta,
            decision,
        })
    }

    /// Compares expected fields against actual fields.
    ///
    /// - an unset (or ignored) expected field is unchanged
    /// - with no actual resource every set field is to-be-set
    /// - otherwise differing fields are changed
    #[must_use]
    pub fn compute_delta(expected: &[Field], actual: Option<&[Field]>) -> Delta {
        let fields = expected
            .iter()
            .map(|field| {
                let change = match (field.normalized(), actual) {
                    (None, _) => FieldChange::Unchanged,
                    (Some(new), None) => FieldChange::ToBeSet(new.clone()),
                    (Some(new), Some(actual)) => {
                        let old = actual
                            .iter()
                            .find(|a| a.name == field.name)
                            .and_then(|a| {
                                let observed = Field {
                                    policy: field.policy,
                                    ..a.clone()
                                };
                                observed.normalized().cloned()
                            });
                        if old.as_ref() == Some(new) {
                            FieldChange::Unchanged
                        } else {
                            FieldChange::Changed {
                                old,
                                new: new.clone(),
                            }
                        }
                    }
                };
                FieldDelta {
                    name: field.name,
                    change,
                }
            })
            .collect();

        Delta {
            fields,
            creation: actual.is_none(),
        }
    }

    /// Applies the lifecycle policy.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the policy forbids the observed state.
    pub fn gate(
        key: &TaskKey,
        lifecycle: Lifecycle,
        exists: bool,
        delta: Delta,
    ) -> Result<PolicyDecision> {
        match lifecycle {
            Lifecycle::Sync => Ok(PolicyDecision::Apply),
            Lifecycle::ExistsAndValidates | Lifecycle::ExistsAndWarnIfChanges if !exists => Err(
                TaskError::validation(key, format!("resource does not exist ({lifecycle})")).into(),
            ),
            Lifecycle::ExistsAndValidates if !delta.is_empty() => Err(TaskError::validation(
                key,
                format!("resource differs from expected state: {}", delta.summary().join(", ")),
            )
            .into()),
            Lifecycle::ExistsAndWarnIfChanges if !delta.is_empty() => {
                for change in delta.changes() {
                    warn!("{} differs from expected state, not applying: {}", key, change);
                }
                Ok(PolicyDecision::Suppressed(delta))
            }
            Lifecycle::ExistsAndValidates | Lifecycle::ExistsAndWarnIfChanges => {
                Ok(PolicyDecision::Apply)
            }
        }
    }
}
