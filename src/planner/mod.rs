//! Planning module for reconciliation passes.
//!
//! This module orders the tasks of a plan, compares expected against actual
//! state, and executes the plan on a bounded worker pool.

mod diff;
mod executor;
mod plan;
mod report;
mod resolver;

pub use diff::{Delta, DiffEngine, FieldChange, FieldDelta, PolicyDecision, Reconciled};
pub use executor::{PlanExecutor, DEFAULT_PARALLELISM};
pub use plan::Plan;
pub use report::{
    ExecutionReport, FailureReason, RenderedArtifact, ReportEntry, TaskOutcome, TaskRun,
};
pub use resolver::{order, DependencyGraph};
