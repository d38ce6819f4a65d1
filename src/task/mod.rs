//! Task model.
//!
//! This module defines the typed task abstraction: identity keys, lifecycle
//! policies, comparable fields, the [`TaskKind`] trait and the plan nodes
//! that wrap tasks during a reconciliation pass.

mod context;
mod field;
mod key;
mod kind;
mod node;

pub use context::TaskContext;
pub use field::{ComparePolicy, Field, FieldValue};
pub use key::{Lifecycle, TaskKey};
pub use kind::TaskKind;
pub use node::{PlanNode, TaskNode};
