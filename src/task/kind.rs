//! The `TaskKind` trait implemented by every resource kind.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::Result;
use crate::planner::Delta;
use crate::render::{CloudFormationRenderable, LiveRenderable, TerraformRenderable};

use super::{Field, Lifecycle, TaskContext, TaskKey};

/// A kind of infrastructure resource managed by the engine.
///
/// A new resource kind is added by implementing this trait; the engine never
/// needs to know about concrete kinds. Each kind declares:
///
/// - its identity (`KIND` + [`name`](Self::name)) and optional server-side id
/// - the tasks it references ([`dependencies`](Self::dependencies))
/// - its comparable state ([`fields`](Self::fields))
/// - how to look up its actual state ([`find`](Self::find))
/// - which targets it can render to (`as_*` capability accessors)
#[async_trait]
pub trait TaskKind: Clone + Debug + Send + Sync + 'static {
    /// Kind name used in task keys, e.g. `vpc`.
    const KIND: &'static str;

    /// Returns the task name, unique per kind within a plan.
    fn name(&self) -> &str;

    /// Returns the identity key of this task.
    fn key(&self) -> TaskKey {
        TaskKey::new(Self::KIND, self.name())
    }

    /// Returns the lifecycle policy of this task.
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Sync
    }

    /// Returns the keys of every task this task references.
    fn dependencies(&self) -> Vec<TaskKey> {
        Vec::new()
    }

    /// Returns the server-side identifier, if known.
    fn identity(&self) -> Option<&str>;

    /// Sets the server-side identifier.
    fn set_identity(&mut self, id: String);

    /// Returns the comparable fields of this task.
    ///
    /// The server-side identifier is not a field.
    fn fields(&self) -> Vec<Field>;

    /// Looks up the actual state of this task.
    ///
    /// Looks up by identity when known, otherwise by natural key. Returns
    /// `Ok(None)` when the resource does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails or is ambiguous.
    async fn find(&self, cx: &TaskContext) -> Result<Option<Self>>;

    /// Validates the change set before it is rendered.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the change cannot be applied.
    fn check_changes(&self, _actual: Option<&Self>, _delta: &Delta) -> Result<()> {
        Ok(())
    }

    /// Returns the live API renderer for this kind, if supported.
    fn as_live(&self) -> Option<&dyn LiveRenderable<Self>> {
        None
    }

    /// Returns the Terraform renderer for this kind, if supported.
    fn as_terraform(&self) -> Option<&dyn TerraformRenderable<Self>> {
        None
    }

    /// Returns the `CloudFormation` renderer for this kind, if supported.
    fn as_cloudformation(&self) -> Option<&dyn CloudFormationRenderable<Self>> {
        None
    }
}
