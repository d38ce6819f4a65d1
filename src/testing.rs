//! Test fixtures shared by unit tests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cloud::{Attributes, CloudObject, Filter, MemoryCloud};
use crate::error::{Result, TaskError};
use crate::planner::{Delta, Plan};
use crate::render::{
    Artifact, LiveChange, LiveRenderable, ResourceDeclaration, Target, TerraformRenderable,
};
use crate::retry::{RetryPolicies, RetryPolicy};
use crate::task::{Field, FieldValue, Lifecycle, TaskContext, TaskKey, TaskKind};

/// Minimal task kind backed by the `disk` collection of a cloud.
///
/// Supports the live and Terraform targets only.
#[derive(Debug, Clone, Default)]
pub struct Disk {
    pub name: String,
    pub id: Option<String>,
    pub size: Option<i64>,
    pub parent: Option<TaskKey>,
    pub peers: Vec<TaskKey>,
    pub lifecycle: Lifecycle,
}

impl Disk {
    pub fn new(name: &str, size: i64) -> Self {
        Self {
            name: name.to_owned(),
            size: Some(size),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, name: &str) -> Self {
        self.parent = Some(TaskKey::new(Self::KIND, name));
        self
    }

    pub fn with_peers(mut self, names: &[&str]) -> Self {
        self.peers = names.iter().map(|n| TaskKey::new(Self::KIND, *n)).collect();
        self
    }

    pub const fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Builds a pre-existing cloud object for this kind.
    pub fn remote(id: &str, name: &str, size: i64) -> CloudObject {
        let mut attributes = Attributes::new();
        attributes.insert(String::from("name"), name.into());
        attributes.insert(String::from("size"), size.into());
        CloudObject::new(id, attributes)
    }
}

#[async_trait]
impl TaskKind for Disk {
    const KIND: &'static str = "disk";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.parent.iter().chain(&self.peers).cloned().collect()
    }

    fn identity(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_identity(&mut self, id: String) {
        self.id = Some(id);
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("Size", self.size),
            Field::new("Parent", self.parent.clone()),
        ]
    }

    async fn find(&self, cx: &TaskContext) -> Result<Option<Self>> {
        let cloud = cx.cloud();
        let found = if let Some(id) = self.id.as_deref() {
            cx.read("get disk", || cloud.get(Self::KIND, id)).await?
        } else {
            let mut filter = Filter::new();
            filter.insert(String::from("name"), self.name.clone());
            let mut matches = cx.read("list disk", || cloud.list(Self::KIND, &filter)).await?;
            if matches.len() > 1 {
                return Err(TaskError::AmbiguousLookup {
                    task: self.key(),
                    matches: matches.len(),
                }
                .into());
            }
            matches.pop()
        };

        Ok(found.map(|object| Self {
            name: self.name.clone(),
            size: object.integer("size"),
            parent: self
                .parent
                .as_ref()
                .and_then(|p| cx.observed_reference(p, object.text("parent_id").as_deref())),
            peers: self.peers.clone(),
            lifecycle: self.lifecycle,
            id: Some(object.id),
        }))
    }

    fn check_changes(&self, _actual: Option<&Self>, _delta: &Delta) -> Result<()> {
        match self.size {
            None => Err(TaskError::required_field(&self.key(), "Size").into()),
            Some(size) if size < 0 => {
                Err(TaskError::validation(&self.key(), "size must not be negative").into())
            }
            Some(_) => Ok(()),
        }
    }

    fn as_live(&self) -> Option<&dyn LiveRenderable<Self>> {
        Some(self)
    }

    fn as_terraform(&self) -> Option<&dyn TerraformRenderable<Self>> {
        Some(self)
    }
}

#[async_trait]
impl LiveRenderable<Self> for Disk {
    async fn render_live(
        &self,
        cx: &TaskContext,
        actual: Option<&Self>,
        delta: &Delta,
    ) -> Result<LiveChange> {
        let mut attributes = Attributes::new();
        if let Some(FieldValue::Integer(size)) = delta.new_value("Size") {
            attributes.insert(String::from("size"), (*size).into());
        }
        if delta.has_change("Parent")
            && let Some(parent) = &self.parent
        {
            let parent_id = cx.require_identity(&self.key(), parent)?;
            attributes.insert(String::from("parent_id"), parent_id.into());
        }

        let cloud = cx.cloud();
        match actual.and_then(|a| a.id.as_deref()) {
            None => {
                attributes.insert(String::from("name"), self.name.clone().into());
                let created = cx.write("create disk", || cloud.create(Self::KIND, &attributes)).await?;
                Ok(LiveChange::Created(created.id))
            }
            Some(id) => {
                cx.write("update disk", || cloud.update(Self::KIND, id, &attributes))
                    .await?;
                Ok(LiveChange::Updated)
            }
        }
    }
}

#[async_trait]
impl TerraformRenderable<Self> for Disk {
    async fn render_terraform(
        &self,
        cx: &TaskContext,
        _actual: Option<&Self>,
        _delta: &Delta,
    ) -> Result<()> {
        cx.declare(
            ResourceDeclaration::primary(self.key(), "test_disk", &self.name)
                .with_optional("size", self.size)
                .with_optional("parent_id", self.parent.as_ref().map(|p| cx.reference(p))),
        )
        .await
    }
}

/// Builds a context over a memory cloud with immediate retries.
pub fn context(cloud: Arc<MemoryCloud>, plan: Arc<Plan>, target: Target) -> TaskContext {
    let retry = RetryPolicies {
        read: RetryPolicy::immediate(3),
        write: RetryPolicy::immediate(3),
    };
    let cx = TaskContext::new(cloud, plan, target, retry, CancellationToken::new());
    match target.artifact_format() {
        Some(format) => cx.with_artifact(Arc::new(Mutex::new(Artifact::new(format, "us-east-1")))),
        None => cx,
    }
}
