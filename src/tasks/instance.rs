//! Compute instance.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::InstanceConfig;
use crate::error::{Result, TaskError};
use crate::planner::Delta;
use crate::render::{Literal, LiveChange, LiveRenderable, ResourceDeclaration, TerraformRenderable};
use crate::task::{Field, Lifecycle, TaskContext, TaskKey, TaskKind};

use super::{changed_attributes, lookup, name_filter, terraform_tags, SecurityGroup, Subnet};

/// A compute instance in one subnet.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Task name.
    pub name: String,
    /// Server-side identifier.
    pub id: Option<String>,
    /// Subnet the instance is launched in.
    pub subnet: TaskKey,
    /// Attached security groups, sorted.
    pub security_groups: Vec<TaskKey>,
    /// Machine image, immutable once launched.
    pub image: Option<String>,
    /// Instance size.
    pub instance_type: Option<String>,
    /// Informational note. Drift is reported but never acted on.
    pub description: Option<String>,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
    /// Lifecycle policy.
    pub lifecycle: Lifecycle,
}

impl Instance {
    /// Builds the task from its spec section.
    #[must_use]
    pub fn from_config(config: &InstanceConfig, tags: BTreeMap<String, String>) -> Self {
        let mut security_groups: Vec<TaskKey> = config
            .security_groups
            .iter()
            .map(|name| TaskKey::new(SecurityGroup::KIND, name.as_str()))
            .collect();
        security_groups.sort();
        security_groups.dedup();
        Self {
            name: config.name.clone(),
            id: config.id.clone(),
            subnet: TaskKey::new(Subnet::KIND, config.subnet.as_str()),
            security_groups,
            image: config.image.clone(),
            instance_type: config.instance_type.clone(),
            description: config.description.clone(),
            tags,
            lifecycle: config.lifecycle,
        }
    }

    fn group_ids(&self, cx: &TaskContext) -> Result<Vec<Value>> {
        self.security_groups
            .iter()
            .map(|group| cx.require_identity(&self.key(), group).map(Value::String))
            .collect()
    }
}

#[async_trait]
impl TaskKind for Instance {
    const KIND: &'static str = "instance";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        std::iter::once(&self.subnet)
            .chain(&self.security_groups)
            .cloned()
            .collect()
    }

    fn identity(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_identity(&mut self, id: String) {
        self.id = Some(id);
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::set("Subnet", self.subnet.clone()),
            Field::set("SecurityGroups", self.security_groups.clone()).empty_equals_unset(),
            Field::new("Image", self.image.clone()),
            Field::new("InstanceType", self.instance_type.clone()),
            Field::new("Description", self.description.clone()).ignored(),
            Field::set("Tags", self.tags.clone()).empty_equals_unset(),
        ]
    }

    async fn find(&self, cx: &TaskContext) -> Result<Option<Self>> {
        let Some(object) = lookup(cx, &self.key(), self.id.as_deref(), &name_filter(&self.name)).await?
        else {
            return Ok(None);
        };

        let mut security_groups: Vec<TaskKey> = object
            .text_list("security_group_ids")
            .unwrap_or_default()
            .iter()
            .map(|id| {
                self.security_groups
                    .iter()
                    .find(|group| cx.identity_of(group).as_deref() == Some(id.as_str()))
                    .cloned()
                    .unwrap_or_else(|| TaskKey::new(SecurityGroup::KIND, format!("id:{id}")))
            })
            .collect();
        security_groups.sort();

        Ok(Some(Self {
            name: self.name.clone(),
            subnet: cx
                .observed_reference(&self.subnet, object.text("subnet_id").as_deref())
                .unwrap_or_else(|| self.subnet.clone()),
            security_groups,
            image: object.text("image"),
            instance_type: object.text("instance_type"),
            description: object.text("description"),
            tags: object.text_map("tags").unwrap_or_default(),
            lifecycle: self.lifecycle,
            id: Some(object.id),
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, delta: &Delta) -> Result<()> {
        match actual {
            None if self.image.is_none() => Err(TaskError::required_field(&self.key(), "Image").into()),
            Some(_) if delta.has_change("Image") || delta.has_change("Subnet") => Err(
                TaskError::validation(&self.key(), "image and subnet require a new instance").into(),
            ),
            _ => Ok(()),
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
impl LiveRenderable<Self> for Instance {
    async fn render_live(
        &self,
        cx: &TaskContext,
        actual: Option<&Self>,
        delta: &Delta,
    ) -> Result<LiveChange> {
        let cloud = cx.cloud();
        let mut attributes =
            changed_attributes(delta, &[("InstanceType", "instance_type"), ("Tags", "tags")]);
        if delta.has_change("SecurityGroups") {
            attributes.insert(
                String::from("security_group_ids"),
                Value::Array(self.group_ids(cx)?),
            );
        }

        if let Some(id) = actual.and_then(|a| a.id.as_deref()) {
            cx.write("update instance", || cloud.update(Self::KIND, id, &attributes))
                .await?;
            return Ok(LiveChange::Updated);
        }

        attributes.insert(String::from("name"), self.name.clone().into());
        attributes.insert(
            String::from("subnet_id"),
            cx.require_identity(&self.key(), &self.subnet)?.into(),
        );
        if let Some(image) = &self.image {
            attributes.insert(String::from("image"), image.clone().into());
        }
        if let Some(description) = &self.description {
            attributes.insert(String::from("description"), description.clone().into());
        }
        let created = cx.write("launch instance", || cloud.create(Self::KIND, &attributes)).await?;
        Ok(LiveChange::Created(created.id))
    }
}

#[async_trait]
impl TerraformRenderable<Self> for Instance {
    async fn render_terraform(
        &self,
        cx: &TaskContext,
        _actual: Option<&Self>,
        _delta: &Delta,
    ) -> Result<()> {
        let groups: Vec<Literal> = self
            .security_groups
            .iter()
            .map(|group| cx.reference(group))
            .collect();

        cx.declare(
            ResourceDeclaration::primary(self.key(), "aws_instance", &self.name)
                .with_optional("ami", self.image.clone())
                .with_optional("instance_type", self.instance_type.clone())
                .with("subnet_id", cx.reference(&self.subnet))
                .with("vpc_security_group_ids", groups)
                .with_optional("tags", terraform_tags(&self.tags)),
        )
        .await
    }
}
