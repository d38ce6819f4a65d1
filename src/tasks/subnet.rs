//! Subnet of the cluster network.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::cloud::Filter;
use crate::config::SubnetConfig;
use crate::error::{Result, TaskError};
use crate::planner::Delta;
use crate::render::{
    CloudFormationRenderable, LiveChange, LiveRenderable, ResourceDeclaration, TerraformRenderable,
};
use crate::task::{Field, Lifecycle, TaskContext, TaskKey, TaskKind};

use super::{changed_attributes, cloudformation_tags, lookup, terraform_tags};

/// Immutable once created.
const IMMUTABLE: &[&str] = &["Vpc", "Cidr", "AvailabilityZone"];

/// A subnet inside the cluster VPC.
#[derive(Debug, Clone)]
pub struct Subnet {
    /// Task name.
    pub name: String,
    /// Server-side identifier.
    pub id: Option<String>,
    /// Owning network.
    pub vpc: TaskKey,
    /// Address block.
    pub cidr: Option<String>,
    /// Availability zone.
    pub zone: Option<String>,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
    /// Lifecycle policy.
    pub lifecycle: Lifecycle,
}

impl Subnet {
    /// Builds the task from its spec section.
    #[must_use]
    pub fn from_config(config: &SubnetConfig, vpc: TaskKey, tags: BTreeMap<String, String>) -> Self {
        Self {
            name: config.name.clone(),
            id: config.id.clone(),
            vpc,
            cidr: config.cidr.clone(),
            zone: config.zone.clone(),
            tags,
            lifecycle: config.lifecycle,
        }
    }
}

#[async_trait]
impl TaskKind for Subnet {
    const KIND: &'static str = "subnet";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        vec![self.vpc.clone()]
    }

    fn identity(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_identity(&mut self, id: String) {
        self.id = Some(id);
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::set("Vpc", self.vpc.clone()),
            Field::new("Cidr", self.cidr.clone()),
            Field::new("AvailabilityZone", self.zone.clone()),
            Field::set("Tags", self.tags.clone()).empty_equals_unset(),
        ]
    }

    async fn find(&self, cx: &TaskContext) -> Result<Option<Self>> {
        // Without a network id there is nothing to search in yet.
        let vpc_id = match (self.id.as_deref(), cx.identity_of(&self.vpc)) {
            (None, None) => return Ok(None),
            (_, vpc_id) => vpc_id,
        };

        let mut filter = Filter::new();
        filter.insert(String::from("name"), self.name.clone());
        if let Some(vpc_id) = vpc_id {
            filter.insert(String::from("vpc_id"), vpc_id);
        }
        let found = lookup(cx, &self.key(), self.id.as_deref(), &filter).await?;

        Ok(found.map(|object| Self {
            name: self.name.clone(),
            vpc: cx
                .observed_reference(&self.vpc, object.text("vpc_id").as_deref())
                .unwrap_or_else(|| self.vpc.clone()),
            cidr: object.text("cidr"),
            zone: object.text("availability_zone"),
            tags: object.text_map("tags").unwrap_or_default(),
            lifecycle: self.lifecycle,
            id: Some(object.id),
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, delta: &Delta) -> Result<()> {
        if actual.is_none() && self.cidr.is_none() {
            return Err(TaskError::required_field(&self.key(), "Cidr").into());
        }
        if actual.is_some()
            && let Some(field) = IMMUTABLE.iter().find(|f| delta.has_change(f))
        {
            return Err(TaskError::validation(&self.key(), format!("{field} cannot be changed")).into());
        }
        Ok(())
    }

    fn as_live(&self) -> Option<&dyn LiveRenderable<Self>> {
        Some(self)
    }

    fn as_terraform(&self) -> Option<&dyn TerraformRenderable<Self>> {
        Some(self)
    }

    fn as_cloudformation(&self) -> Option<&dyn CloudFormationRenderable<Self>> {
        Some(self)
    }
}

#[async_trait]
impl LiveRenderable<Self> for Subnet {
    async fn render_live(
        &self,
        cx: &TaskContext,
        actual: Option<&Self>,
        delta: &Delta,
    ) -> Result<LiveChange> {
        let cloud = cx.cloud();

        if let Some(id) = actual.and_then(|a| a.id.as_deref()) {
            let attributes = changed_attributes(delta, &[("Tags", "tags")]);
            cx.write("update subnet", || cloud.update(Self::KIND, id, &attributes))
                .await?;
            return Ok(LiveChange::Updated);
        }

        let mut attributes = changed_attributes(
            delta,
            &[("Cidr", "cidr"), ("AvailabilityZone", "availability_zone"), ("Tags", "tags")],
        );
        attributes.insert(String::from("name"), self.name.clone().into());
        attributes.insert(
            String::from("vpc_id"),
            cx.require_identity(&self.key(), &self.vpc)?.into(),
        );
        let created = cx.write("create subnet", || cloud.create(Self::KIND, &attributes)).await?;
        Ok(LiveChange::Created(created.id))
    }
}

#[async_trait]
impl TerraformRenderable<Self> for Subnet {
    async fn render_terraform(
        &self,
        cx: &TaskContext,
        _actual: Option<&Self>,
        _delta: &Delta,
    ) -> Result<()> {
        cx.declare(
            ResourceDeclaration::primary(self.key(), "aws_subnet", &self.name)
                .with("vpc_id", cx.reference(&self.vpc))
                .with_optional("cidr_block", self.cidr.clone())
                .with_optional("availability_zone", self.zone.clone())
                .with_optional("tags", terraform_tags(&self.tags)),
        )
        .await
    }
}

#[async_trait]
impl CloudFormationRenderable<Self> for Subnet {
    async fn render_cloudformation(
        &self,
        cx: &TaskContext,
        _actual: Option<&Self>,
        _delta: &Delta,
    ) -> Result<()> {
        cx.declare(
            ResourceDeclaration::primary(self.key(), "AWS::EC2::Subnet", &self.name)
                .with("VpcId", cx.reference(&self.vpc))
                .with_optional("CidrBlock", self.cidr.clone())
                .with_optional("AvailabilityZone", self.zone.clone())
                .with_optional("Tags", cloudformation_tags(&self.tags)),
        )
        .await
    }
}
