//! Virtual network.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::config::VpcConfig;
use crate::error::{Result, TaskError};
use crate::planner::Delta;
use crate::render::{
    CloudFormationRenderable, LiveChange, LiveRenderable, ResourceDeclaration,
    TerraformRenderable,
};
use crate::task::{Field, Lifecycle, TaskContext, TaskKind};

use super::{changed_attributes, cloudformation_tags, lookup, name_filter, terraform_tags};

const ATTRIBUTES: &[(&str, &str)] = &[
    ("Cidr", "cidr"),
    ("EnableDnsHostnames", "enable_dns_hostnames"),
    ("EnableDnsSupport", "enable_dns_support"),
    ("Tags", "tags"),
];

/// A virtual network.
///
/// A shared VPC is owned by someone else: it is looked up by id and not
/// declared in artifacts (references to it render as its id). Differences on
/// a shared VPC are reported but never applied.
#[derive(Debug, Clone, Default)]
pub struct Vpc {
    /// Task name.
    pub name: String,
    /// Server-side identifier.
    pub id: Option<String>,
    /// Address block.
    pub cidr: Option<String>,
    /// Whether instances get public DNS hostnames.
    pub enable_dns_hostnames: Option<bool>,
    /// Whether the network resolves DNS.
    pub enable_dns_support: Option<bool>,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
    /// Whether the network is managed outside this cluster.
    pub shared: bool,
    /// Lifecycle policy.
    pub lifecycle: Lifecycle,
}

impl Vpc {
    /// Builds the task from its spec section.
    #[must_use]
    pub fn from_config(config: &VpcConfig, tags: BTreeMap<String, String>) -> Self {
        Self {
            name: config.name.clone(),
            id: config.id.clone(),
            cidr: config.cidr.clone(),
            enable_dns_hostnames: config.enable_dns_hostnames,
            enable_dns_support: config.enable_dns_support,
            tags,
            shared: config.shared,
            lifecycle: config.lifecycle,
        }
    }
}

#[async_trait]
impl TaskKind for Vpc {
    const KIND: &'static str = "vpc";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        match self.lifecycle {
            Lifecycle::Sync if self.shared => Lifecycle::ExistsAndWarnIfChanges,
            lifecycle => lifecycle,
        }
    }

    fn identity(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_identity(&mut self, id: String) {
        self.id = Some(id);
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("Cidr", self.cidr.clone()),
            Field::new("EnableDnsHostnames", self.enable_dns_hostnames),
            Field::new("EnableDnsSupport", self.enable_dns_support),
            Field::set("Tags", self.tags.clone()).empty_equals_unset(),
        ]
    }

    async fn find(&self, cx: &TaskContext) -> Result<Option<Self>> {
        let found = lookup(cx, &self.key(), self.id.as_deref(), &name_filter(&self.name)).await?;

        Ok(found.map(|object| Self {
            name: self.name.clone(),
            cidr: object.text("cidr"),
            enable_dns_hostnames: object.flag("enable_dns_hostnames"),
            enable_dns_support: object.flag("enable_dns_support"),
            tags: object.text_map("tags").unwrap_or_default(),
            shared: self.shared,
            lifecycle: self.lifecycle,
            id: Some(object.id),
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, delta: &Delta) -> Result<()> {
        match actual {
            None if self.shared => Err(TaskError::validation(
                &self.key(),
                "shared VPC does not exist; set its id to an existing network",
            )
            .into()),
            None if self.cidr.is_none() => Err(TaskError::required_field(&self.key(), "Cidr").into()),
            Some(_) if delta.has_change("Cidr") => {
                Err(TaskError::validation(&self.key(), "Cidr cannot be changed").into())
            }
            _ => Ok(()),
        }
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
impl LiveRenderable<Self> for Vpc {
    async fn render_live(
        &self,
        cx: &TaskContext,
        actual: Option<&Self>,
        delta: &Delta,
    ) -> Result<LiveChange> {
        let mut attributes = changed_attributes(delta, ATTRIBUTES);
        let cloud = cx.cloud();

        match actual.and_then(|a| a.id.as_deref()) {
            None => {
                attributes.insert(String::from("name"), self.name.clone().into());
                let created = cx.write("create vpc", || cloud.create(Self::KIND, &attributes)).await?;
                Ok(LiveChange::Created(created.id))
            }
            Some(_) if self.shared => Ok(LiveChange::Unapplied),
            Some(id) => {
                cx.write("update vpc", || cloud.update(Self::KIND, id, &attributes))
                    .await?;
                Ok(LiveChange::Updated)
            }
        }
    }
}

#[async_trait]
impl TerraformRenderable<Self> for Vpc {
    async fn render_terraform(
        &self,
        cx: &TaskContext,
        _actual: Option<&Self>,
        _delta: &Delta,
    ) -> Result<()> {
        if self.shared {
            return Ok(());
        }
        cx.declare(
            ResourceDeclaration::primary(self.key(), "aws_vpc", &self.name)
                .with_optional("cidr_block", self.cidr.clone())
                .with_optional("enable_dns_hostnames", self.enable_dns_hostnames)
                .with_optional("enable_dns_support", self.enable_dns_support)
                .with_optional("tags", terraform_tags(&self.tags)),
        )
        .await
    }
}

#[async_trait]
impl CloudFormationRenderable<Self> for Vpc {
    async fn render_cloudformation(
        &self,
        cx: &TaskContext,
        _actual: Option<&Self>,
        _delta: &Delta,
    ) -> Result<()> {
        if self.shared {
            return Ok(());
        }
        cx.declare(
            ResourceDeclaration::primary(self.key(), "AWS::EC2::VPC", &self.name)
                .with_optional("CidrBlock", self.cidr.clone())
                .with_optional("EnableDnsHostnames", self.enable_dns_hostnames)
                .with_optional("EnableDnsSupport", self.enable_dns_support)
                .with_optional("Tags", cloudformation_tags(&self.tags)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{MemoryCloud, Mutation};
    use crate::error::ConvergeError;
    use crate::planner::{Plan, TaskOutcome};
    use crate::render::Target;
    use crate::task::PlanNode;
    use crate::tasks::object;
    use crate::testing::context;
    use serde_json::json;
    use std::sync::Arc;

    fn vpc(cidr: &str) -> Vpc {
        Vpc {
            name: String::from("main"),
            cidr: Some(cidr.to_owned()),
            enable_dns_support: Some(true),
            ..Vpc::default()
        }
    }

    #[tokio::test]
    async fn test_update_sends_only_changed_flag() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert(
            "vpc",
            object(
                "vpc-1",
                json!({"name": "main", "cidr": "10.0.0.0/16", "enable_dns_support": false}),
            ),
        );
        let mut plan = Plan::new();
        let node = plan.add(vpc("10.0.0.0/16")).expect("add");
        let cx = context(Arc::clone(&cloud), Arc::new(plan), Target::Live);

        let run = node.run(&cx).await.expect("run");

        assert_eq!(run.outcome, TaskOutcome::Updated);
        assert_eq!(node.snapshot().id.as_deref(), Some("vpc-1"));
        match cloud.last_mutation() {
            Some(Mutation::Update { id, attributes, .. }) => {
                assert_eq!(id, "vpc-1");
                assert_eq!(attributes.len(), 1);
                assert_eq!(attributes["enable_dns_support"], true);
            }
            other => panic!("unexpected mutation: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cidr_change_is_rejected() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert("vpc", object("vpc-1", json!({"name": "main", "cidr": "10.1.0.0/16"})));
        let mut plan = Plan::new();
        let node = plan.add(vpc("10.0.0.0/16")).expect("add");
        let cx = context(Arc::clone(&cloud), Arc::new(plan), Target::Live);

        let err = node.run(&cx).await.expect_err("immutable cidr");

        assert!(matches!(err, ConvergeError::Task(TaskError::Validation { .. })));
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_shared_vpc_is_not_declared() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert("vpc", object("vpc-shared", json!({"name": "main", "cidr": "10.0.0.0/16"})));
        let mut plan = Plan::new();
        let node = plan
            .add(Vpc {
                id: Some(String::from("vpc-shared")),
                shared: true,
                ..vpc("10.0.0.0/16")
            })
            .expect("add");
        let cx = context(cloud, Arc::new(plan), Target::Terraform);

        node.run(&cx).await.expect("run");

        assert_eq!(cx.identity_of(&node.key()).as_deref(), Some("vpc-shared"));
    }
}
