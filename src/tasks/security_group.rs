//! Security group with ingress rules.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;

use crate::cloud::Filter;
use crate::config::{IngressRule, SecurityGroupConfig};
use crate::error::{Result, TaskError};
use crate::planner::Delta;
use crate::render::{
    CloudFormationRenderable, Literal, LiveChange, LiveRenderable, ResourceDeclaration,
    TerraformRenderable,
};
use crate::task::{Field, Lifecycle, TaskContext, TaskKey, TaskKind};

use super::{changed_attributes, cloudformation_tags, lookup, terraform_tags};

/// A security group inside the cluster VPC.
///
/// Ingress rules are compared as a sorted list of `protocol:from-to:cidr`
/// strings, so rule order in the spec does not matter.
#[derive(Debug, Clone)]
pub struct SecurityGroup {
    /// Task name.
    pub name: String,
    /// Server-side identifier.
    pub id: Option<String>,
    /// Owning network.
    pub vpc: TaskKey,
    /// Group description, immutable once created.
    pub description: Option<String>,
    /// Ingress rules, sorted.
    pub ingress: Vec<IngressRule>,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
    /// Lifecycle policy.
    pub lifecycle: Lifecycle,
}

impl SecurityGroup {
    /// Builds the task from its spec section.
    #[must_use]
    pub fn from_config(
        config: &SecurityGroupConfig,
        vpc: TaskKey,
        tags: BTreeMap<String, String>,
    ) -> Self {
        let mut ingress = config.ingress.clone();
        ingress.sort();
        ingress.dedup();
        Self {
            name: config.name.clone(),
            id: config.id.clone(),
            vpc,
            description: config.description.clone(),
            ingress,
            tags,
            lifecycle: config.lifecycle,
        }
    }

    fn rules(&self) -> Vec<String> {
        self.ingress.iter().map(ToString::to_string).collect()
    }
}

#[async_trait]
impl TaskKind for SecurityGroup {
    const KIND: &'static str = "security_group";

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
            Field::new("Description", self.description.clone()),
            Field::set("Ingress", self.rules()).empty_equals_unset(),
            Field::set("Tags", self.tags.clone()).empty_equals_unset(),
        ]
    }

    async fn find(&self, cx: &TaskContext) -> Result<Option<Self>> {
        let vpc_id = cx.identity_of(&self.vpc);
        if self.id.is_none() && vpc_id.is_none() {
            return Ok(None);
        }

        let mut filter = Filter::new();
        filter.insert(String::from("name"), self.name.clone());
        if let Some(vpc_id) = vpc_id {
            filter.insert(String::from("vpc_id"), vpc_id);
        }
        let Some(object) = lookup(cx, &self.key(), self.id.as_deref(), &filter).await? else {
            return Ok(None);
        };

        let mut ingress = Vec::new();
        for rule in object.text_list("ingress").unwrap_or_default() {
            let parsed: IngressRule = rule.parse().map_err(|message: String| {
                TaskError::validation(&self.key(), format!("unreadable ingress rule: {message}"))
            })?;
            ingress.push(parsed);
        }
        ingress.sort();

        Ok(Some(Self {
            name: self.name.clone(),
            vpc: cx
                .observed_reference(&self.vpc, object.text("vpc_id").as_deref())
                .unwrap_or_else(|| self.vpc.clone()),
            description: object.text("description"),
            ingress,
            tags: object.text_map("tags").unwrap_or_default(),
            lifecycle: self.lifecycle,
            id: Some(object.id),
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, delta: &Delta) -> Result<()> {
        if actual.is_some() && (delta.has_change("Description") || delta.has_change("Vpc")) {
            return Err(TaskError::validation(
                &self.key(),
                "security group description and network cannot be changed",
            )
            .into());
        }
        if let Some(rule) = self.ingress.iter().find(|r| r.from_port > r.to_port) {
            return Err(TaskError::validation(&self.key(), format!("invalid port range in {rule}")).into());
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
impl LiveRenderable<Self> for SecurityGroup {
    async fn render_live(
        &self,
        cx: &TaskContext,
        actual: Option<&Self>,
        delta: &Delta,
    ) -> Result<LiveChange> {
        let cloud = cx.cloud();
        let mut attributes = changed_attributes(delta, &[("Ingress", "ingress"), ("Tags", "tags")]);

        if let Some(id) = actual.and_then(|a| a.id.as_deref()) {
            cx.write("update security group", || cloud.update(Self::KIND, id, &attributes))
                .await?;
            return Ok(LiveChange::Updated);
        }

        attributes.insert(String::from("name"), self.name.clone().into());
        attributes.insert(
            String::from("vpc_id"),
            cx.require_identity(&self.key(), &self.vpc)?.into(),
        );
        if let Some(description) = &self.description {
            attributes.insert(String::from("description"), description.clone().into());
        }
        let created = cx
            .write("create security group", || cloud.create(Self::KIND, &attributes))
            .await?;
        Ok(LiveChange::Created(created.id))
    }
}

#[async_trait]
impl TerraformRenderable<Self> for SecurityGroup {
    async fn render_terraform(
        &self,
        cx: &TaskContext,
        _actual: Option<&Self>,
        _delta: &Delta,
    ) -> Result<()> {
        let ingress: Vec<Literal> = self
            .ingress
            .iter()
            .map(|rule| {
                Literal::Value(json!({
                    "protocol": rule.protocol,
                    "from_port": rule.from_port,
                    "to_port": rule.to_port,
                    "cidr_blocks": [rule.cidr],
                }))
            })
            .collect();

        cx.declare(
            ResourceDeclaration::primary(self.key(), "aws_security_group", &self.name)
                .with("name", self.name.as_str())
                .with("vpc_id", cx.reference(&self.vpc))
                .with_optional("description", self.description.clone())
                .with("ingress", ingress)
                .with_optional("tags", terraform_tags(&self.tags)),
        )
        .await
    }
}

#[async_trait]
impl CloudFormationRenderable<Self> for SecurityGroup {
    async fn render_cloudformation(
        &self,
        cx: &TaskContext,
        _actual: Option<&Self>,
        _delta: &Delta,
    ) -> Result<()> {
        let ingress: Vec<Literal> = self
            .ingress
            .iter()
            .map(|rule| {
                Literal::Value(json!({
                    "IpProtocol": rule.protocol,
                    "FromPort": rule.from_port,
                    "ToPort": rule.to_port,
                    "CidrIp": rule.cidr,
                }))
            })
            .collect();

        cx.declare(
            ResourceDeclaration::primary(self.key(), "AWS::EC2::SecurityGroup", &self.name)
                .with("GroupName", self.name.as_str())
                .with(
                    "GroupDescription",
                    self.description.clone().unwrap_or_else(|| self.name.clone()),
                )
                .with("VpcId", cx.reference(&self.vpc))
                .with("SecurityGroupIngress", ingress)
                .with_optional("Tags", cloudformation_tags(&self.tags)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{MemoryCloud, Mutation};
    use crate::planner::{Plan, TaskOutcome};
    use crate::render::Target;
    use crate::task::PlanNode;
    use crate::tasks::{object, Vpc};
    use crate::testing::context;
    use std::sync::Arc;

    fn rule(port: u16) -> IngressRule {
        IngressRule {
            protocol: String::from("tcp"),
            from_port: port,
            to_port: port,
            cidr: String::from("0.0.0.0/0"),
        }
    }

    fn group(ingress: Vec<IngressRule>) -> SecurityGroup {
        SecurityGroup {
            name: String::from("web"),
            id: None,
            vpc: TaskKey::new(Vpc::KIND, "main"),
            description: Some(String::from("web tier")),
            ingress,
            tags: BTreeMap::new(),
            lifecycle: Lifecycle::Sync,
        }
    }

    fn plan_with(group: SecurityGroup) -> (Plan, Arc<crate::task::TaskNode<SecurityGroup>>) {
        let mut plan = Plan::new();
        let vpc = plan
            .add(Vpc {
                name: String::from("main"),
                id: Some(String::from("vpc-1")),
                ..Vpc::default()
            })
            .expect("add vpc");
        assert_eq!(vpc.key(), &group.vpc);
        let node = plan.add(group).expect("add group");
        (plan, node)
    }

    #[tokio::test]
    async fn test_rule_order_does_not_matter() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert(
            "security_group",
            object(
                "sg-1",
                json!({
                    "name": "web",
                    "vpc_id": "vpc-1",
                    "description": "web tier",
                    "ingress": ["tcp:443-443:0.0.0.0/0", "tcp:22-22:0.0.0.0/0"],
                }),
            ),
        );
        let mut ingress = vec![rule(22), rule(443)];
        ingress.sort();
        let (plan, node) = plan_with(group(ingress));
        let cx = context(Arc::clone(&cloud), Arc::new(plan), Target::Live);

        let run = node.run(&cx).await.expect("run");

        assert_eq!(run.outcome, TaskOutcome::NoChange);
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_added_rule_updates_ingress_only() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert(
            "security_group",
            object(
                "sg-1",
                json!({
                    "name": "web",
                    "vpc_id": "vpc-1",
                    "description": "web tier",
                    "ingress": ["tcp:443-443:0.0.0.0/0"],
                }),
            ),
        );
        let mut ingress = vec![rule(443), rule(80)];
        ingress.sort();
        let (plan, node) = plan_with(group(ingress));
        let cx = context(Arc::clone(&cloud), Arc::new(plan), Target::Live);

        let run = node.run(&cx).await.expect("run");

        assert_eq!(run.outcome, TaskOutcome::Updated);
        match cloud.last_mutation() {
            Some(Mutation::Update { attributes, .. }) => {
                assert_eq!(attributes.len(), 1);
                assert_eq!(
                    attributes["ingress"],
                    json!(["tcp:80-80:0.0.0.0/0", "tcp:443-443:0.0.0.0/0"])
                );
            }
            other => panic!("unexpected mutation: {other:?}"),
        }
    }
}
