//! Hosted DNS zone.
//!
//! Zones are usually created out of band and adopted by name. The live target
//! can create a zone; the Terraform target only associates an existing zone
//! with the cluster network and refuses to create one.

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cloud::{CloudObject, Filter};
use crate::config::DnsConfig;
use crate::error::{Result, TaskError};
use crate::planner::Delta;
use crate::render::{LiveChange, LiveRenderable, ResourceDeclaration, Target, TerraformRenderable};
use crate::task::{Field, Lifecycle, TaskContext, TaskKey, TaskKind};

const ZONE_ID_PREFIX: &str = "/hostedzone/";

/// A hosted DNS zone, optionally private to the cluster VPC.
#[derive(Debug, Clone)]
pub struct DnsZone {
    /// Task name.
    pub name: String,
    /// Fully-qualified domain, without the trailing dot.
    pub dns_name: Option<String>,
    /// Zone identifier, without the `/hostedzone/` prefix.
    pub zone_id: Option<String>,
    /// Whether the zone is private.
    pub private: Option<bool>,
    /// Network the private zone is attached to.
    pub private_vpc: Option<TaskKey>,
    /// Lifecycle policy.
    pub lifecycle: Lifecycle,
}

impl DnsZone {
    /// Builds the task from its spec section.
    ///
    /// A private zone is attached to `vpc`. The domain defaults to the task
    /// name, except for a zone adopted by id, whose domain is left unmanaged.
    #[must_use]
    pub fn from_config(config: &DnsConfig, vpc: TaskKey) -> Self {
        let dns_name = match (&config.dns_name, &config.zone_id) {
            (Some(dns_name), _) => Some(dns_name.clone()),
            (None, None) => Some(config.name.clone()),
            (None, Some(_)) => None,
        };
        Self {
            name: config.name.clone(),
            dns_name,
            zone_id: config.zone_id.as_deref().map(trim_zone_id),
            private: Some(config.private),
            private_vpc: config.private.then_some(vpc),
            lifecycle: config.lifecycle,
        }
    }

    fn is_private(&self) -> bool {
        self.private.unwrap_or(false)
    }

    async fn find_existing(&self, cx: &TaskContext) -> Result<Option<CloudObject>> {
        let cloud = cx.cloud();
        if let Some(id) = self.zone_id.as_deref() {
            return cx.read("get dns zone", || cloud.get(Self::KIND, id)).await;
        }

        let Some(dns_name) = self.dns_name.as_deref().filter(|n| !n.is_empty()) else {
            return Ok(None);
        };
        let mut filter = Filter::new();
        filter.insert(String::from("name"), fully_qualified(dns_name));

        let mut matches: Vec<CloudObject> = cx
            .read("list dns zones", || cloud.list(Self::KIND, &filter))
            .await?
            .into_iter()
            .filter(|zone| zone.flag("private").unwrap_or(false) == self.is_private())
            .collect();
        if matches.len() > 1 {
            return Err(TaskError::AmbiguousLookup {
                task: self.key(),
                matches: matches.len(),
            }
            .into());
        }
        Ok(matches.pop())
    }
}

/// Strips the `/hostedzone/` prefix the API puts on zone ids.
fn trim_zone_id(id: &str) -> String {
    id.strip_prefix(ZONE_ID_PREFIX).unwrap_or(id).to_owned()
}

fn fully_qualified(name: &str) -> String {
    if name.ends_with('.') {
        name.to_owned()
    } else {
        format!("{name}.")
    }
}

#[async_trait]
impl TaskKind for DnsZone {
    const KIND: &'static str = "dns_zone";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.private_vpc.iter().cloned().collect()
    }

    fn identity(&self) -> Option<&str> {
        self.zone_id.as_deref()
    }

    fn set_identity(&mut self, id: String) {
        self.zone_id = Some(trim_zone_id(&id));
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("DnsName", self.dns_name.clone()),
            Field::new("Private", self.private),
            Field::new("PrivateVpc", self.private_vpc.clone()),
        ]
    }

    async fn find(&self, cx: &TaskContext) -> Result<Option<Self>> {
        let Some(zone) = self.find_existing(cx).await? else {
            return Ok(None);
        };

        // A zone may serve several networks; only ours matters.
        let private_vpc = self.private_vpc.as_ref().and_then(|vpc| {
            let vpc_id = cx.identity_of(vpc)?;
            zone.text_list("vpcs")
                .unwrap_or_default()
                .contains(&vpc_id)
                .then(|| vpc.clone())
        });

        Ok(Some(Self {
            name: self.name.clone(),
            dns_name: zone.text("name").map(|n| n.trim_end_matches('.').to_owned()),
            private: Some(zone.flag("private").unwrap_or(false)),
            private_vpc,
            lifecycle: self.lifecycle,
            zone_id: Some(trim_zone_id(&zone.id)),
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, _delta: &Delta) -> Result<()> {
        if self.name.is_empty() {
            return Err(TaskError::required_field(&self.key(), "Name").into());
        }
        if actual.is_none() && self.dns_name.as_deref().is_none_or(str::is_empty) {
            return Err(TaskError::required_field(&self.key(), "DnsName").into());
        }
        Ok(())
    }

    fn as_live(&self) -> Option<&dyn LiveRenderable<Self>> {
        Some(self)
    }

    fn as_terraform(&self) -> Option<&dyn TerraformRenderable<Self>> {
        Some(self)
    }
}

#[async_trait]
impl LiveRenderable<Self> for DnsZone {
    async fn render_live(
        &self,
        cx: &TaskContext,
        actual: Option<&Self>,
        delta: &Delta,
    ) -> Result<LiveChange> {
        let cloud = cx.cloud();
        let vpc_id = match &self.private_vpc {
            Some(vpc) => Some(cx.require_identity(&self.key(), vpc)?),
            None => None,
        };

        let Some(zone_id) = actual.and_then(|a| a.zone_id.as_deref()) else {
            let dns_name = self.dns_name.as_deref().unwrap_or(&self.name);
            let mut attributes = crate::cloud::Attributes::new();
            attributes.insert(String::from("name"), fully_qualified(dns_name).into());
            attributes.insert(String::from("caller_reference"), Uuid::new_v4().to_string().into());
            attributes.insert(String::from("private"), self.is_private().into());
            if let Some(vpc_id) = vpc_id {
                attributes.insert(String::from("vpcs"), vec![vpc_id].into());
            }
            info!("Creating DNS zone {dns_name}");
            let created = cx.write("create dns zone", || cloud.create(Self::KIND, &attributes)).await?;
            return Ok(LiveChange::Created(trim_zone_id(&created.id)));
        };

        let mut change = LiveChange::Unapplied;
        if delta.has_change("PrivateVpc")
            && let Some(vpc_id) = vpc_id
        {
            info!("Associating DNS zone {zone_id} with VPC {vpc_id}");
            cx.write("associate dns zone", || {
                cloud.associate(Self::KIND, zone_id, "vpcs", &vpc_id)
            })
            .await?;
            change = LiveChange::Updated;
        }

        let other: Vec<String> = delta
            .changes()
            .filter(|change| change.name != "PrivateVpc")
            .map(ToString::to_string)
            .collect();
        if !other.is_empty() {
            warn!(
                "Cannot apply changes to DNS zone {}: {}",
                self.name,
                other.join(", ")
            );
        }
        Ok(change)
    }
}

#[async_trait]
impl TerraformRenderable<Self> for DnsZone {
    async fn render_terraform(
        &self,
        cx: &TaskContext,
        actual: Option<&Self>,
        delta: &Delta,
    ) -> Result<()> {
        let Some(existing) = actual else {
            return Err(TaskError::unsupported_operation(
                &self.key(),
                Target::Terraform,
                "creation of hosted DNS zones is not supported; create the zone first",
            )
            .into());
        };

        // The zone itself is never declared, so references to it render as
        // its literal id.
        if delta.has_change("PrivateVpc")
            && let Some(vpc) = &self.private_vpc
        {
            let zone_id = existing.zone_id.clone().unwrap_or_default();
            cx.declare(
                ResourceDeclaration::supplementary(
                    self.key(),
                    "aws_route53_zone_association",
                    &self.name,
                )
                .with("zone_id", zone_id)
                .with("vpc_id", cx.reference(vpc)),
            )
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{MemoryCloud, Mutation};
    use crate::error::ConvergeError;
    use crate::planner::{Plan, TaskOutcome};
    use crate::task::PlanNode;
    use crate::tasks::{object, Vpc};
    use crate::testing::context;
    use serde_json::json;
    use std::sync::Arc;

    fn zone(private: bool) -> DnsZone {
        DnsZone {
            name: String::from("example.com"),
            dns_name: Some(String::from("example.com")),
            zone_id: None,
            private: Some(private),
            private_vpc: private.then(|| TaskKey::new(Vpc::KIND, "main")),
            lifecycle: Lifecycle::Sync,
        }
    }

    fn plan_with(zone: DnsZone) -> (Plan, Arc<crate::task::TaskNode<DnsZone>>) {
        let mut plan = Plan::new();
        plan.add(Vpc {
            name: String::from("main"),
            id: Some(String::from("vpc-1")),
            ..Vpc::default()
        })
        .expect("add vpc");
        let node = plan.add(zone).expect("add zone");
        (plan, node)
    }

    #[test]
    fn test_trim_zone_id() {
        assert_eq!(trim_zone_id("/hostedzone/Z123"), "Z123");
        assert_eq!(trim_zone_id("Z123"), "Z123");
        assert_eq!(fully_qualified("example.com"), "example.com.");
        assert_eq!(fully_qualified("example.com."), "example.com.");
    }

    #[tokio::test]
    async fn test_adopts_existing_zone_by_name() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert(
            "dns_zone",
            object("/hostedzone/zone-123", json!({"name": "example.com.", "private": false})),
        );
        cloud.insert(
            "dns_zone",
            object("/hostedzone/zone-456", json!({"name": "example.com.", "private": true})),
        );
        let (plan, node) = plan_with(zone(false));
        let cx = context(Arc::clone(&cloud), Arc::new(plan), Target::Live);

        let run = node.run(&cx).await.expect("run");

        assert_eq!(run.outcome, TaskOutcome::NoChange);
        assert_eq!(cx.identity_of(node.key()).as_deref(), Some("zone-123"));
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_vpc_association_is_added() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert(
            "dns_zone",
            object("zone-9", json!({"name": "example.com.", "private": true, "vpcs": ["vpc-other"]})),
        );
        let (plan, node) = plan_with(zone(true));
        let cx = context(Arc::clone(&cloud), Arc::new(plan), Target::Live);

        let run = node.run(&cx).await.expect("run");

        assert_eq!(run.outcome, TaskOutcome::Updated);
        assert_eq!(
            cloud.last_mutation(),
            Some(Mutation::Associate {
                kind: String::from("dns_zone"),
                id: String::from("zone-9"),
                relation: String::from("vpcs"),
                target: String::from("vpc-1"),
            })
        );
    }

    #[tokio::test]
    async fn test_zone_adopted_by_id_keeps_its_domain() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert(
            "dns_zone",
            object("/hostedzone/zone-9", json!({"name": "internal.corp.", "private": true, "vpcs": ["vpc-1"]})),
        );
        let config = DnsConfig {
            name: String::from("example.com"),
            dns_name: None,
            zone_id: Some(String::from("/hostedzone/zone-9")),
            private: true,
            lifecycle: Lifecycle::Sync,
        };
        let zone = DnsZone::from_config(&config, TaskKey::new(Vpc::KIND, "main"));
        assert_eq!(zone.dns_name, None);
        let (plan, node) = plan_with(zone);
        let cx = context(Arc::clone(&cloud), Arc::new(plan), Target::Live);

        let run = node.run(&cx).await.expect("run");

        assert_eq!(run.outcome, TaskOutcome::NoChange);
        assert_eq!(cx.identity_of(node.key()).as_deref(), Some("zone-9"));
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_domain_drift_on_adopted_zone_is_not_applied() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert(
            "dns_zone",
            object("zone-9", json!({"name": "internal.corp.", "private": true, "vpcs": ["vpc-1"]})),
        );
        let (plan, node) = plan_with(DnsZone {
            zone_id: Some(String::from("zone-9")),
            ..zone(true)
        });
        let cx = context(Arc::clone(&cloud), Arc::new(plan), Target::Live);

        let run = node.run(&cx).await.expect("run");

        assert_eq!(run.outcome, TaskOutcome::SkippedPolicy);
        let [change] = run.changes.as_slice() else {
            panic!("expected one change");
        };
        assert!(change.starts_with("DnsName: changed("));
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[test]
    fn test_domain_defaults_to_name() {
        let config = DnsConfig {
            name: String::from("example.com"),
            dns_name: None,
            zone_id: None,
            private: false,
            lifecycle: Lifecycle::Sync,
        };

        let zone = DnsZone::from_config(&config, TaskKey::new(Vpc::KIND, "main"));

        assert_eq!(zone.dns_name.as_deref(), Some("example.com"));
        assert_eq!(zone.private_vpc, None);
    }

    #[tokio::test]
    async fn test_terraform_refuses_creation() {
        let cloud = Arc::new(MemoryCloud::default());
        let (plan, node) = plan_with(zone(false));
        let cx = context(cloud, Arc::new(plan), Target::Terraform);

        let err = node.run(&cx).await.expect_err("unsupported");

        assert!(matches!(
            err,
            ConvergeError::Task(TaskError::UnsupportedOperation { .. })
        ));
    }

    #[tokio::test]
    async fn test_terraform_declares_association_for_existing_zone() {
        let cloud = Arc::new(MemoryCloud::default());
        cloud.insert(
            "dns_zone",
            object("zone-9", json!({"name": "example.com.", "private": true})),
        );
        let (plan, node) = plan_with(zone(true));
        let sink = Arc::new(tokio::sync::Mutex::new(crate::render::Artifact::new(
            crate::render::ArtifactFormat::Terraform,
            "us-east-1",
        )));
        let cx = context(cloud, Arc::new(plan), Target::Terraform).with_artifact(Arc::clone(&sink));

        node.run(&cx).await.expect("run");

        let artifact = sink.lock().await;
        let [declaration] = artifact.declarations() else {
            panic!("expected one declaration");
        };
        assert_eq!(declaration.resource_type, "aws_route53_zone_association");
        assert!(!declaration.represents_owner);
    }

    #[test]
    fn test_name_is_required() {
        let zone = DnsZone {
            name: String::new(),
            ..zone(false)
        };

        let err = zone.check_changes(None, &Delta::default()).expect_err("required");

        assert!(matches!(err, ConvergeError::Task(TaskError::Validation { .. })));
    }
}
