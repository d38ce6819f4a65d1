//! Built-in resource kinds.
//!
//! Each kind implements [`TaskKind`](crate::task::TaskKind) plus the render
//! capabilities of the targets it supports:
//!
//! | Kind             | Live | Terraform | `CloudFormation` |
//! |------------------|------|-----------|------------------|
//! | `vpc`            | yes  | yes       | yes              |
//! | `subnet`         | yes  | yes       | yes              |
//! | `security_group` | yes  | yes       | yes              |
//! | `dns_zone`       | yes  | existing  | no               |
//! | `instance`       | yes  | yes       | no               |

mod dns_zone;
mod instance;
mod security_group;
mod subnet;
mod vpc;

pub use dns_zone::DnsZone;
pub use instance::Instance;
pub use security_group::SecurityGroup;
pub use subnet::Subnet;
pub use vpc::Vpc;

use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::cloud::{Attributes, CloudObject, Filter};
use crate::config::ClusterSpec;
use crate::error::{Result, TaskError};
use crate::planner::{Delta, Plan};
use crate::render::Literal;
use crate::task::{FieldValue, TaskContext, TaskKey, TaskKind};

/// Tag carrying the owning cluster name on every managed resource.
pub const CLUSTER_TAG: &str = "converge.io/cluster";

/// Builds the plan for one reconciliation pass from a cluster spec.
///
/// # Errors
///
/// Returns `DuplicateTask` if two resources of the same kind share a name.
pub fn build_plan(spec: &ClusterSpec) -> Result<Plan> {
    let mut plan = Plan::new();
    let tags = |extra: &BTreeMap<String, String>| {
        let mut tags = spec.cluster.tags.clone();
        tags.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        tags.insert(CLUSTER_TAG.to_owned(), spec.cluster.name.clone());
        tags
    };

    let network = &spec.network;
    // A shared network belongs to another owner; its tags are not ours to manage.
    let vpc_tags = if network.vpc.shared {
        BTreeMap::new()
    } else {
        tags(&network.vpc.tags)
    };
    let vpc = Vpc::from_config(&network.vpc, vpc_tags);
    let vpc_key = vpc.key();
    plan.add(vpc)?;

    for subnet in &network.subnets {
        plan.add(Subnet::from_config(subnet, vpc_key.clone(), tags(&subnet.tags)))?;
    }

    for group in &spec.security_groups {
        plan.add(SecurityGroup::from_config(group, vpc_key.clone(), tags(&group.tags)))?;
    }

    if let Some(dns) = &spec.dns {
        plan.add(DnsZone::from_config(dns, vpc_key.clone()))?;
    }

    for instance in &spec.instances {
        plan.add(Instance::from_config(instance, tags(&instance.tags)))?;
    }

    debug!("Built plan with {} tasks for cluster {}", plan.len(), spec.cluster.name);
    Ok(plan)
}

/// Looks a resource up by id if known, else by a natural-key filter.
///
/// More than one match for the filter is an `AmbiguousLookup`.
pub(crate) async fn lookup(
    cx: &TaskContext,
    key: &TaskKey,
    id: Option<&str>,
    filter: &Filter,
) -> Result<Option<CloudObject>> {
    let cloud = cx.cloud();
    if let Some(id) = id {
        return cx
            .read(&format!("get {key}"), || cloud.get(key.kind, id))
            .await;
    }

    let mut matches = cx
        .read(&format!("list {}", key.kind), || cloud.list(key.kind, filter))
        .await?;
    if matches.len() > 1 {
        return Err(TaskError::AmbiguousLookup {
            task: key.clone(),
            matches: matches.len(),
        }
        .into());
    }
    Ok(matches.pop())
}

/// Natural-key filter on the `name` attribute.
pub(crate) fn name_filter(name: &str) -> Filter {
    let mut filter = Filter::new();
    filter.insert(String::from("name"), name.to_owned());
    filter
}

/// Converts a plain field value to its API representation.
///
/// References have no plain representation and yield `None`.
pub(crate) fn plain_value(value: &FieldValue) -> Option<Value> {
    match value {
        FieldValue::Text(s) => Some(Value::String(s.clone())),
        FieldValue::Integer(n) => Some((*n).into()),
        FieldValue::Bool(b) => Some((*b).into()),
        FieldValue::List(items) => items
            .iter()
            .map(plain_value)
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        FieldValue::Map(map) => Some(json!(map)),
        FieldValue::Reference(_) => None,
    }
}

/// Collects the changed plain fields of a delta as API attributes.
///
/// `mapping` pairs a field name with its attribute name.
pub(crate) fn changed_attributes(delta: &Delta, mapping: &[(&str, &str)]) -> Attributes {
    let mut attributes = Attributes::new();
    for (field, attribute) in mapping {
        if let Some(value) = delta.new_value(field).and_then(plain_value) {
            attributes.insert((*attribute).to_owned(), value);
        }
    }
    attributes
}

/// Renders tags as a Terraform `tags` map.
pub(crate) fn terraform_tags(tags: &BTreeMap<String, String>) -> Option<Literal> {
    (!tags.is_empty()).then(|| Literal::Value(json!(tags)))
}

/// Renders tags as a `CloudFormation` `Tags` list.
pub(crate) fn cloudformation_tags(tags: &BTreeMap<String, String>) -> Option<Literal> {
    (!tags.is_empty()).then(|| {
        Literal::Value(Value::Array(
            tags.iter()
                .map(|(k, v)| json!({ "Key": k, "Value": v }))
                .collect(),
        ))
    })
}

/// Builds a `CloudObject` for tests and local seeding.
#[cfg(test)]
pub(crate) fn object(id: &str, attributes: Value) -> CloudObject {
    match attributes {
        Value::Object(map) => CloudObject::new(id, map),
        _ => CloudObject::new(id, Attributes::new()),
    }
}
