//! Cluster specification types.
//!
//! This module defines all the structs that map to the `cluster.yaml` file.
//! These types are declarative and fully describe the desired infrastructure
//! of one cluster; the engine turns them into a plan of tasks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::retry::RetryPolicies;
use crate::task::Lifecycle;

/// The root configuration structure for a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct ClusterSpec {
    /// Cluster-level configuration.
    #[validate(nested)]
    pub cluster: ClusterConfig,
    /// Cloud API connection.
    #[serde(default)]
    pub cloud: CloudConfig,
    /// Execution engine settings.
    #[serde(default)]
    #[validate(nested)]
    pub engine: EngineConfig,
    /// Read and write retry policies.
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Network layout.
    #[validate(nested)]
    pub network: NetworkConfig,
    /// Optional hosted DNS zone.
    #[serde(default)]
    #[validate(nested)]
    pub dns: Option<DnsConfig>,
    /// Security groups.
    #[serde(default)]
    #[validate(nested)]
    pub security_groups: Vec<SecurityGroupConfig>,
    /// Compute instances.
    #[serde(default)]
    #[validate(nested)]
    pub instances: Vec<InstanceConfig>,
}

/// Cluster-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ClusterConfig {
    /// Unique name for the cluster.
    #[validate(length(min = 1, max = 63))]
    pub name: String,
    /// Tags applied to every taggable resource.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Cloud API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloudConfig {
    /// Which cloud API implementation to use.
    #[serde(default)]
    pub provider: CloudProvider,
    /// Base URL of the REST API (required for the `rest` provider).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Region resources are provisioned in.
    #[serde(default = "default_region")]
    pub region: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Cloud API implementations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// JSON-over-HTTP cloud API.
    #[default]
    Rest,
    /// In-process cloud, for local runs.
    Memory,
}

/// Execution engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct EngineConfig {
    /// Maximum number of tasks running at once.
    #[serde(default = "default_parallelism")]
    #[validate(range(min = 1, max = 64))]
    pub parallelism: usize,
    /// Overall deadline for one pass, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Network layout of the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct NetworkConfig {
    /// The cluster VPC.
    #[validate(nested)]
    pub vpc: VpcConfig,
    /// Subnets inside the VPC.
    #[serde(default)]
    #[validate(nested)]
    pub subnets: Vec<SubnetConfig>,
}

/// VPC configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct VpcConfig {
    /// VPC name.
    #[validate(length(min = 1))]
    pub name: String,
    /// Existing VPC id, if adopting one.
    #[serde(default)]
    pub id: Option<String>,
    /// Whether the VPC is managed outside this cluster.
    #[serde(default)]
    pub shared: bool,
    /// Address block.
    #[serde(default)]
    pub cidr: Option<String>,
    /// Whether instances get public DNS hostnames.
    #[serde(default)]
    pub enable_dns_hostnames: Option<bool>,
    /// Whether the network resolves DNS.
    #[serde(default)]
    pub enable_dns_support: Option<bool>,
    /// VPC-specific tags (merged with cluster tags).
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Lifecycle policy.
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

/// Subnet configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct SubnetConfig {
    /// Subnet name, unique within the cluster.
    #[validate(length(min = 1))]
    pub name: String,
    /// Existing subnet id, if adopting one.
    #[serde(default)]
    pub id: Option<String>,
    /// Address block.
    #[serde(default)]
    pub cidr: Option<String>,
    /// Availability zone.
    #[serde(default)]
    pub zone: Option<String>,
    /// Subnet-specific tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Lifecycle policy.
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

/// Security group configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct SecurityGroupConfig {
    /// Group name, unique within the cluster.
    #[validate(length(min = 1))]
    pub name: String,
    /// Existing group id, if adopting one.
    #[serde(default)]
    pub id: Option<String>,
    /// Group description.
    #[serde(default)]
    pub description: Option<String>,
    /// Ingress rules.
    #[serde(default)]
    pub ingress: Vec<IngressRule>,
    /// Group-specific tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Lifecycle policy.
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

/// One ingress rule, written as `PROTOCOL:PORT[-PORT]:CIDR`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct IngressRule {
    /// Protocol (`tcp`, `udp`, `icmp` or `all`).
    pub protocol: String,
    /// First port of the range.
    pub from_port: u16,
    /// Last port of the range.
    pub to_port: u16,
    /// Source address block.
    pub cidr: String,
}

/// Hosted DNS zone configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct DnsConfig {
    /// Zone name.
    #[validate(length(min = 1))]
    pub name: String,
    /// Fully-qualified domain. Defaults to the name, unless the zone is
    /// adopted through `zone_id`.
    #[serde(default)]
    pub dns_name: Option<String>,
    /// Existing zone id, if adopting one.
    #[serde(default)]
    pub zone_id: Option<String>,
    /// Whether the zone is private to the cluster VPC.
    #[serde(default)]
    pub private: bool,
    /// Lifecycle policy.
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

/// Compute instance configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct InstanceConfig {
    /// Instance name, unique within the cluster.
    #[validate(length(min = 1))]
    pub name: String,
    /// Existing instance id, if adopting one.
    #[serde(default)]
    pub id: Option<String>,
    /// Name of the subnet to launch in.
    #[validate(length(min = 1))]
    pub subnet: String,
    /// Names of the attached security groups.
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// Machine image.
    #[serde(default)]
    pub image: Option<String>,
    /// Instance size.
    #[serde(default)]
    pub instance_type: Option<String>,
    /// Free-form note, set at launch and never reconciled.
    #[serde(default)]
    pub description: Option<String>,
    /// Instance-specific tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Lifecycle policy.
    #[serde(default)]
    pub lifecycle: Lifecycle,
}

// Default value functions

fn default_region() -> String {
    String::from("us-east-1")
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_parallelism() -> usize {
    crate::planner::DEFAULT_PARALLELISM
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            provider: CloudProvider::default(),
            endpoint: None,
            region: default_region(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            timeout_secs: None,
        }
    }
}

// Ingress rule string conversion

impl FromStr for IngressRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(protocol), Some(ports), Some(cidr)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("Invalid ingress rule: {s}. Expected format: PROTOCOL:PORT[-PORT]:CIDR"));
        };

        let protocol = protocol.to_lowercase();
        if !matches!(protocol.as_str(), "tcp" | "udp" | "icmp" | "all") {
            return Err(format!("Invalid protocol: {protocol}. Expected: tcp, udp, icmp, or all"));
        }

        let port = |p: &str| {
            p.parse::<u16>()
                .map_err(|_| format!("Invalid port number: {p}"))
        };
        let (from_port, to_port) = match ports.split_once('-') {
            Some((from, to)) => (port(from)?, port(to)?),
            None => {
                let single = port(ports)?;
                (single, single)
            }
        };

        Ok(Self {
            protocol,
            from_port,
            to_port,
            cidr: cidr.to_owned(),
        })
    }
}

impl TryFrom<String> for IngressRule {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IngressRule> for String {
    fn from(rule: IngressRule) -> Self {
        rule.to_string()
    }
}

impl fmt::Display for IngressRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.protocol, self.from_port, self.to_port, self.cidr
        )
    }
}

impl ClusterSpec {
    /// Returns the number of tasks the spec expands to.
    #[must_use]
    pub fn task_count(&self) -> usize {
        1 + self.network.subnets.len()
            + self.security_groups.len()
            + usize::from(self.dns.is_some())
            + self.instances.len()
    }

    /// Returns the overall deadline of one pass, if any.
    #[must_use]
    pub fn engine_timeout(&self) -> Option<Duration> {
        self.engine.timeout_secs.map(Duration::from_secs)
    }

    /// Returns subnet names.
    #[must_use]
    pub fn subnet_names(&self) -> Vec<&str> {
        self.network.subnets.iter().map(|s| s.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingress_rule_parse() {
        let rule: IngressRule = "tcp:443:0.0.0.0/0".parse().expect("parse");
        assert_eq!(rule.protocol, "tcp");
        assert_eq!((rule.from_port, rule.to_port), (443, 443));
        assert_eq!(rule.cidr, "0.0.0.0/0");
        assert_eq!(rule.to_string(), "tcp:443-443:0.0.0.0/0");
    }

    #[test]
    fn test_ingress_rule_parse_range() {
        let rule: IngressRule = "UDP:1000-2000:10.0.0.0/8".parse().expect("parse");
        assert_eq!(rule.protocol, "udp");
        assert_eq!((rule.from_port, rule.to_port), (1000, 2000));
    }

    #[test]
    fn test_ingress_rule_invalid() {
        assert!("invalid".parse::<IngressRule>().is_err());
        assert!("sctp:22:0.0.0.0/0".parse::<IngressRule>().is_err());
        assert!("tcp:http:0.0.0.0/0".parse::<IngressRule>().is_err());
    }

    #[test]
    fn test_defaults() {
        let cloud = CloudConfig::default();
        assert_eq!(cloud.provider, CloudProvider::Rest);
        assert_eq!(cloud.region, "us-east-1");
        assert_eq!(EngineConfig::default().parallelism, 4);
    }
}
