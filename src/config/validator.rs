//! Cluster spec validation.
//!
//! Field-level rules (lengths, ranges) are declared on the spec types with
//! `validator` derives; this module adds the cross-field checks: unique
//! names, references between resources, CIDR syntax and containment, and
//! provider settings.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::debug;
use validator::Validate;

use crate::error::{ConfigError, Result};
use crate::retry::RetryPolicy;

use super::spec::{ClusterSpec, CloudProvider, NetworkConfig};

/// Validator for cluster specs.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all problems found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ConfigError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a cluster spec, failing on the first error.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, spec: &ClusterSpec) -> Result<ValidationResult> {
        let mut result = self.check(spec);

        if result.errors.is_empty() {
            debug!("Cluster spec validation passed");
            Ok(result)
        } else {
            Err(result.errors.remove(0).into())
        }
    }

    /// Collects every validation error and warning of a cluster spec.
    #[must_use]
    pub fn check(&self, spec: &ClusterSpec) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(errors) = spec.validate() {
            result
                .errors
                .push(ConfigError::validation_general(errors.to_string()));
        }

        Self::validate_cluster(spec, &mut result);
        Self::validate_cloud(spec, &mut result);
        Self::validate_engine(spec, &mut result);
        Self::validate_network(&spec.network, &mut result);
        Self::validate_security_groups(spec, &mut result);
        Self::validate_dns(spec, &mut result);
        Self::validate_instances(spec, &mut result);

        result
    }

    fn validate_cluster(spec: &ClusterSpec, result: &mut ValidationResult) {
        if !is_valid_name(&spec.cluster.name) {
            result.errors.push(ConfigError::validation(
                format!(
                    "Cluster name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    spec.cluster.name
                ),
                "cluster.name",
            ));
        }
    }

    fn validate_cloud(spec: &ClusterSpec, result: &mut ValidationResult) {
        let cloud = &spec.cloud;
        match (cloud.provider, cloud.endpoint.as_deref()) {
            (CloudProvider::Rest, None) => result.errors.push(ConfigError::validation(
                "An endpoint is required for the rest provider",
                "cloud.endpoint",
            )),
            (_, Some(endpoint))
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") =>
            {
                result.errors.push(ConfigError::validation(
                    format!("Endpoint '{endpoint}' must be an http(s) URL"),
                    "cloud.endpoint",
                ));
            }
            _ => {}
        }

        if cloud.region.is_empty() {
            result
                .errors
                .push(ConfigError::validation("Region cannot be empty", "cloud.region"));
        }
    }

    fn validate_engine(spec: &ClusterSpec, result: &mut ValidationResult) {
        if spec.engine.timeout_secs == Some(0) {
            result.errors.push(ConfigError::validation(
                "Timeout must be at least 1 second",
                "engine.timeout_secs",
            ));
        }

        for (name, policy) in [("read", &spec.retry.read), ("write", &spec.retry.write)] {
            Self::validate_retry(name, policy, result);
        }
    }

    fn validate_retry(name: &str, policy: &RetryPolicy, result: &mut ValidationResult) {
        if policy.max_attempts == 0 {
            result.errors.push(ConfigError::validation(
                "At least one attempt is required",
                format!("retry.{name}.max_attempts"),
            ));
        }
        if !policy.factor.is_finite() || policy.factor < 1.0 {
            result.errors.push(ConfigError::validation(
                "Backoff factor must be at least 1",
                format!("retry.{name}.factor"),
            ));
        }
        if policy.max_delay < policy.base_delay {
            result.errors.push(ConfigError::validation(
                "Maximum delay must not be below the base delay",
                format!("retry.{name}.max_delay_ms"),
            ));
        }
    }

    fn validate_network(network: &NetworkConfig, result: &mut ValidationResult) {
        let vpc = &network.vpc;
        if vpc.shared && vpc.id.is_none() {
            result.errors.push(ConfigError::validation(
                "A shared VPC must be adopted by id",
                "network.vpc.id",
            ));
        }
        if vpc.cidr.is_none() && vpc.id.is_none() {
            result.errors.push(ConfigError::validation(
                "Either a CIDR block or an existing id is required",
                "network.vpc.cidr",
            ));
        }
        let vpc_block = check_cidr(vpc.cidr.as_deref(), "network.vpc.cidr", result);

        if network.subnets.is_empty() {
            result.warnings.push(String::from("No subnets defined in configuration"));
        }

        let mut seen_names = HashSet::new();
        for (i, subnet) in network.subnets.iter().enumerate() {
            let prefix = format!("network.subnets[{i}]");

            if !seen_names.insert(subnet.name.as_str()) {
                result.errors.push(ConfigError::DuplicateName {
                    resource_type: String::from("subnet"),
                    name: subnet.name.clone(),
                });
            }

            if subnet.cidr.is_none() && subnet.id.is_none() {
                result.errors.push(ConfigError::validation(
                    "Either a CIDR block or an existing id is required",
                    format!("{prefix}.cidr"),
                ));
            }

            let block = check_cidr(subnet.cidr.as_deref(), &format!("{prefix}.cidr"), result);
            if let (Some(outer), Some(inner)) = (vpc_block, block)
                && !contains(outer, inner)
            {
                result.errors.push(ConfigError::validation(
                    format!(
                        "Subnet block {} is outside the VPC block {}",
                        subnet.cidr.as_deref().unwrap_or_default(),
                        vpc.cidr.as_deref().unwrap_or_default()
                    ),
                    format!("{prefix}.cidr"),
                ));
            }
        }
    }

    fn validate_security_groups(spec: &ClusterSpec, result: &mut ValidationResult) {
        let mut seen_names = HashSet::new();

        for (i, group) in spec.security_groups.iter().enumerate() {
            let prefix = format!("security_groups[{i}]");

            if !seen_names.insert(group.name.as_str()) {
                result.errors.push(ConfigError::DuplicateName {
                    resource_type: String::from("security group"),
                    name: group.name.clone(),
                });
            }

            for (j, rule) in group.ingress.iter().enumerate() {
                let field = format!("{prefix}.ingress[{j}]");
                if rule.from_port > rule.to_port {
                    result.errors.push(ConfigError::validation(
                        format!("Port range in '{rule}' is reversed"),
                        field.clone(),
                    ));
                }
                check_cidr(Some(&rule.cidr), &field, result);
            }
        }
    }

    fn validate_dns(spec: &ClusterSpec, result: &mut ValidationResult) {
        let Some(dns) = &spec.dns else {
            return;
        };

        let dns_name = dns.dns_name.as_deref().unwrap_or(&dns.name);
        if dns_name.is_empty() || dns_name.starts_with('.') || dns_name.contains("..") {
            result.errors.push(ConfigError::validation(
                format!("'{dns_name}' is not a valid domain name"),
                "dns.dns_name",
            ));
        }
    }

    fn validate_instances(spec: &ClusterSpec, result: &mut ValidationResult) {
        let subnets: HashSet<&str> = spec.subnet_names().into_iter().collect();
        let groups: HashSet<&str> = spec
            .security_groups
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        let mut seen_names = HashSet::new();

        for (i, instance) in spec.instances.iter().enumerate() {
            let prefix = format!("instances[{i}]");

            if !seen_names.insert(instance.name.as_str()) {
                result.errors.push(ConfigError::DuplicateName {
                    resource_type: String::from("instance"),
                    name: instance.name.clone(),
                });
            }

            if !subnets.contains(instance.subnet.as_str()) {
                result.errors.push(ConfigError::UnknownReference {
                    resource_type: String::from("subnet"),
                    name: instance.subnet.clone(),
                    field: format!("{prefix}.subnet"),
                });
            }

            for group in &instance.security_groups {
                if !groups.contains(group.as_str()) {
                    result.errors.push(ConfigError::UnknownReference {
                        resource_type: String::from("security group"),
                        name: group.clone(),
                        field: format!("{prefix}.security_groups"),
                    });
                }
            }

            if instance.image.is_none() && instance.id.is_none() {
                result.errors.push(ConfigError::validation(
                    format!("Instance '{}' needs an image", instance.name),
                    format!("{prefix}.image"),
                ));
            }

            if instance.security_groups.is_empty() {
                result.warnings.push(format!(
                    "Instance '{}' has no security groups",
                    instance.name
                ));
            }
        }
    }
}

/// Parses a block and records an error if it is malformed.
fn check_cidr(cidr: Option<&str>, field: &str, result: &mut ValidationResult) -> Option<(u32, u8)> {
    let cidr = cidr?;
    let parsed = parse_cidr(cidr);
    if parsed.is_none() {
        result.errors.push(ConfigError::validation(
            format!("'{cidr}' is not a valid IPv4 CIDR block"),
            field,
        ));
    }
    parsed
}

/// Parses `a.b.c.d/n` into a network address and prefix length.
fn parse_cidr(cidr: &str) -> Option<(u32, u8)> {
    let (address, prefix) = cidr.split_once('/')?;
    let address: Ipv4Addr = address.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    (prefix <= 32).then_some((u32::from(address), prefix))
}

fn mask(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0)
}

/// Returns true if `inner` lies entirely within `outer`.
fn contains(outer: (u32, u8), inner: (u32, u8)) -> bool {
    let (outer_address, outer_prefix) = outer;
    let (inner_address, inner_prefix) = inner;
    inner_prefix >= outer_prefix
        && inner_address & mask(outer_prefix) == outer_address & mask(outer_prefix)
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn spec(yaml: &str) -> ClusterSpec {
        ConfigParser::new().parse_yaml(yaml, None).expect("parse")
    }

    const BASE: &str = r"
cluster:
  name: demo
cloud:
  provider: memory
network:
  vpc:
    name: main
    cidr: 10.0.0.0/16
  subnets:
    - name: a
      cidr: 10.0.0.0/20
security_groups:
  - name: web
    ingress: ['tcp:443:0.0.0.0/0']
instances:
  - name: web-1
    subnet: a
    security_groups: [web]
    image: ami-123
";

    #[test]
    fn test_valid_spec() {
        let result = ConfigValidator::new().validate(&spec(BASE)).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_unknown_references() {
        let yaml = BASE
            .replace("subnet: a", "subnet: b")
            .replace("security_groups: [web]", "security_groups: [db]");

        let result = ConfigValidator::new().check(&spec(&yaml));

        assert_eq!(result.error_count(), 2);
        assert!(matches!(
            &result.errors[0],
            ConfigError::UnknownReference { name, .. } if name == "b"
        ));
    }

    #[test]
    fn test_subnet_outside_vpc() {
        let yaml = BASE.replace("cidr: 10.0.0.0/20", "cidr: 10.1.0.0/20");

        let err = ConfigValidator::new()
            .validate(&spec(&yaml))
            .expect_err("outside");

        assert!(err.to_string().contains("outside the VPC block"));
    }

    #[test]
    fn test_rest_provider_needs_endpoint() {
        let yaml = BASE.replace("provider: memory", "provider: rest");

        let result = ConfigValidator::new().check(&spec(&yaml));

        assert_eq!(result.error_count(), 1);
    }

    #[test]
    fn test_duplicate_subnet() {
        let yaml = BASE.replace(
            "    - name: a\n      cidr: 10.0.0.0/20\n",
            "    - name: a\n      cidr: 10.0.0.0/20\n    - name: a\n      cidr: 10.0.16.0/20\n",
        );

        let result = ConfigValidator::new().check(&spec(&yaml));

        assert!(matches!(&result.errors[..], [ConfigError::DuplicateName { .. }]));
    }

    #[test]
    fn test_parse_cidr() {
        assert_eq!(parse_cidr("10.0.0.0/16"), Some((0x0A00_0000, 16)));
        assert!(parse_cidr("10.0.0.0").is_none());
        assert!(parse_cidr("10.0.0.0/33").is_none());
        assert!(parse_cidr("10.0.0/8").is_none());
        assert!(contains((0x0A00_0000, 16), (0x0A00_1000, 20)));
        assert!(!contains((0x0A00_0000, 16), (0x0A01_0000, 20)));
        assert!(contains((0, 0), (0x0A00_0000, 8)));
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("demo"));
        assert!(is_valid_name("prod-eu-1"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Demo"));
        assert!(!is_valid_name("1demo"));
        assert!(!is_valid_name("demo-"));
        assert!(!is_valid_name("de--mo"));
    }
}
