//! Cluster spec hashing for change detection.
//!
//! The spec hash fingerprints the desired state only. Connection settings,
//! engine tuning and retry policies do not change what gets provisioned and
//! are left out, so tuning them does not change the hash recorded in reports.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{ConvergeError, Result};

use super::spec::ClusterSpec;

/// Hasher for computing cluster spec hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the desired state described by a spec.
    ///
    /// # Errors
    ///
    /// Returns an error if a section cannot be serialized.
    pub fn hash_spec(&self, spec: &ClusterSpec) -> Result<String> {
        let mut hasher = Sha256::new();

        hasher.update(spec.cluster.name.as_bytes());
        hasher.update(spec.cloud.region.as_bytes());
        hasher.update(self.hash_section(&spec.cluster.tags)?.as_bytes());
        hasher.update(self.hash_section(&spec.network)?.as_bytes());
        hasher.update(self.hash_section(&spec.dns)?.as_bytes());

        // Resource lists are order-insensitive
        let mut groups: Vec<_> = spec.security_groups.iter().collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        for group in groups {
            hasher.update(self.hash_section(group)?.as_bytes());
        }

        let mut instances: Vec<_> = spec.instances.iter().collect();
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        for instance in instances {
            hasher.update(self.hash_section(instance)?.as_bytes());
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Computes a hash of one serializable section.
    ///
    /// # Errors
    ///
    /// Returns an error if the section cannot be serialized.
    pub fn hash_section<T: Serialize + ?Sized>(&self, section: &T) -> Result<String> {
        let bytes = serde_json::to_vec(section)
            .map_err(|e| ConvergeError::internal(format!("failed to serialize section: {e}")))?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    const SPEC: &str = r"
cluster:
  name: demo
network:
  vpc:
    name: main
    cidr: 10.0.0.0/16
security_groups:
  - name: web
  - name: db
";

    fn spec(yaml: &str) -> ClusterSpec {
        ConfigParser::new().parse_yaml(yaml, None).expect("parse")
    }

    #[test]
    fn test_spec_hash_deterministic() {
        let hasher = ConfigHasher::new();

        let hash1 = hasher.hash_spec(&spec(SPEC)).expect("hash");
        let hash2 = hasher.hash_spec(&spec(SPEC)).expect("hash");

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_desired_state_change_changes_hash() {
        let hasher = ConfigHasher::new();

        let hash1 = hasher.hash_spec(&spec(SPEC)).expect("hash");
        let hash2 = hasher
            .hash_spec(&spec(&SPEC.replace("10.0.0.0/16", "10.1.0.0/16")))
            .expect("hash");

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_engine_tuning_and_group_order_do_not_change_hash() {
        let hasher = ConfigHasher::new();
        let base = spec(SPEC);
        let mut tuned = spec(SPEC);
        tuned.engine.parallelism = 16;
        tuned.security_groups.reverse();

        assert_eq!(
            hasher.hash_spec(&base).expect("hash"),
            hasher.hash_spec(&tuned).expect("hash")
        );
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");

        assert_eq!(short, "abcdef12");
    }
}
