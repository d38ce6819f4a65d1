//! Configuration module for the reconciliation engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `cluster.yaml`
//! - Validation of the cluster spec
//! - Computing spec hashes recorded in execution reports

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    CloudConfig, CloudProvider, ClusterConfig, ClusterSpec, DnsConfig, EngineConfig,
    IngressRule, InstanceConfig, NetworkConfig, SecurityGroupConfig, SubnetConfig, VpcConfig,
};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, TOKEN_ENV, find_config_file};
pub use validator::{ConfigValidator, ValidationResult};
pub use hash::ConfigHasher;
