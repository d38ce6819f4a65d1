//! Configuration parser for loading cluster specs.
//!
//! This module handles loading the cluster spec from YAML files and
//! environment variables, with proper precedence and error handling.

use crate::error::{ConfigError, ConvergeError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{ClusterSpec, CloudProvider};

/// Environment variable holding the cloud API token.
pub const TOKEN_ENV: &str = "CONVERGE_CLOUD_TOKEN";

/// Configuration parser for loading cluster specs.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a cluster spec from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ClusterSpec> {
        let path = self.resolve(path.as_ref());
        info!("Loading cluster spec from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound { path }.into());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(&path))
    }

    /// Parses a cluster spec from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ClusterSpec> {
        debug!("Parsing YAML cluster spec");

        let spec: ClusterSpec = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            }
        })?;

        debug!("Successfully parsed cluster spec: {}", spec.cluster.name);
        Ok(spec)
    }

    /// Loads a cluster spec with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `CONVERGE_<SECTION>_<KEY>` (e.g., `CONVERGE_CLOUD_REGION`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ClusterSpec> {
        let mut spec = self.load_file(path)?;
        apply_overrides(&mut spec, |name| std::env::var(name).ok())?;
        Ok(spec)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self.resolve(Path::new(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the cloud API token from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn cloud_token() -> Result<String> {
        std::env::var(TOKEN_ENV).map_err(|_| {
            ConfigError::MissingEnvVar {
                name: String::from(TOKEN_ENV),
            }
            .into()
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Applies `CONVERGE_*` overrides read through `lookup`.
fn apply_overrides(spec: &mut ClusterSpec, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(name) = lookup("CONVERGE_CLUSTER_NAME") {
        debug!("Overriding cluster.name from environment");
        spec.cluster.name = name;
    }

    if let Some(provider) = lookup("CONVERGE_CLOUD_PROVIDER") {
        debug!("Overriding cloud.provider from environment");
        spec.cloud.provider = match provider.to_lowercase().as_str() {
            "rest" => CloudProvider::Rest,
            "memory" => CloudProvider::Memory,
            other => return Err(invalid_override("CONVERGE_CLOUD_PROVIDER", other)),
        };
    }

    if let Some(endpoint) = lookup("CONVERGE_CLOUD_ENDPOINT") {
        debug!("Overriding cloud.endpoint from environment");
        spec.cloud.endpoint = Some(endpoint);
    }

    if let Some(region) = lookup("CONVERGE_CLOUD_REGION") {
        debug!("Overriding cloud.region from environment");
        spec.cloud.region = region;
    }

    if let Some(parallelism) = lookup("CONVERGE_ENGINE_PARALLELISM") {
        debug!("Overriding engine.parallelism from environment");
        spec.engine.parallelism = parallelism
            .parse()
            .map_err(|_| invalid_override("CONVERGE_ENGINE_PARALLELISM", &parallelism))?;
    }

    if let Some(timeout) = lookup("CONVERGE_ENGINE_TIMEOUT_SECS") {
        debug!("Overriding engine.timeout_secs from environment");
        spec.engine.timeout_secs = Some(
            timeout
                .parse()
                .map_err(|_| invalid_override("CONVERGE_ENGINE_TIMEOUT_SECS", &timeout))?,
        );
    }

    Ok(())
}

fn invalid_override(name: &str, value: &str) -> ConvergeError {
    ConfigError::ParseError {
        message: format!("Invalid value '{value}' for {name}"),
        location: Some(String::from("environment")),
    }
    .into()
}

/// Default cluster spec file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "cluster.yaml",
    "cluster.yml",
    "converge.yaml",
    "converge.yml",
];

/// Finds the cluster spec in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no spec file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found cluster spec: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}
