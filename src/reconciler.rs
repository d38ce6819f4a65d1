//! Reconciler tying a cluster spec to a plan execution.
//!
//! This module builds a fresh plan from the cluster spec for every pass,
//! executes it against the configured cloud and target, and writes the
//! rendered artifact of infrastructure-as-code targets to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cloud::{CloudApi, MemoryCloud, RestCloudClient};
use crate::config::{CloudProvider, ClusterSpec, ConfigHasher, ConfigParser};
use crate::error::{ConfigError, Result};
use crate::planner::{ExecutionReport, PlanExecutor};
use crate::render::Target;
use crate::tasks::build_plan;

/// Runs reconciliation passes for one cluster spec.
#[derive(Debug)]
pub struct Reconciler {
    /// Cluster spec.
    spec: ClusterSpec,
    /// Cloud API.
    cloud: Arc<dyn CloudApi>,
    /// Spec hasher.
    hasher: ConfigHasher,
}

impl Reconciler {
    /// Creates a reconciler over an explicit cloud API.
    #[must_use]
    pub fn new(spec: ClusterSpec, cloud: Arc<dyn CloudApi>) -> Self {
        Self {
            spec,
            cloud,
            hasher: ConfigHasher::new(),
        }
    }

    /// Creates a reconciler over the cloud API configured in the spec.
    ///
    /// The `rest` provider reads its token from `CONVERGE_CLOUD_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint or token is missing, or the HTTP
    /// client cannot be created.
    pub fn from_spec(spec: ClusterSpec) -> Result<Self> {
        let cloud: Arc<dyn CloudApi> = match spec.cloud.provider {
            CloudProvider::Memory => {
                warn!("Using the in-memory cloud; nothing outlives this process");
                Arc::new(MemoryCloud::new(spec.cloud.region.clone()))
            }
            CloudProvider::Rest => {
                let endpoint = spec.cloud.endpoint.as_deref().ok_or_else(|| {
                    ConfigError::validation("An endpoint is required for the rest provider", "cloud.endpoint")
                })?;
                let token = ConfigParser::cloud_token()?;
                Arc::new(RestCloudClient::with_timeout(
                    endpoint,
                    &token,
                    &spec.cloud.region,
                    spec.cloud.request_timeout_secs,
                )?)
            }
        };
        Ok(Self::new(spec, cloud))
    }

    /// Returns the cluster spec.
    #[must_use]
    pub const fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    /// Runs one reconciliation pass against a target.
    ///
    /// Task failures are part of the report; see [`ExecutionReport::success`].
    ///
    /// # Errors
    ///
    /// Returns an error if the plan cannot be built or ordered, or the
    /// artifact cannot be rendered.
    pub async fn run(&self, target: Target, cancel: &CancellationToken) -> Result<ExecutionReport> {
        let spec_hash = self.hasher.hash_spec(&self.spec)?;
        let plan = Arc::new(build_plan(&self.spec)?);

        info!(
            "Reconciling cluster {} ({} tasks, spec {}) against the {} target",
            self.spec.cluster.name,
            plan.len(),
            self.hasher.short_hash(&spec_hash),
            target
        );

        let executor = PlanExecutor::new(Arc::clone(&self.cloud), target)
            .with_parallelism(self.spec.engine.parallelism)
            .with_retry(self.spec.retry.clone())
            .with_timeout(self.spec.engine_timeout())
            .with_spec_hash(spec_hash);

        let report = executor.execute(plan, cancel).await?;
        if report.success() {
            info!("Reconciliation of {} finished", self.spec.cluster.name);
        } else {
            warn!(
                "Reconciliation of {} finished with {} failed tasks",
                self.spec.cluster.name,
                report.failed()
            );
        }
        Ok(report)
    }

    /// Computes the changes a live pass would make, without making them.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan cannot be built or ordered.
    pub async fn plan(&self, cancel: &CancellationToken) -> Result<ExecutionReport> {
        self.run(Target::DryRun, cancel).await
    }

    /// Writes the rendered artifact of a report into `dir`.
    ///
    /// Returns the written path, or `None` if the report carries no artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn write_artifact(report: &ExecutionReport, dir: &Path) -> Result<Option<PathBuf>> {
        let Some(artifact) = &report.artifact else {
            debug!("No artifact to write for the {} target", report.target);
            return Ok(None);
        };

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&artifact.file_name);
        tokio::fs::write(&path, &artifact.contents).await?;
        info!("Wrote {}", path.display());
        Ok(Some(path))
    }
}
