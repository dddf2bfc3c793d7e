//! Capability registration
//!
//! The registrar keeps the remote capability registry in step with upstream
//! mesh releases. One iteration resolves the newest chart, regenerates its
//! components, publishes them and rebuilds the operation registry. It runs
//! once at startup and then on a fixed interval; a failed iteration is logged
//! and the next tick still fires.

mod index;
mod publisher;

pub use index::{latest_from_index, ChartRelease, HelmRepoIndex, VersionIndex};
pub use publisher::{
    CapabilityPublisher, HttpCapabilityPublisher, TraitCapability, WorkloadCapability, TRAIT_PATH,
    WORKLOAD_PATH,
};

#[cfg(test)]
pub use index::MockVersionIndex;
#[cfg(test)]
pub use publisher::MockCapabilityPublisher;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AdapterConfig;
use crate::generator::{self, GenerationMethod, GenerationOutcome, GenerationRequest, Generator};
use crate::registry::{MeshProfile, RegistryBuilder, SharedRegistry};
use crate::Error;

/// What one iteration did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    /// Mesh version generated for
    pub version: String,
    /// Capabilities published
    pub published: usize,
    /// Capabilities the registry rejected
    pub failed: usize,
}

/// Periodic generate-and-publish loop
pub struct Registrar {
    config: AdapterConfig,
    profile: MeshProfile,
    generator: Generator,
    index: Arc<dyn VersionIndex>,
    publisher: Arc<dyn CapabilityPublisher>,
    registry_builder: Arc<RegistryBuilder>,
    registry: SharedRegistry,
}

impl Registrar {
    /// Create a registrar
    pub fn new(
        config: AdapterConfig,
        profile: MeshProfile,
        generator: Generator,
        index: Arc<dyn VersionIndex>,
        publisher: Arc<dyn CapabilityPublisher>,
        registry_builder: Arc<RegistryBuilder>,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            config,
            profile,
            generator,
            index,
            publisher,
            registry_builder,
            registry,
        }
    }

    /// Resolve, regenerate, publish, then refresh the registry.
    ///
    /// Only resolution and regeneration are bounded by the generation timeout.
    #[instrument(skip(self))]
    pub async fn run_iteration(&self) -> Result<IterationReport, Error> {
        let budget = self.config.generation_timeout;
        let (release, outcome) = tokio::time::timeout(budget, self.regenerate())
            .await
            .map_err(|_| {
                Error::internal_with_context(
                    "registrar",
                    format!("component generation exceeded {}s", budget.as_secs()),
                )
            })??;
        debug!(version = %release.app_version, kinds = outcome.kinds().len(), "components regenerated");

        let (published, failed) = self
            .publish_dir(&self.config.components_dir(&release.app_version))
            .await?;

        self.registry.replace(self.registry_builder.build().await);

        Ok(IterationReport {
            version: release.app_version,
            published,
            failed,
        })
    }

    async fn regenerate(&self) -> Result<(ChartRelease, GenerationOutcome), Error> {
        let release = self.index.latest().await?;
        info!(
            app_version = %release.app_version,
            chart_version = %release.chart_version,
            "resolved latest chart"
        );
        let request = GenerationRequest {
            source_url: release.chart_url.clone(),
            method: GenerationMethod::HelmChart,
            filter: self.profile.crd_filter.clone(),
            version: release.app_version.clone(),
            dir_name: release.app_version.clone(),
            base_path: self.config.components_path.clone(),
            force: true,
            mesh_name: self.profile.name.clone(),
        };
        let outcome = self.generator.generate(&request).await?;
        Ok((release, outcome))
    }

    /// Publish every definition in `dir`; returns (published, failed).
    ///
    /// A rejected capability does not stop the others.
    pub async fn publish_dir(&self, dir: &Path) -> Result<(usize, usize), Error> {
        let host = self.config.adapter_address();
        let mut published = 0;
        let mut failed = 0;
        for (kind, definition, schema) in generator::read_generated(dir).await? {
            let capability = WorkloadCapability::new(definition, &schema, &host, &self.profile.name);
            match self.publisher.publish(&capability).await {
                Ok(()) => published += 1,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "failed to publish capability");
                    failed += 1;
                }
            }
        }
        info!(dir = %dir.display(), published, failed, "capabilities published");
        Ok((published, failed))
    }

    /// Publish every trait the adapter acts on; returns (published, failed)
    pub async fn publish_traits(&self) -> (usize, usize) {
        let host = self.config.adapter_address();
        let (definition, schema) = self.profile.injection_trait_definition();
        let capability = TraitCapability::new(definition, &schema, &host, &self.profile.name);
        match self.publisher.publish_trait(&capability).await {
            Ok(()) => (1, 0),
            Err(e) => {
                warn!(name = %capability.name(), error = %e, "failed to publish trait");
                (0, 1)
            }
        }
    }

    /// Startup registration: traits, then the components already on disk for
    /// `version` when one is pinned
    pub async fn register_static(&self, version: Option<&str>) -> Result<(usize, usize), Error> {
        let (mut published, mut failed) = self.publish_traits().await;
        let Some(version) = version else {
            return Ok((published, failed));
        };
        let dir = self.config.components_dir(version);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            debug!(dir = %dir.display(), "no pre-generated components");
            return Ok((published, failed));
        }
        let (workloads, rejected) = self.publish_dir(&dir).await?;
        published += workloads;
        failed += rejected;
        Ok((published, failed))
    }

    /// Spawn the loop: one iteration now, then one per configured interval
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.registrar_interval;
        tokio::spawn(async move { self.run_loop(period).await })
    }

    async fn run_loop(&self, period: Duration) {
        self.log_iteration(self.run_iteration().await);

        let mut interval = tokio::time::interval(period);
        interval.tick().await; // first tick is immediate; we just ran
        loop {
            interval.tick().await;
            self.log_iteration(self.run_iteration().await);
        }
    }

    fn log_iteration(&self, result: Result<IterationReport, Error>) {
        match result {
            Ok(report) => info!(
                version = %report.version,
                published = report.published,
                failed = report.failed,
                "capability registration finished"
            ),
            Err(e) => error!(error = %e, "capability registration failed"),
        }
    }
}
