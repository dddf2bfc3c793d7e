//! Conformance test runner

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::cluster::ClusterClient;
use crate::generator::ManifestSource;
use crate::Error;

/// One conformance run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformanceRequest {
    /// Manifest of the conformance suite
    pub manifest: String,
    /// Mesh under test
    pub mesh: String,
    /// Mesh version under test ("" when unknown)
    pub mesh_version: String,
    /// Namespace the suite runs in
    pub namespace: String,
}

/// Runs the conformance suite
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConformanceRunner: Send + Sync {
    /// Run the suite; `Ok` carries the runner's report text
    async fn run(&self, request: &ConformanceRequest) -> Result<String, Error>;
}

/// Deploys the conformance suite manifest into the cluster
pub struct ClusterConformanceRunner {
    cluster: Arc<dyn ClusterClient>,
    source: Arc<dyn ManifestSource>,
}

impl ClusterConformanceRunner {
    /// Create a runner deploying through `cluster`
    pub fn new(cluster: Arc<dyn ClusterClient>, source: Arc<dyn ManifestSource>) -> Self {
        Self { cluster, source }
    }
}

#[async_trait]
impl ConformanceRunner for ClusterConformanceRunner {
    async fn run(&self, request: &ConformanceRequest) -> Result<String, Error> {
        let manifest = self.source.fetch(&request.manifest).await?;
        self.cluster.ensure_namespace(&request.namespace).await?;
        self.cluster
            .apply_manifest(&manifest, &request.namespace, false)
            .await?;
        info!(
            mesh = %request.mesh,
            namespace = %request.namespace,
            "conformance suite deployed"
        );
        Ok(format!(
            "conformance suite for {} {} deployed to {}",
            request.mesh, request.mesh_version, request.namespace
        ))
    }
}
