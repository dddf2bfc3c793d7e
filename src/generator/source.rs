//! Manifest and chart sources

use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::debug;

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Release name used when rendering charts for discovery
const RENDER_RELEASE: &str = "mesh-components";

/// Where raw manifest text comes from
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Fetch manifest text from a URL or local path
    async fn fetch(&self, location: &str) -> Result<String, Error>;

    /// Render a chart (archive URL, path, or `repo/chart` ref) including its CRDs
    async fn render_chart(&self, chart: &str) -> Result<String, Error>;
}

/// HTTP/file fetcher plus `helm template` renderer
pub struct DefaultManifestSource {
    http: reqwest::Client,
    helm_binary: PathBuf,
    retry: RetryConfig,
}

impl Default for DefaultManifestSource {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl DefaultManifestSource {
    /// Create a source sharing an HTTP client
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            helm_binary: PathBuf::from("helm"),
            retry: RetryConfig::default(),
        }
    }

    /// Use a specific helm binary
    pub fn with_helm_binary(mut self, helm: impl Into<PathBuf>) -> Self {
        self.helm_binary = helm.into();
        self
    }

    async fn fetch_http(&self, url: &str) -> Result<String, Error> {
        retry_with_backoff(&self.retry, "fetch-manifest", || async move {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| Error::generation(url, e.to_string()))?;
            response
                .text()
                .await
                .map_err(|e| Error::generation(url, e.to_string()))
        })
        .await
    }
}

#[async_trait]
impl ManifestSource for DefaultManifestSource {
    async fn fetch(&self, location: &str) -> Result<String, Error> {
        if location.starts_with("http://") || location.starts_with("https://") {
            debug!(url = %location, "fetching manifest");
            return self.fetch_http(location).await;
        }
        let path = location.strip_prefix("file://").unwrap_or(location);
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::generation(location, format!("failed to read manifest: {e}")))
    }

    async fn render_chart(&self, chart: &str) -> Result<String, Error> {
        debug!(chart = %chart, "rendering chart for component discovery");
        let output = Command::new(&self.helm_binary)
            .args(["template", RENDER_RELEASE, chart, "--include-crds"])
            .output()
            .await
            .map_err(|e| Error::generation(chart, format!("failed to run helm: {e}")))?;

        if !output.status.success() {
            return Err(Error::generation(
                chart,
                format!(
                    "helm template failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| Error::generation(chart, format!("helm produced invalid UTF-8: {e}")))
    }
}
