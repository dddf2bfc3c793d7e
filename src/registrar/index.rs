//! Latest chart version from a Helm repository index

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Newest published release of the mesh chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRelease {
    /// Application (mesh) version, e.g. `v1.2.4`
    pub app_version: String,
    /// Chart version, e.g. `1.2.4`
    pub chart_version: String,
    /// Absolute URL of the chart archive
    pub chart_url: String,
}

/// Resolves the newest chart release
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VersionIndex: Send + Sync {
    /// Newest release of the mesh chart
    async fn latest(&self) -> Result<ChartRelease, Error>;
}

#[derive(Debug, Deserialize)]
struct IndexFile {
    #[serde(default)]
    entries: BTreeMap<String, Vec<IndexEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    version: String,
    #[serde(default)]
    app_version: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
}

/// [`VersionIndex`] over a Helm repository's `index.yaml`
pub struct HelmRepoIndex {
    http: reqwest::Client,
    repository: String,
    chart: String,
    retry: RetryConfig,
}

impl HelmRepoIndex {
    /// Index for `chart` in `repository`
    pub fn new(http: reqwest::Client, repository: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            http,
            repository: repository.into(),
            chart: chart.into(),
            retry: RetryConfig::default(),
        }
    }

    fn index_url(&self) -> String {
        format!("{}/index.yaml", self.repository.trim_end_matches('/'))
    }
}

#[async_trait]
impl VersionIndex for HelmRepoIndex {
    async fn latest(&self) -> Result<ChartRelease, Error> {
        let url = self.index_url();
        let body = retry_with_backoff(&self.retry, "fetch-chart-index", || {
            let url = url.clone();
            async move {
                self.http
                    .get(&url)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| Error::internal_with_context("version-index", e.to_string()))?
                    .text()
                    .await
                    .map_err(|e| Error::internal_with_context("version-index", e.to_string()))
            }
        })
        .await?;
        latest_from_index(&body, &self.chart, &self.repository)
    }
}

/// First entry of `chart` in an index document.
///
/// Helm writes entries newest first. Relative archive URLs are resolved
/// against `repository`.
pub fn latest_from_index(index: &str, chart: &str, repository: &str) -> Result<ChartRelease, Error> {
    let index: IndexFile = serde_yaml::from_str(index)
        .map_err(|e| Error::internal_with_context("version-index", format!("invalid index: {e}")))?;
    let entry = index
        .entries
        .get(chart)
        .and_then(|entries| entries.first())
        .ok_or_else(|| {
            Error::internal_with_context("version-index", format!("chart {chart} not in index"))
        })?;
    let url = entry.urls.first().ok_or_else(|| {
        Error::internal_with_context(
            "version-index",
            format!("chart {chart} {} has no archive URL", entry.version),
        )
    })?;

    let chart_url = if url.starts_with("http://") || url.starts_with("https://") {
        url.clone()
    } else {
        format!("{}/{}", repository.trim_end_matches('/'), url.trim_start_matches('/'))
    };
    let app_version = entry
        .app_version
        .clone()
        .unwrap_or_else(|| entry.version.clone());
    let app_version = if app_version.starts_with('v') {
        app_version
    } else {
        format!("v{app_version}")
    };

    Ok(ChartRelease {
        app_version,
        chart_version: entry.version.clone(),
        chart_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"
apiVersion: v1
entries:
  osm:
  - apiVersion: v2
    appVersion: v1.2.4
    name: osm
    urls:
    - https://github.com/openservicemesh/osm/releases/download/v1.2.4/osm-1.2.4.tgz
    version: 1.2.4
  - apiVersion: v2
    appVersion: v1.2.3
    name: osm
    urls:
    - osm-1.2.3.tgz
    version: 1.2.3
  osm-arc:
  - version: 1.0.0
    urls: [osm-arc-1.0.0.tgz]
generated: "2023-01-01T00:00:00Z"
"#;

    #[test]
    fn picks_first_entry_of_chart() {
        let release = latest_from_index(INDEX, "osm", "https://openservicemesh.github.io/osm/")
            .expect("index resolves");
        assert_eq!(release.app_version, "v1.2.4");
        assert_eq!(release.chart_version, "1.2.4");
        assert!(release.chart_url.ends_with("osm-1.2.4.tgz"));
    }

    #[test]
    fn resolves_relative_urls_and_missing_app_version() {
        let release = latest_from_index(INDEX, "osm-arc", "https://charts.example.test/")
            .expect("index resolves");
        assert_eq!(release.chart_url, "https://charts.example.test/osm-arc-1.0.0.tgz");
        assert_eq!(release.app_version, "v1.0.0");
    }

    #[test]
    fn unknown_chart_is_an_error() {
        let err = latest_from_index(INDEX, "linkerd", "https://x.test").unwrap_err();
        assert!(err.to_string().contains("linkerd"));
    }

    #[test]
    fn garbage_index_is_an_error() {
        assert!(latest_from_index("entries: [", "osm", "https://x.test").is_err());
    }
}
