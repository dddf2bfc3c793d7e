//! Upstream release discovery

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use semver::Version;
use serde::Deserialize;
use tracing::debug;

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

const GITHUB_API: &str = "https://api.github.com";

/// Lists release tags of an upstream project
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseLister: Send + Sync {
    /// The `count` most recent release tags of `owner/repo`, newest first
    async fn latest_releases(
        &self,
        owner: &str,
        repo: &str,
        count: usize,
    ) -> Result<Vec<String>, Error>;
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
}

/// [`ReleaseLister`] over the GitHub releases API
pub struct GitHubReleaseLister {
    http: reqwest::Client,
    retry: RetryConfig,
}

impl GitHubReleaseLister {
    /// Create a lister against api.github.com
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            retry: RetryConfig::default(),
        }
    }
}

#[async_trait]
impl ReleaseLister for GitHubReleaseLister {
    async fn latest_releases(
        &self,
        owner: &str,
        repo: &str,
        count: usize,
    ) -> Result<Vec<String>, Error> {
        let url = format!("{GITHUB_API}/repos/{owner}/{repo}/releases?per_page=100");
        let releases: Vec<GitHubRelease> = retry_with_backoff(&self.retry, "list-releases", || {
            let url = url.clone();
            async move {
                self.http
                    .get(&url)
                    .header(reqwest::header::USER_AGENT, "mesh-adapter")
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| Error::internal_with_context("release-lister", e.to_string()))?
                    .json()
                    .await
                    .map_err(|e| Error::internal_with_context("release-lister", e.to_string()))
            }
        })
        .await?;

        let tags: Vec<String> = releases
            .into_iter()
            .filter(|r| !r.draft && !r.prerelease)
            .map(|r| r.tag_name)
            .collect();
        debug!(owner, repo, found = tags.len(), "listed releases");
        Ok(newest_versions(tags, count))
    }
}

/// Sort tags by semantic version, newest first, and keep `count`.
///
/// Tags that are not semver (with or without a `v` prefix) are dropped.
pub fn newest_versions(tags: impl IntoIterator<Item = String>, count: usize) -> Vec<String> {
    let mut parsed: Vec<(Version, String)> = tags
        .into_iter()
        .filter_map(|tag| {
            Version::parse(tag.trim_start_matches('v'))
                .ok()
                .map(|v| (v, tag))
        })
        .collect();
    parsed.sort_by(|a, b| b.0.cmp(&a.0));
    parsed.dedup_by(|a, b| a.0 == b.0);
    parsed.into_iter().take(count).map(|(_, tag)| tag).collect()
}
