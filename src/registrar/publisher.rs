//! Publication of generated components to the capability registry

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Registry path accepting workload capabilities
pub const WORKLOAD_PATH: &str = "/api/oam/workload";

/// Registry path accepting trait capabilities
pub const TRAIT_PATH: &str = "/api/oam/trait";

fn adapter_metadata(mesh: &str) -> serde_json::Map<String, Value> {
    let mut metadata = serde_json::Map::new();
    metadata.insert(
        "adapter.meshery.io/name".to_string(),
        Value::String(mesh.to_string()),
    );
    metadata
}

fn definition_name(definition: &Value) -> &str {
    definition
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
}

/// One workload capability
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadCapability {
    /// The workload definition document
    pub oam_definition: Value,
    /// The definition's spec schema, serialized
    pub oam_ref_schema: String,
    /// Adapter address (`host:port`)
    pub host: String,
    /// Extra metadata (`adapter.meshery.io/name`, ...)
    pub metadata: serde_json::Map<String, Value>,
}

impl WorkloadCapability {
    /// Capability for a generated definition/schema pair
    pub fn new(definition: Value, schema: &Value, host: impl Into<String>, mesh: &str) -> Self {
        Self {
            oam_definition: definition,
            oam_ref_schema: schema.to_string(),
            host: host.into(),
            metadata: adapter_metadata(mesh),
        }
    }

    /// Definition name, for logs
    pub fn name(&self) -> &str {
        definition_name(&self.oam_definition)
    }
}

/// One trait capability
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraitCapability {
    /// The trait definition document
    pub oam_definition: Value,
    /// The trait's property schema, serialized
    pub oam_ref_schema: String,
    /// Adapter address (`host:port`)
    pub host: String,
    /// Extra metadata (`adapter.meshery.io/name`, ...)
    pub metadata: serde_json::Map<String, Value>,
}

impl TraitCapability {
    /// Capability for a trait definition/schema pair
    pub fn new(definition: Value, schema: &Value, host: impl Into<String>, mesh: &str) -> Self {
        Self {
            oam_definition: definition,
            oam_ref_schema: schema.to_string(),
            host: host.into(),
            metadata: adapter_metadata(mesh),
        }
    }

    /// Definition name, for logs
    pub fn name(&self) -> &str {
        definition_name(&self.oam_definition)
    }
}

/// Sends capabilities to the remote registry
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CapabilityPublisher: Send + Sync {
    /// Register one workload capability
    async fn publish(&self, capability: &WorkloadCapability) -> Result<(), Error>;

    /// Register one trait capability
    async fn publish_trait(&self, capability: &TraitCapability) -> Result<(), Error>;
}

/// [`CapabilityPublisher`] posting JSON over HTTP
pub struct HttpCapabilityPublisher {
    http: reqwest::Client,
    server_url: String,
    retry: RetryConfig,
}

impl HttpCapabilityPublisher {
    /// Publisher targeting `server_url` (scheme included)
    pub fn new(http: reqwest::Client, server_url: impl Into<String>) -> Self {
        Self {
            http,
            server_url: server_url.into(),
            retry: RetryConfig::default(),
        }
    }

    /// Full endpoint URL for workloads
    pub fn endpoint(&self) -> String {
        self.url(WORKLOAD_PATH)
    }

    /// Full endpoint URL for traits
    pub fn trait_endpoint(&self) -> String {
        self.url(TRAIT_PATH)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server_url.trim_end_matches('/'))
    }

    async fn post<T: Serialize + Sync>(&self, endpoint: String, body: &T) -> Result<(), Error> {
        retry_with_backoff(&self.retry, "publish-capability", || {
            let endpoint = endpoint.clone();
            async move {
                self.http
                    .post(&endpoint)
                    .json(body)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map(|_| ())
                    .map_err(|e| Error::internal_with_context("registrar", e.to_string()))
            }
        })
        .await
    }
}

#[async_trait]
impl CapabilityPublisher for HttpCapabilityPublisher {
    async fn publish(&self, capability: &WorkloadCapability) -> Result<(), Error> {
        self.post(self.endpoint(), capability).await?;
        debug!(name = %capability.name(), "workload capability published");
        Ok(())
    }

    async fn publish_trait(&self, capability: &TraitCapability) -> Result<(), Error> {
        self.post(self.trait_endpoint(), capability).await?;
        debug!(name = %capability.name(), "trait capability published");
        Ok(())
    }
}
