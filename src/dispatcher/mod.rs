//! Operation dispatch
//!
//! A request moves `Received -> Dispatched -> {Succeeded | Failed}`. The
//! operation name is resolved against the current registry snapshot on the
//! caller's task; an unknown name fails right there, before any cluster
//! call. A known operation is moved onto its own Tokio task together with an
//! [`OperationUnit`], and [`Dispatcher::dispatch`] returns as soon as the task
//! is spawned. Completion is only ever observed through the event stream.
//!
//! There is no ordering between concurrently dispatched requests, even
//! against the same namespace; every handler step is an upsert.

mod conformance;
mod handlers;
mod unit;

pub use conformance::{ClusterConformanceRunner, ConformanceRequest, ConformanceRunner};
pub use unit::{OperationUnit, ABORTED_DETAIL};

#[cfg(test)]
pub use conformance::MockConformanceRunner;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::config::AdapterConfig;
use crate::events::{Event, EventSink, LogEventSink};
use crate::generator::ManifestSource;
use crate::reconciler::{DeclarativeRequest, Reconciler};
use crate::registry::{MeshProfile, SharedRegistry};
use crate::Error;

/// A lifecycle request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    /// Request id; every event of the request carries it
    pub id: String,
    /// Operation name as received
    pub operation: String,
    /// Target namespace ("" = operation default)
    pub namespace: String,
    /// Remove instead of install/apply
    pub delete: bool,
    /// Version override (defaults to the newest registered version)
    pub version: Option<String>,
    /// Manifest body for the custom operation
    pub custom_body: Option<String>,
}

impl OperationRequest {
    /// New request with a random id
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            namespace: String::new(),
            delete: false,
            version: None,
            custom_body: None,
        }
    }

    /// Use a caller-chosen id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Target namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Remove instead of install
    pub fn deleting(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    /// Pin a version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Attach a manifest body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.custom_body = Some(body.into());
        self
    }
}

/// Collaborators shared by every handler
pub struct AdapterContext {
    /// Adapter settings
    pub config: AdapterConfig,
    /// Mesh specifics
    pub profile: MeshProfile,
    /// Cluster mutations
    pub cluster: Arc<dyn ClusterClient>,
    /// Template and manifest fetching
    pub source: Arc<dyn ManifestSource>,
    /// Conformance suite
    pub conformance: Arc<dyn ConformanceRunner>,
    /// Where request events go
    pub sink: Arc<dyn EventSink>,
}

impl AdapterContext {
    /// Create a builder around the two mandatory collaborators
    pub fn builder(
        cluster: Arc<dyn ClusterClient>,
        source: Arc<dyn ManifestSource>,
    ) -> AdapterContextBuilder {
        AdapterContextBuilder {
            cluster,
            source,
            config: AdapterConfig::default(),
            profile: MeshProfile::default(),
            conformance: None,
            sink: None,
        }
    }
}

/// Builder for [`AdapterContext`]
pub struct AdapterContextBuilder {
    cluster: Arc<dyn ClusterClient>,
    source: Arc<dyn ManifestSource>,
    config: AdapterConfig,
    profile: MeshProfile,
    conformance: Option<Arc<dyn ConformanceRunner>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl AdapterContextBuilder {
    /// Adapter settings
    pub fn config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }

    /// Mesh specifics
    pub fn profile(mut self, profile: MeshProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Override the conformance runner (primarily for testing)
    pub fn conformance(mut self, runner: Arc<dyn ConformanceRunner>) -> Self {
        self.conformance = Some(runner);
        self
    }

    /// Event destination (defaults to logging only)
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the context
    pub fn build(self) -> AdapterContext {
        let conformance = self.conformance.unwrap_or_else(|| {
            Arc::new(ClusterConformanceRunner::new(
                self.cluster.clone(),
                self.source.clone(),
            ))
        });
        AdapterContext {
            config: self.config,
            profile: self.profile,
            cluster: self.cluster,
            source: self.source,
            conformance,
            sink: self.sink.unwrap_or_else(|| Arc::new(LogEventSink)),
        }
    }
}

/// A spawned request
#[derive(Debug)]
pub struct DispatchHandle {
    id: String,
    task: JoinHandle<()>,
}

impl DispatchHandle {
    /// Request id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the task to end (the terminal event is already sent by then)
    pub async fn wait(self) -> Result<(), Error> {
        self.task
            .await
            .map_err(|e| Error::internal_with_context("dispatcher", e.to_string()))
    }
}

/// Resolves requests against the registry and runs them
pub struct Dispatcher {
    context: Arc<AdapterContext>,
    registry: SharedRegistry,
    reconciler: Reconciler,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(context: AdapterContext, registry: SharedRegistry) -> Self {
        let reconciler = Reconciler::new(
            context.cluster.clone(),
            context.profile.clone(),
            registry.clone(),
        );
        Self {
            context: Arc::new(context),
            registry,
            reconciler,
        }
    }

    /// Registry handle this dispatcher reads
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Submit a request.
    ///
    /// An unknown operation sends one Failed event and returns
    /// [`Error::OpInvalid`]. Otherwise the request runs on a new task and the
    /// handle is returned immediately. Must be called within a Tokio runtime.
    pub fn dispatch(&self, request: OperationRequest) -> Result<DispatchHandle, Error> {
        let snapshot = self.registry.snapshot();
        let operation = match snapshot.get(&request.operation) {
            Ok(op) => op.clone(),
            Err(e) => {
                warn!(operation_id = %request.id, operation = %request.operation, "unknown operation");
                self.context.sink.send(Event::failed(
                    &request.id,
                    format!("Error while running {}", request.operation),
                    e.to_string(),
                ));
                return Err(e);
            }
        };

        info!(
            operation_id = %request.id,
            operation = %operation.name,
            category = %operation.category,
            namespace = %request.namespace,
            delete = request.delete,
            "dispatching operation"
        );
        let id = request.id.clone();
        let unit = OperationUnit::new(&request.id, &operation.name, self.context.sink.clone());
        let context = self.context.clone();
        let task = tokio::spawn(async move {
            handlers::execute(&context, &operation, &request, unit).await;
        });
        Ok(DispatchHandle { id, task })
    }

    /// Reconcile a declarative batch on the caller's task.
    ///
    /// Returns the aggregate summary and, when either phase failed, the
    /// aggregate error.
    pub async fn process_declarative(&self, request: &DeclarativeRequest) -> (String, Option<Error>) {
        match self.reconciler.reconcile(request).await {
            Ok(summary) => (summary, None),
            Err(Error::AggregateReconcile { summary }) => {
                let err = Error::aggregate(summary.clone());
                (summary, Some(err))
            }
            Err(other) => (other.to_string(), Some(other)),
        }
    }
}
