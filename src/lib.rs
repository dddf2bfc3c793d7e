//! Mesh adapter - service mesh lifecycle manager
//!
//! The adapter installs and manages a service mesh (Open Service Mesh) on a
//! Kubernetes cluster. It derives component definitions from upstream mesh
//! charts, runs lifecycle operations asynchronously while streaming status, and
//! reconciles declarative component batches into ordered cluster mutations.
//!
//! # Architecture
//!
//! Every lifecycle request becomes one spawned task that owns the request until
//! its single terminal event is emitted. The operation catalog is an immutable
//! snapshot that is replaced whole, never edited in place.
//!
//! # Modules
//!
//! - [`generator`] - Component definitions and schemas from manifests/charts
//! - [`registry`] - Catalog of supported lifecycle operations
//! - [`reconciler`] - Declarative (OAM) component/configuration reconciliation
//! - [`dispatcher`] - Asynchronous operation execution with event streaming
//! - [`registrar`] - Periodic capability re-generation and publication
//! - [`cluster`] - Cluster mutation client (server-side apply, chart rendering)
//! - [`events`] - Status vocabulary, events and event sinks
//! - [`manifest`] - Multi-document manifest handling
//! - [`config`] - Adapter configuration
//! - [`telemetry`] - Logging setup
//! - [`retry`] - Backoff for remote calls
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cluster;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod generator;
pub mod manifest;
pub mod reconciler;
pub mod registrar;
pub mod registry;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for all server-side apply calls
pub const FIELD_MANAGER: &str = "mesh-adapter";

/// Default adapter gRPC port advertised to the capability registry
pub const DEFAULT_ADAPTER_PORT: u16 = 10009;

/// Namespace where conformance tooling runs
pub const CONFORMANCE_NAMESPACE: &str = "meshery";
