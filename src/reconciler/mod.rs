//! Declarative reconciliation
//!
//! Turns a batch of OAM components plus one application configuration into
//! cluster mutations. Two phases run on every call:
//!
//! - components: control-plane install/removal and custom resources
//! - configuration: namespace mesh membership from traits
//!
//! On install components go first so the control plane exists before
//! namespaces join it; on delete the order flips. A failing phase does not
//! stop the other one, and the caller always gets both phase summaries.

pub mod oam;

pub use oam::{ApplicationConfiguration, Component};

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::cluster::{ChartAction, ClusterClient};
use crate::registry::{MeshProfile, SharedRegistry};
use crate::Error;

/// Outcome of parsing one declarative item
#[derive(Debug)]
pub enum Parsed<T> {
    /// Parsed cleanly
    Ok(T),
    /// Parsing failed; the caller decides how to recover
    Recovered(Error),
}

impl<T> Parsed<T> {
    /// Wrap a parse result
    pub fn from_result(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(e) => Self::Recovered(e),
        }
    }

    /// Keep the value, or log and drop the item
    pub fn or_drop(self, what: &str) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Recovered(e) => {
                warn!(item = what, error = %e, "dropping unparseable item");
                None
            }
        }
    }
}

impl<T: Default> Parsed<T> {
    /// Keep the value, or log and fall back to the default
    pub fn or_empty(self, what: &str) -> T {
        match self {
            Self::Ok(value) => value,
            Self::Recovered(e) => {
                warn!(item = what, error = %e, "using empty value for unparseable item");
                T::default()
            }
        }
    }
}

/// A batch of declarative documents
#[derive(Debug, Clone, Default)]
pub struct DeclarativeRequest {
    /// Raw component documents (YAML or JSON), one per entry
    pub components: Vec<String>,
    /// Raw application configuration document
    pub configuration: String,
    /// Remove instead of apply
    pub delete: bool,
}

/// Summary and error of one phase
struct PhaseReport {
    message: String,
    error: Option<Error>,
}

impl PhaseReport {
    fn from_lines(lines: Vec<String>, errors: Vec<Error>, empty: &str) -> Self {
        let message = if lines.is_empty() {
            empty.to_string()
        } else {
            lines.join("\n")
        };
        Self {
            message,
            error: errors.into_iter().next(),
        }
    }
}

/// Reconciles declarative batches against the cluster
pub struct Reconciler {
    cluster: Arc<dyn ClusterClient>,
    profile: MeshProfile,
    registry: SharedRegistry,
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(cluster: Arc<dyn ClusterClient>, profile: MeshProfile, registry: SharedRegistry) -> Self {
        Self {
            cluster,
            profile,
            registry,
        }
    }

    /// Reconcile a batch.
    ///
    /// Returns the component summary and configuration summary joined by a
    /// newline. When either phase fails the same text comes back inside
    /// [`Error::AggregateReconcile`].
    #[instrument(skip(self, request), fields(components = request.components.len(), delete = request.delete))]
    pub async fn reconcile(&self, request: &DeclarativeRequest) -> Result<String, Error> {
        let components: Vec<Component> = request
            .components
            .iter()
            .enumerate()
            .filter_map(|(i, raw)| {
                Parsed::from_result(oam::parse_component(raw)).or_drop(&format!("component #{}", i + 1))
            })
            .collect();
        let configuration = Parsed::from_result(oam::parse_configuration(&request.configuration))
            .or_empty("application configuration");

        let (components_report, config_report) = if request.delete {
            let config_report = self.reconcile_configuration(&configuration, true).await;
            let components_report = self.reconcile_components(&components, true).await;
            (components_report, config_report)
        } else {
            let components_report = self.reconcile_components(&components, false).await;
            let config_report = self.reconcile_configuration(&configuration, false).await;
            (components_report, config_report)
        };

        let summary = format!("{}\n{}", components_report.message, config_report.message);
        match (components_report.error, config_report.error) {
            (None, None) => {
                info!("declarative reconciliation finished");
                Ok(summary)
            }
            (component_err, config_err) => {
                if let Some(e) = &component_err {
                    warn!(error = %e, "component phase failed");
                }
                if let Some(e) = &config_err {
                    warn!(error = %e, "configuration phase failed");
                }
                Err(Error::aggregate(summary))
            }
        }
    }

    async fn reconcile_components(&self, components: &[Component], delete: bool) -> PhaseReport {
        let mut lines = Vec::new();
        let mut errors = Vec::new();

        for component in components {
            match self.reconcile_component(component, delete).await {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => {}
                Err(e) => {
                    lines.push(format!("{}: {e}", component.name));
                    errors.push(e);
                }
            }
        }
        PhaseReport::from_lines(lines, errors, "no components to reconcile")
    }

    async fn reconcile_component(
        &self,
        component: &Component,
        delete: bool,
    ) -> Result<Option<String>, Error> {
        if component.type_name == self.profile.control_plane_component {
            let version = self.control_plane_version(component);
            let namespace = self.profile.control_plane_namespace(&component.namespace);
            self.cluster
                .apply_chart(
                    &self.profile.chart(&version),
                    namespace,
                    ChartAction::from_delete(delete),
                    true,
                )
                .await?;
            let verb = if delete { "removed" } else { "installed" };
            return Ok(Some(format!(
                "{} control plane {verb} in {namespace}",
                self.profile.name
            )));
        }

        let Some(resource) = component.to_resource() else {
            debug!(component = %component.name, kind = %component.type_name, "component has no workload type");
            return Ok(Some(format!(
                "{}: skipped, no workload type annotations",
                component.name
            )));
        };
        let body = serde_json::to_string(&resource)
            .map_err(|e| Error::internal_with_context("reconciler", e.to_string()))?;
        self.cluster
            .apply_manifest(&body, &component.namespace, delete)
            .await?;

        let verb = if delete { "deleted" } else { "applied" };
        Ok(Some(format!(
            "{} {} {verb}",
            resource["kind"].as_str().unwrap_or(&component.type_name),
            component.name
        )))
    }

    fn control_plane_version(&self, component: &Component) -> String {
        if let Some(version) = component.settings_version() {
            return version.to_string();
        }
        if !component.version.is_empty() {
            return component.version.clone();
        }
        let registry = self.registry.snapshot();
        registry
            .get(&self.profile.install_operation)
            .ok()
            .and_then(|op| op.latest_version())
            .unwrap_or_default()
            .to_string()
    }

    async fn reconcile_configuration(
        &self,
        configuration: &ApplicationConfiguration,
        delete: bool,
    ) -> PhaseReport {
        let mut lines = Vec::new();
        let mut errors = Vec::new();

        for t in configuration.traits() {
            if t.name != self.profile.injection_trait {
                debug!(name = %t.name, "ignoring unsupported trait");
                continue;
            }
            for namespace in t.namespaces() {
                let result = self
                    .cluster
                    .set_mesh_membership(&namespace, &self.profile.membership, !delete)
                    .await;
                match result {
                    Ok(()) => {
                        let state = if delete { "disabled" } else { "enabled" };
                        lines.push(format!("sidecar injection {state} for namespace {namespace}"));
                    }
                    Err(e) => {
                        lines.push(format!("namespace {namespace}: {e}"));
                        errors.push(e);
                    }
                }
            }
        }
        PhaseReport::from_lines(lines, errors, "no configuration to reconcile")
    }
}
