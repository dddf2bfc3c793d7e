//! Cluster mutation client
//!
//! Every cluster write the adapter performs goes through [`ClusterClient`]:
//! manifest apply/delete, chart install/uninstall, and namespace mesh
//! membership. The production implementation uses server-side apply so each
//! call is safe to repeat; concurrent requests against the same namespace
//! converge instead of conflicting.
//!
//! Charts are rendered with `helm template` and applied like any other
//! manifest, so no Helm release state lives in the cluster.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::{Discovery, Scope};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::{debug, info, instrument, trace, warn};

use crate::manifest::{self, ResourceDocument};
use crate::{Error, FIELD_MANAGER};

/// Location of a packaged chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartLocation {
    /// Helm repository URL
    pub repository: String,
    /// Chart name within the repository
    pub chart: String,
    /// Chart version ("" = latest)
    pub version: String,
}

/// Install or uninstall a chart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartAction {
    /// Render and apply
    Install,
    /// Render and delete
    Uninstall,
}

impl ChartAction {
    /// Map a request's delete flag to a chart action
    pub fn from_delete(delete: bool) -> Self {
        if delete {
            Self::Uninstall
        } else {
            Self::Install
        }
    }
}

/// Labels and annotations that enroll a namespace in the mesh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshMembership {
    /// Namespace labels (e.g. `openservicemesh.io/monitored-by: osm`)
    pub labels: BTreeMap<String, String>,
    /// Namespace annotations (e.g. `openservicemesh.io/sidecar-injection: enabled`)
    pub annotations: BTreeMap<String, String>,
}

impl MeshMembership {
    /// Merge patch that adds (`enabled`) or removes the membership keys.
    ///
    /// Removal sets each key to `null`, which a JSON merge patch treats as
    /// delete; both directions are idempotent.
    pub fn merge_patch(&self, enabled: bool) -> serde_json::Value {
        let render = |entries: &BTreeMap<String, String>| -> serde_json::Map<String, serde_json::Value> {
            entries
                .iter()
                .map(|(k, v)| {
                    let value = if enabled {
                        serde_json::Value::String(v.clone())
                    } else {
                        serde_json::Value::Null
                    };
                    (k.clone(), value)
                })
                .collect()
        };
        serde_json::json!({
            "metadata": {
                "labels": render(&self.labels),
                "annotations": render(&self.annotations),
            }
        })
    }
}

/// Cluster mutation operations used by the dispatcher and reconciler
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Apply (or delete, when `delete` is set) every resource in a manifest.
    ///
    /// Namespaced resources without `metadata.namespace` land in `namespace`
    /// (or `default` when `namespace` is empty).
    async fn apply_manifest(&self, manifest: &str, namespace: &str, delete: bool)
        -> Result<(), Error>;

    /// Render a packaged chart and install or uninstall it in `namespace`
    async fn apply_chart(
        &self,
        chart: &ChartLocation,
        namespace: &str,
        action: ChartAction,
        create_namespace: bool,
    ) -> Result<(), Error>;

    /// Ensure a namespace exists
    async fn ensure_namespace(&self, namespace: &str) -> Result<(), Error>;

    /// Add (`enabled`) or remove mesh membership labels/annotations on a namespace
    async fn set_mesh_membership(
        &self,
        namespace: &str,
        membership: &MeshMembership,
        enabled: bool,
    ) -> Result<(), Error>;
}

/// Production [`ClusterClient`] backed by kube-rs and the `helm` binary
pub struct KubeClusterClient {
    client: Client,
    helm_binary: PathBuf,
}

impl KubeClusterClient {
    /// Connect using `kubeconfigs` merged in order, or the ambient
    /// kubeconfig / in-cluster config when the list is empty
    pub async fn connect(kubeconfigs: &[PathBuf]) -> Result<Self, Error> {
        let client = match load_kubeconfig(kubeconfigs)? {
            None => Client::try_default().await?,
            Some(kubeconfig) => {
                let config =
                    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| Error::config(format!("invalid kubeconfig: {e}")))?;
                Client::try_from(config)?
            }
        };
        Ok(Self::new(client))
    }

    /// Wrap an existing kube client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            helm_binary: PathBuf::from("helm"),
        }
    }

    /// Use a specific helm binary
    pub fn with_helm_binary(mut self, helm: impl Into<PathBuf>) -> Self {
        self.helm_binary = helm.into();
        self
    }

    async fn discover(&self) -> Result<Discovery, Error> {
        Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| Error::internal_with_context("api-discovery", e.to_string()))
    }

    async fn apply_resource(
        &self,
        discovery: &Discovery,
        resource: &ResourceDocument,
        namespace: &str,
    ) -> Result<(), Error> {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let Some((api_resource, caps)) = discovery.resolve_gvk(&gvk) else {
            return Err(Error::apply(format!(
                "unknown resource type {}/{}",
                resource.api_version(),
                resource.kind
            )));
        };

        let mut value = resource.value.clone();
        let api: Api<DynamicObject> = match caps.scope {
            Scope::Cluster => Api::all_with(self.client.clone(), &api_resource),
            Scope::Namespaced => {
                let ns = target_namespace(resource, namespace);
                value["metadata"]["namespace"] = serde_json::Value::String(ns.clone());
                Api::namespaced_with(self.client.clone(), &ns, &api_resource)
            }
        };

        api.patch(
            &resource.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&value),
        )
        .await
        .map_err(|e| {
            Error::apply_in(
                namespace,
                format!("failed to apply {}/{}: {}", resource.kind, resource.name, e),
            )
        })?;

        trace!(kind = %resource.kind, name = %resource.name, "applied resource");
        Ok(())
    }

    async fn delete_resource(
        &self,
        discovery: &Discovery,
        resource: &ResourceDocument,
        namespace: &str,
    ) -> Result<(), Error> {
        let gvk = GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind);
        let Some((api_resource, caps)) = discovery.resolve_gvk(&gvk) else {
            // Type no longer served (CRD already gone): nothing left to delete
            debug!(kind = %resource.kind, name = %resource.name, "type not served, skipping delete");
            return Ok(());
        };

        let api: Api<DynamicObject> = match caps.scope {
            Scope::Cluster => Api::all_with(self.client.clone(), &api_resource),
            Scope::Namespaced => Api::namespaced_with(
                self.client.clone(),
                &target_namespace(resource, namespace),
                &api_resource,
            ),
        };

        match api.delete(&resource.name, &DeleteParams::background()).await {
            Ok(_) => {
                trace!(kind = %resource.kind, name = %resource.name, "deleted resource");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(Error::apply_in(
                namespace,
                format!("failed to delete {}/{}: {}", resource.kind, resource.name, e),
            )),
        }
    }

    async fn render_chart(&self, chart: &ChartLocation, namespace: &str) -> Result<String, Error> {
        let args = helm_template_args(chart, namespace);
        debug!(chart = %chart.chart, version = %chart.version, "rendering chart");

        let output = Command::new(&self.helm_binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::apply(format!("failed to run helm: {e}")))?;

        if !output.status.success() {
            return Err(Error::apply(format!(
                "helm template {} failed: {}",
                chart.chart,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| Error::apply(format!("helm produced invalid UTF-8: {e}")))
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    #[instrument(skip(self, manifest), fields(bytes = manifest.len()))]
    async fn apply_manifest(
        &self,
        manifest: &str,
        namespace: &str,
        delete: bool,
    ) -> Result<(), Error> {
        let mut resources = manifest::parse_resources(manifest)
            .map_err(|e| Error::apply_in(namespace, e.to_string()))?;
        if resources.is_empty() {
            return Ok(());
        }

        if delete {
            manifest::order_for_delete(&mut resources);
            let discovery = self.discover().await?;
            for resource in &resources {
                self.delete_resource(&discovery, resource, namespace).await?;
            }
            return Ok(());
        }

        manifest::order_for_apply(&mut resources);
        let (foundational, rest): (Vec<_>, Vec<_>) = resources
            .iter()
            .partition(|r| r.kind == "Namespace" || r.kind == "CustomResourceDefinition");

        let mut discovery = self.discover().await?;
        for resource in &foundational {
            self.apply_resource(&discovery, resource, namespace).await?;
        }
        // CRDs register new types; refresh before applying their instances
        if foundational.iter().any(|r| r.kind == "CustomResourceDefinition") && !rest.is_empty() {
            discovery = self.discover().await?;
        }
        for resource in &rest {
            self.apply_resource(&discovery, resource, namespace).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(chart = %chart.chart, version = %chart.version))]
    async fn apply_chart(
        &self,
        chart: &ChartLocation,
        namespace: &str,
        action: ChartAction,
        create_namespace: bool,
    ) -> Result<(), Error> {
        let rendered = self.render_chart(chart, namespace).await?;
        match action {
            ChartAction::Install => {
                if create_namespace {
                    self.ensure_namespace(namespace).await?;
                }
                self.apply_manifest(&rendered, namespace, false).await?;
                info!(namespace, "chart installed");
            }
            ChartAction::Uninstall => {
                self.apply_manifest(&rendered, namespace, true).await?;
                info!(namespace, "chart removed");
            }
        }
        Ok(())
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": namespace }
        });
        api.patch(namespace, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&ns))
            .await
            .map_err(|e| Error::apply_in(namespace, format!("failed to ensure namespace: {e}")))?;
        Ok(())
    }

    async fn set_mesh_membership(
        &self,
        namespace: &str,
        membership: &MeshMembership,
        enabled: bool,
    ) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = membership.merge_patch(enabled);
        match api
            .patch(namespace, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                debug!(namespace, enabled, "updated namespace mesh membership");
                Ok(())
            }
            // Nothing to un-enroll
            Err(kube::Error::Api(resp)) if resp.code == 404 && !enabled => {
                warn!(namespace, "namespace not found while removing mesh membership");
                Ok(())
            }
            Err(e) => Err(Error::apply_in(
                namespace,
                format!("failed to update mesh membership: {e}"),
            )),
        }
    }
}

/// Namespace a namespaced resource lands in
fn target_namespace(resource: &ResourceDocument, requested: &str) -> String {
    match (&resource.namespace, requested) {
        (Some(ns), _) => ns.clone(),
        (None, "") => "default".to_string(),
        (None, requested) => requested.to_string(),
    }
}

/// Arguments for `helm template` rendering a remote chart
fn helm_template_args(chart: &ChartLocation, namespace: &str) -> Vec<String> {
    let namespace = if namespace.is_empty() { "default" } else { namespace };
    let mut args = vec![
        "template".to_string(),
        chart.chart.clone(),
        chart.chart.clone(),
        "--repo".to_string(),
        chart.repository.clone(),
        "--namespace".to_string(),
        namespace.to_string(),
        "--include-crds".to_string(),
    ];
    let version = chart.version.trim_start_matches('v');
    if !version.is_empty() {
        args.push("--version".to_string());
        args.push(version.to_string());
    }
    args
}

/// Read and merge kubeconfig files; the first file's current context wins
pub fn load_kubeconfig(paths: &[PathBuf]) -> Result<Option<Kubeconfig>, Error> {
    let mut merged: Option<Kubeconfig> = None;
    for path in paths {
        let next = read_kubeconfig(path)?;
        merged = Some(match merged {
            None => next,
            Some(current) => current.merge(next).map_err(|e| {
                Error::config(format!("failed to merge kubeconfig {}: {e}", path.display()))
            })?,
        });
    }
    Ok(merged)
}

fn read_kubeconfig(path: &Path) -> Result<Kubeconfig, Error> {
    Kubeconfig::read_from(path)
        .map_err(|e| Error::config(format!("failed to read kubeconfig {}: {e}", path.display())))
}
