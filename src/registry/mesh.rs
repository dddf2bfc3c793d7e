//! Mesh-specific settings
//!
//! Everything that ties the adapter to Open Service Mesh lives in
//! [`MeshProfile`]: chart coordinates, upstream project, sample application,
//! namespace membership keys and the declarative type names.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::cluster::{ChartLocation, MeshMembership};
use crate::generator::CrdFilter;

/// Operation name for the mesh control plane
pub const OSM_INSTALL: &str = "osm_install";

/// Operation name for the bookstore sample application
pub const OSM_BOOKSTORE: &str = "bookstore_app";

/// `@type` recorded in every trait definition
pub const TRAIT_TYPE: &str = "pattern.meshery.io/mesh/trait";

const OSM_DOCS: &str = "https://raw.githubusercontent.com/openservicemesh/osm-docs/main/manifests/apps";

/// Mesh-specific configuration
#[derive(Debug, Clone)]
pub struct MeshProfile {
    /// Display name recorded in generated definitions
    pub name: String,
    /// GitHub owner of the upstream project
    pub release_owner: String,
    /// GitHub repository of the upstream project
    pub release_repo: String,
    /// Helm repository serving the mesh chart
    pub chart_repository: String,
    /// Chart name within the repository
    pub chart_name: String,
    /// Namespace the control plane is installed into when the request has none
    pub control_plane_namespace: String,
    /// Labels/annotations that enroll a namespace
    pub membership: MeshMembership,
    /// Install operation name
    pub install_operation: String,
    /// Sample application operation name
    pub sample_operation: String,
    /// Sample application manifests, applied in order
    pub sample_templates: Vec<String>,
    /// Namespaces the sample application spans
    pub sample_namespaces: Vec<String>,
    /// Declarative component type that installs the control plane
    pub control_plane_component: String,
    /// Declarative trait that toggles namespace membership
    pub injection_trait: String,
    /// CRD discovery paths for component generation
    pub crd_filter: CrdFilter,
}

impl MeshProfile {
    /// Open Service Mesh
    pub fn osm() -> Self {
        Self {
            name: "OSM".to_string(),
            release_owner: "openservicemesh".to_string(),
            release_repo: "osm".to_string(),
            chart_repository: "https://openservicemesh.github.io/osm/".to_string(),
            chart_name: "osm".to_string(),
            control_plane_namespace: "osm-system".to_string(),
            membership: MeshMembership {
                labels: BTreeMap::from([(
                    "openservicemesh.io/monitored-by".to_string(),
                    "osm".to_string(),
                )]),
                annotations: BTreeMap::from([(
                    "openservicemesh.io/sidecar-injection".to_string(),
                    "enabled".to_string(),
                )]),
            },
            install_operation: OSM_INSTALL.to_string(),
            sample_operation: OSM_BOOKSTORE.to_string(),
            sample_templates: ["bookbuyer", "bookthief", "bookstore", "bookwarehouse"]
                .iter()
                .map(|app| format!("{OSM_DOCS}/{app}.yaml"))
                .collect(),
            sample_namespaces: ["bookstore", "bookbuyer", "bookthief", "bookwarehouse"]
                .iter()
                .map(|ns| ns.to_string())
                .collect(),
            control_plane_component: "OSMMesh".to_string(),
            injection_trait: "automaticSidecarInjection.OSM".to_string(),
            crd_filter: CrdFilter::default(),
        }
    }

    /// Chart location pinned to `version`
    pub fn chart(&self, version: &str) -> ChartLocation {
        ChartLocation {
            repository: self.chart_repository.clone(),
            chart: self.chart_name.clone(),
            version: version.to_string(),
        }
    }

    /// `index.yaml` of the chart repository
    pub fn chart_index_url(&self) -> String {
        format!("{}/index.yaml", self.chart_repository.trim_end_matches('/'))
    }

    /// Trait definition and property schema for the namespace injection trait
    pub fn injection_trait_definition(&self) -> (Value, Value) {
        let definition = json!({
            "apiVersion": "core.oam.dev/v1alpha1",
            "kind": "TraitDefinition",
            "metadata": { "name": self.injection_trait },
            "spec": {
                "appliesToWorkloads": [self.control_plane_component],
                "definitionRef": { "name": self.injection_trait.to_lowercase() },
                "metadata": {
                    "@type": TRAIT_TYPE,
                    "meshName": self.name,
                }
            }
        });
        let schema = json!({
            "title": self.injection_trait,
            "type": "object",
            "properties": {
                "namespaces": {
                    "description": "Namespaces whose pods get the mesh sidecar",
                    "type": "array",
                    "items": { "type": "string" }
                }
            },
            "required": ["namespaces"]
        });
        (definition, schema)
    }

    /// Namespace for control-plane operations
    pub fn control_plane_namespace<'a>(&'a self, requested: &'a str) -> &'a str {
        if requested.trim().is_empty() {
            &self.control_plane_namespace
        } else {
            requested
        }
    }
}

impl Default for MeshProfile {
    fn default() -> Self {
        Self::osm()
    }
}
