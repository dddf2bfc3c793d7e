//! Operation registry
//!
//! The registry is the catalog of lifecycle operations this adapter accepts.
//! It is built once from a base table shared by every mesh adapter plus the
//! mesh-specific entries of a [`MeshProfile`], and is never edited afterwards:
//! a rebuild produces a new [`OperationRegistry`] that [`SharedRegistry`]
//! swaps in whole.

mod mesh;
mod releases;

pub use mesh::{MeshProfile, OSM_BOOKSTORE, OSM_INSTALL, TRAIT_TYPE};
pub use releases::{newest_versions, GitHubReleaseLister, ReleaseLister};

#[cfg(test)]
pub use releases::MockReleaseLister;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::Error;

/// Property naming the application an operation deploys
pub const SERVICE_NAME: &str = "service_name";

/// Custom manifest operation
pub const CUSTOM_OPERATION: &str = "custom";

/// SMI conformance test operation
pub const SMI_CONFORMANCE: &str = "smi_conformance";

/// What an operation does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationCategory {
    /// Mesh control plane install (honors the delete flag)
    Install,
    /// Mesh control plane removal
    Uninstall,
    /// Sample application deploy
    SampleApp,
    /// Caller-supplied manifest
    Custom,
    /// Conformance test suite
    ConformanceTest,
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
            Self::SampleApp => "sample-app",
            Self::Custom => "custom",
            Self::ConformanceTest => "conformance-test",
        };
        f.write_str(s)
    }
}

/// A named lifecycle operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Normalized (trimmed, lowercase) name
    pub name: String,
    /// What the operation does
    pub category: OperationCategory,
    /// Human-readable description
    pub description: String,
    /// Supported versions, newest first
    pub versions: Vec<String>,
    /// Manifest locations, applied in order
    pub templates: Vec<String>,
    /// Free-form properties (e.g. `service_name`)
    pub properties: BTreeMap<String, String>,
    /// Namespaces a sample application spans (empty = request namespace)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

impl Operation {
    /// Create an operation with no versions, templates or properties
    pub fn new(
        name: impl AsRef<str>,
        category: OperationCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: normalize_name(name.as_ref()),
            category,
            description: description.into(),
            versions: Vec::new(),
            templates: Vec::new(),
            properties: BTreeMap::new(),
            namespaces: Vec::new(),
        }
    }

    /// Set manifest templates
    pub fn with_templates(mut self, templates: Vec<String>) -> Self {
        self.templates = templates;
        self
    }

    /// Set versions (newest first)
    pub fn with_versions(mut self, versions: Vec<String>) -> Self {
        self.versions = versions;
        self
    }

    /// Add a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set participant namespaces
    pub fn with_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Newest supported version, if any
    pub fn latest_version(&self) -> Option<&str> {
        self.versions.first().map(String::as_str)
    }
}

/// Trim and lowercase an operation name
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Immutable operation catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationRegistry {
    operations: BTreeMap<String, Operation>,
}

impl OperationRegistry {
    /// Build from entries; later entries override earlier ones of the same name
    pub fn from_operations(operations: impl IntoIterator<Item = Operation>) -> Self {
        let operations = operations
            .into_iter()
            .map(|op| (op.name.clone(), op))
            .collect();
        Self { operations }
    }

    /// Resolve an operation by (un-normalized) name
    pub fn get(&self, name: &str) -> Result<&Operation, Error> {
        self.operations
            .get(&normalize_name(name))
            .ok_or_else(|| Error::op_invalid(name))
    }

    /// All operations, ordered by name
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Operations every mesh adapter offers
pub fn base_operations() -> Vec<Operation> {
    vec![
        Operation::new(CUSTOM_OPERATION, OperationCategory::Custom, "Custom YAML"),
        Operation::new(
            SMI_CONFORMANCE,
            OperationCategory::ConformanceTest,
            "Validate SMI conformance",
        )
        .with_property(SERVICE_NAME, "smi-conformance"),
        Operation::new(
            "bookinfo_app",
            OperationCategory::SampleApp,
            "Istio Book Info Application",
        )
        .with_templates(vec![
            "https://raw.githubusercontent.com/istio/istio/master/samples/bookinfo/platform/kube/bookinfo.yaml"
                .to_string(),
        ])
        .with_property(SERVICE_NAME, "productpage"),
        Operation::new("httpbin_app", OperationCategory::SampleApp, "HTTPbin Application")
            .with_templates(vec![
                "https://raw.githubusercontent.com/istio/istio/master/samples/httpbin/httpbin.yaml"
                    .to_string(),
            ])
            .with_property(SERVICE_NAME, "httpbin"),
        Operation::new("imagehub_app", OperationCategory::SampleApp, "Image Hub Application")
            .with_templates(vec![
                "https://raw.githubusercontent.com/layer5io/image-hub/master/deployment.yaml"
                    .to_string(),
            ])
            .with_property(SERVICE_NAME, "ingess"),
        Operation::new(
            "emojivoto_app",
            OperationCategory::SampleApp,
            "Emojivoto Application",
        )
        .with_templates(vec!["https://run.linkerd.io/emojivoto.yml".to_string()])
        .with_property(SERVICE_NAME, "web-svc"),
    ]
}

/// Mesh-specific operations with the given control-plane versions
pub fn mesh_operations(profile: &MeshProfile, versions: Vec<String>) -> Vec<Operation> {
    vec![
        Operation::new(
            &profile.install_operation,
            OperationCategory::Install,
            format!("{} Service Mesh", profile.name),
        )
        .with_versions(versions)
        .with_property(SERVICE_NAME, profile.install_operation.as_str()),
        Operation::new(
            &profile.sample_operation,
            OperationCategory::SampleApp,
            format!("{} Bookstore Application", profile.name),
        )
        .with_templates(profile.sample_templates.clone())
        .with_namespaces(profile.sample_namespaces.clone())
        .with_property(SERVICE_NAME, "bookstore"),
    ]
}

/// Builds registry snapshots
pub struct RegistryBuilder {
    profile: MeshProfile,
    releases: Arc<dyn ReleaseLister>,
    release_count: usize,
}

impl RegistryBuilder {
    /// Create a builder for a mesh
    pub fn new(profile: MeshProfile, releases: Arc<dyn ReleaseLister>) -> Self {
        Self {
            profile,
            releases,
            release_count: 3,
        }
    }

    /// How many upstream releases to offer
    pub fn with_release_count(mut self, count: usize) -> Self {
        self.release_count = count;
        self
    }

    /// Build a snapshot.
    ///
    /// Never fails: when releases cannot be listed the install operation is
    /// registered with no versions.
    pub async fn build(&self) -> OperationRegistry {
        let versions = match self
            .releases
            .latest_releases(
                &self.profile.release_owner,
                &self.profile.release_repo,
                self.release_count,
            )
            .await
        {
            Ok(versions) => versions,
            Err(e) => {
                warn!(
                    project = %format!("{}/{}", self.profile.release_owner, self.profile.release_repo),
                    error = %e,
                    "failed to list releases, registering without versions"
                );
                Vec::new()
            }
        };

        let registry = OperationRegistry::from_operations(
            base_operations()
                .into_iter()
                .chain(mesh_operations(&self.profile, versions)),
        );
        info!(operations = registry.len(), "operation registry built");
        registry
    }
}

/// Atomically replaceable registry handle
#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<ArcSwap<OperationRegistry>>,
}

impl SharedRegistry {
    /// Publish an initial snapshot
    pub fn new(registry: OperationRegistry) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(registry)),
        }
    }

    /// Current snapshot; stays valid even if replaced meanwhile
    pub fn snapshot(&self) -> Arc<OperationRegistry> {
        self.inner.load_full()
    }

    /// Replace the whole table
    pub fn replace(&self, registry: OperationRegistry) {
        self.inner.store(Arc::new(registry));
    }
}
