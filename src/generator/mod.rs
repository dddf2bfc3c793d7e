//! Component generation
//!
//! Derives installable component definitions from the CRDs in an upstream
//! manifest or chart. Each discovered kind produces two files under
//! `<base>/<mesh-version>/`:
//!
//! - `<Kind>_definition.json` - an OAM `WorkloadDefinition`
//! - `<Kind>.schema.json` - the JSON schema of the kind's `spec`
//!
//! An existing target directory is left untouched unless the request is
//! forced, in which case it is purged and rewritten.

mod filter;
mod source;

pub use filter::CrdFilter;
pub use source::{DefaultManifestSource, ManifestSource};

#[cfg(test)]
pub use source::MockManifestSource;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::{manifest, Error};

/// `@type` recorded in every generated workload definition
pub const WORKLOAD_TYPE: &str = "pattern.meshery.io/mesh/workload";

/// Suffix of definition files
pub const DEFINITION_SUFFIX: &str = "_definition.json";

/// Suffix of schema files
pub const SCHEMA_SUFFIX: &str = ".schema.json";

/// How the source location is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum GenerationMethod {
    /// Plain (multi-document) manifest
    #[value(name = "manifest")]
    StaticManifest,
    /// Helm chart rendered with its CRDs
    #[value(name = "helm")]
    HelmChart,
}

/// One generation run
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Manifest URL/path or chart reference
    pub source_url: String,
    /// How to read `source_url`
    pub method: GenerationMethod,
    /// CRD selection and extraction
    pub filter: CrdFilter,
    /// Mesh version recorded in definitions
    pub version: String,
    /// Directory name under `base_path` (normally the version)
    pub dir_name: String,
    /// Components root
    pub base_path: PathBuf,
    /// Purge and regenerate an existing directory
    pub force: bool,
    /// Mesh name recorded in definitions (e.g. "OSM")
    pub mesh_name: String,
}

impl GenerationRequest {
    /// Directory this request writes into
    pub fn target_dir(&self) -> PathBuf {
        self.base_path.join(&self.dir_name)
    }
}

/// Result of a generation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Target existed and the request was not forced
    Skipped {
        /// The untouched directory
        dir: PathBuf,
    },
    /// Target was (re)written
    Generated {
        /// The written directory
        dir: PathBuf,
        /// Kinds written, in discovery order
        kinds: Vec<String>,
    },
}

impl GenerationOutcome {
    /// Kinds written by this run (empty when skipped)
    pub fn kinds(&self) -> &[String] {
        match self {
            Self::Skipped { .. } => &[],
            Self::Generated { kinds, .. } => kinds,
        }
    }
}

/// A discovered component: identity plus spec schema
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDefinition {
    /// Resource kind
    pub kind: String,
    /// API group
    pub group: String,
    /// API version
    pub version: String,
    /// JSON schema of the resource spec
    pub schema: Value,
}

impl ComponentDefinition {
    /// `<lowercase kind>.<group>`
    pub fn definition_name(&self) -> String {
        if self.group.is_empty() {
            self.kind.to_lowercase()
        } else {
            format!("{}.{}", self.kind.to_lowercase(), self.group)
        }
    }

    /// `<group>/<version>`, or just the version for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// OAM workload definition document for this component
    pub fn workload_definition(&self, mesh_name: &str, mesh_version: &str) -> Value {
        let name = self.definition_name();
        json!({
            "apiVersion": "core.oam.dev/v1alpha1",
            "kind": "WorkloadDefinition",
            "metadata": { "name": name },
            "spec": {
                "definitionRef": { "name": name },
                "metadata": {
                    "@type": WORKLOAD_TYPE,
                    "meshName": mesh_name,
                    "meshVersion": mesh_version,
                    "k8sAPIVersion": self.api_version(),
                    "k8sKind": self.kind,
                }
            }
        })
    }

    /// Spec schema with a title, as written to `<Kind>.schema.json`
    pub fn titled_schema(&self) -> Value {
        let mut schema = self.schema.clone();
        if let Value::Object(map) = &mut schema {
            map.entry("title")
                .or_insert_with(|| Value::String(self.kind.clone()));
        }
        schema
    }
}

/// Discover components in parsed documents, first occurrence of a kind wins
pub fn discover_components(documents: &[Value], filter: &CrdFilter) -> Vec<ComponentDefinition> {
    let mut components: Vec<ComponentDefinition> = Vec::new();
    for doc in filter.select(documents) {
        let Some(component) = filter.extract(doc) else {
            debug!("candidate document has no kind, skipping");
            continue;
        };
        if !is_plain_kind(&component.kind) {
            warn!(kind = %component.kind, "kind is not a plain identifier, skipping");
            continue;
        }
        if components.iter().any(|c| c.kind == component.kind) {
            debug!(kind = %component.kind, "duplicate kind, keeping first");
            continue;
        }
        components.push(component);
    }
    components
}

/// Kinds become file names, so only ASCII alphanumerics are accepted
fn is_plain_kind(kind: &str) -> bool {
    !kind.is_empty() && kind.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Generates component files from manifest/chart sources
pub struct Generator {
    source: Arc<dyn ManifestSource>,
}

impl Generator {
    /// Create a generator reading through `source`
    pub fn new(source: Arc<dyn ManifestSource>) -> Self {
        Self { source }
    }

    /// Run one generation request.
    ///
    /// The source is fetched before anything on disk changes, so a fetch or
    /// parse failure leaves an existing directory intact. Write failures
    /// part-way through are not rolled back.
    #[instrument(skip(self, request), fields(source = %request.source_url, version = %request.version))]
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutcome, Error> {
        let dir = request.target_dir();
        let exists = tokio::fs::try_exists(&dir)
            .await
            .map_err(|e| write_error(&dir, e))?;
        if exists && !request.force {
            info!(dir = %dir.display(), "components already present, skipping");
            return Ok(GenerationOutcome::Skipped { dir });
        }

        let raw = match request.method {
            GenerationMethod::StaticManifest => self.source.fetch(&request.source_url).await?,
            GenerationMethod::HelmChart => self.source.render_chart(&request.source_url).await?,
        };
        let documents = manifest::parse_documents(&raw)
            .map_err(|e| Error::generation(&request.source_url, e.to_string()))?;
        let components = discover_components(&documents, &request.filter);

        if exists {
            debug!(dir = %dir.display(), "purging existing components");
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| write_error(&dir, e))?;
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| write_error(&dir, e))?;

        let mut kinds = Vec::with_capacity(components.len());
        for component in &components {
            write_component(&dir, component, &request.mesh_name, &request.version).await?;
            kinds.push(component.kind.clone());
        }

        info!(dir = %dir.display(), count = kinds.len(), "components generated");
        Ok(GenerationOutcome::Generated { dir, kinds })
    }
}

async fn write_component(
    dir: &Path,
    component: &ComponentDefinition,
    mesh_name: &str,
    mesh_version: &str,
) -> Result<(), Error> {
    let definition = component.workload_definition(mesh_name, mesh_version);
    write_json(&dir.join(format!("{}{DEFINITION_SUFFIX}", component.kind)), &definition).await?;
    write_json(&dir.join(format!("{}{SCHEMA_SUFFIX}", component.kind)), &component.titled_schema())
        .await
}

async fn write_json(path: &Path, value: &Value) -> Result<(), Error> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::generation(path.display().to_string(), e.to_string()))?;
    tokio::fs::write(path, body)
        .await
        .map_err(|e| write_error(path, e))
}

fn write_error(path: &Path, e: std::io::Error) -> Error {
    Error::generation(path.display().to_string(), e.to_string())
}

/// Generated definition/schema pairs in a components directory, sorted by kind
pub async fn read_generated(dir: &Path) -> Result<Vec<(String, Value, Value)>, Error> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| write_error(dir, e))?;
    let mut kinds = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| write_error(dir, e))? {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(kind) = name.strip_suffix(DEFINITION_SUFFIX) {
            kinds.push(kind.to_string());
        }
    }
    kinds.sort();

    let mut pairs = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let definition = read_json(&dir.join(format!("{kind}{DEFINITION_SUFFIX}"))).await?;
        let schema_path = dir.join(format!("{kind}{SCHEMA_SUFFIX}"));
        let schema = if tokio::fs::try_exists(&schema_path).await.unwrap_or(false) {
            read_json(&schema_path).await?
        } else {
            json!({})
        };
        pairs.push((kind, definition, schema));
    }
    Ok(pairs)
}

async fn read_json(path: &Path) -> Result<Value, Error> {
    let bytes = tokio::fs::read(path).await.map_err(|e| write_error(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::generation(path.display().to_string(), e.to_string()))
}
