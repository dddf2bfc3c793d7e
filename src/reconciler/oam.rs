//! OAM document types
//!
//! Only the fields the reconciler acts on are modelled; unknown fields are
//! ignored so newer documents still parse.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::{manifest, Error};

/// Annotation carrying the API version of a workload component
pub const K8S_API_VERSION_ANNOTATION: &str = "pattern.meshery.io.mesh.workload.k8sAPIVersion";

/// Annotation carrying the kind of a workload component
pub const K8S_KIND_ANNOTATION: &str = "pattern.meshery.io.mesh.workload.k8sKind";

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ComponentDocument {
    #[serde(default)]
    kind: Option<String>,
    metadata: Metadata,
    spec: ComponentSpec,
}

#[derive(Debug, Deserialize)]
struct ComponentSpec {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    settings: Value,
}

/// A desired workload
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// metadata.name
    pub name: String,
    /// metadata.namespace ("" when unset)
    pub namespace: String,
    /// metadata.labels
    pub labels: BTreeMap<String, String>,
    /// metadata.annotations
    pub annotations: BTreeMap<String, String>,
    /// spec.type
    pub type_name: String,
    /// spec.version
    pub version: String,
    /// spec.settings
    pub settings: Value,
}

impl Component {
    /// `(apiVersion, kind)` of the resource this component renders to
    pub fn workload_type(&self) -> Option<(&str, &str)> {
        let api_version = self.annotations.get(K8S_API_VERSION_ANNOTATION)?;
        let kind = self.annotations.get(K8S_KIND_ANNOTATION)?;
        Some((api_version.as_str(), kind.as_str()))
    }

    /// Render into a custom resource; `None` when the workload annotations are missing
    pub fn to_resource(&self) -> Option<Value> {
        let (api_version, kind) = self.workload_type()?;
        let annotations: BTreeMap<&String, &String> = self
            .annotations
            .iter()
            .filter(|(k, _)| !k.starts_with("pattern.meshery.io"))
            .collect();

        let mut metadata = serde_json::json!({ "name": self.name });
        if !self.namespace.is_empty() {
            metadata["namespace"] = Value::String(self.namespace.clone());
        }
        if !self.labels.is_empty() {
            metadata["labels"] = serde_json::json!(self.labels);
        }
        if !annotations.is_empty() {
            metadata["annotations"] = serde_json::json!(annotations);
        }

        let spec = match &self.settings {
            Value::Null => serde_json::json!({}),
            other => other.clone(),
        };
        Some(serde_json::json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": metadata,
            "spec": spec,
        }))
    }

    /// `settings.version`, when present and non-empty
    pub fn settings_version(&self) -> Option<&str> {
        self.settings
            .get("version")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// A trait attached to a configured component
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Trait {
    /// Trait name (e.g. `automaticSidecarInjection.OSM`)
    pub name: String,
    /// Free-form properties
    #[serde(default)]
    pub properties: Value,
}

impl Trait {
    /// `properties.namespaces` as strings
    pub fn namespaces(&self) -> Vec<String> {
        self.properties
            .get("namespaces")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Per-component configuration entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfiguredComponent {
    /// Name of the configured component
    pub component_name: String,
    /// Attached traits
    #[serde(default)]
    pub traits: Vec<Trait>,
}

#[derive(Debug, Deserialize)]
struct ConfigurationDocument {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    spec: ConfigurationSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigurationSpec {
    #[serde(default)]
    components: Vec<ConfiguredComponent>,
}

/// How components are configured
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicationConfiguration {
    /// metadata.name
    pub name: String,
    /// Configured components
    pub components: Vec<ConfiguredComponent>,
}

impl ApplicationConfiguration {
    /// Every trait across all components, in document order
    pub fn traits(&self) -> impl Iterator<Item = &Trait> {
        self.components.iter().flat_map(|c| c.traits.iter())
    }
}

fn single_document(raw: &str, document: &str) -> Result<Value, Error> {
    let mut docs = manifest::parse_documents(raw).map_err(|e| Error::parse(document, e.to_string()))?;
    match docs.len() {
        0 => Err(Error::parse(document, "empty document")),
        1 => Ok(docs.remove(0)),
        n => Err(Error::parse(document, format!("expected one document, found {n}"))),
    }
}

fn expect_kind(found: Option<&str>, expected: &str, document: &str) -> Result<(), Error> {
    match found {
        Some(kind) if kind != expected => Err(Error::parse(
            document,
            format!("expected kind {expected}, found {kind}"),
        )),
        _ => Ok(()),
    }
}

/// Parse one component document (YAML or JSON)
pub fn parse_component(raw: &str) -> Result<Component, Error> {
    let value = single_document(raw, "component")?;
    let doc: ComponentDocument =
        serde_json::from_value(value).map_err(|e| Error::parse("component", e.to_string()))?;
    expect_kind(doc.kind.as_deref(), "Component", "component")?;
    if doc.metadata.name.is_empty() {
        return Err(Error::parse("component", "missing metadata.name"));
    }

    Ok(Component {
        name: doc.metadata.name,
        namespace: doc.metadata.namespace.unwrap_or_default(),
        labels: doc.metadata.labels,
        annotations: doc.metadata.annotations,
        type_name: doc.spec.type_name,
        version: doc.spec.version,
        settings: doc.spec.settings,
    })
}

/// Parse an application configuration document (YAML or JSON).
///
/// A blank document is an empty configuration.
pub fn parse_configuration(raw: &str) -> Result<ApplicationConfiguration, Error> {
    if raw.trim().is_empty() {
        return Ok(ApplicationConfiguration::default());
    }
    let value = single_document(raw, "application configuration")?;
    let doc: ConfigurationDocument = serde_json::from_value(value)
        .map_err(|e| Error::parse("application configuration", e.to_string()))?;
    expect_kind(
        doc.kind.as_deref(),
        "ApplicationConfiguration",
        "application configuration",
    )?;

    Ok(ApplicationConfiguration {
        name: doc.metadata.name,
        components: doc.spec.components,
    })
}
