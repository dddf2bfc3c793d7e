//! CRD selection and field extraction
//!
//! A [`CrdFilter`] is a set of JSON Pointer paths evaluated on each parsed
//! document. Each field holds alternatives tried in order, so one filter
//! covers both `apiextensions.k8s.io/v1` and the older `v1beta1` layout.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::ComponentDefinition;

/// Selection and extraction paths for component discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdFilter {
    /// Documents whose `kind` equals this are candidates
    pub root_kind: String,
    /// Pointer to a nested list of documents to iterate (e.g. `/items`)
    pub iteration_root: Option<String>,
    /// Pointers to the component kind name
    pub kind_paths: Vec<String>,
    /// Pointers to the API version
    pub version_paths: Vec<String>,
    /// Pointers to the API group
    pub group_paths: Vec<String>,
    /// Pointers to the inline spec schema
    pub schema_paths: Vec<String>,
}

impl Default for CrdFilter {
    fn default() -> Self {
        Self {
            root_kind: "CustomResourceDefinition".to_string(),
            iteration_root: Some("/items".to_string()),
            kind_paths: vec!["/spec/names/kind".to_string()],
            version_paths: vec![
                "/spec/versions/0/name".to_string(),
                "/spec/version".to_string(),
            ],
            group_paths: vec!["/spec/group".to_string()],
            schema_paths: vec![
                "/spec/versions/0/schema/openAPIV3Schema/properties/spec".to_string(),
                "/spec/validation/openAPIV3Schema/properties/spec".to_string(),
            ],
        }
    }
}

impl CrdFilter {
    /// Candidate documents: roots matching `root_kind`, including those
    /// nested under the iteration root of wrapper documents
    pub fn select<'a>(&self, documents: &'a [Value]) -> Vec<&'a Value> {
        let mut selected = Vec::new();
        for doc in documents {
            if self.matches_root(doc) {
                selected.push(doc);
                continue;
            }
            let nested = self
                .iteration_root
                .as_deref()
                .and_then(|ptr| doc.pointer(ptr))
                .and_then(Value::as_array);
            if let Some(items) = nested {
                selected.extend(items.iter().filter(|item| self.matches_root(item)));
            }
        }
        selected
    }

    fn matches_root(&self, doc: &Value) -> bool {
        doc.get("kind").and_then(Value::as_str) == Some(self.root_kind.as_str())
    }

    /// Extract a component from one candidate document.
    ///
    /// Returns `None` when no kind path resolves. Missing group/version
    /// resolve to empty strings and a missing schema to an open object.
    pub fn extract(&self, doc: &Value) -> Option<ComponentDefinition> {
        let kind = first_str(doc, &self.kind_paths)?;
        let group = first_str(doc, &self.group_paths).unwrap_or_default();
        let version = first_str(doc, &self.version_paths).unwrap_or_default();
        let schema = self
            .schema_paths
            .iter()
            .find_map(|p| doc.pointer(p))
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "type": "object" }));

        if group.is_empty() || version.is_empty() {
            debug!(kind = %kind, "CRD is missing group or version");
        }
        Some(ComponentDefinition {
            kind,
            group,
            version,
            schema,
        })
    }
}

fn first_str(doc: &Value, paths: &[String]) -> Option<String> {
    paths
        .iter()
        .filter_map(|p| doc.pointer(p))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
