//! Multi-document manifest handling
//!
//! Mesh templates, sample applications and chart renders all arrive as
//! multi-document YAML. This module splits them into individual documents,
//! extracts the identity of each resource, and orders them for apply.

use serde::Deserialize;
use serde_json::Value;

use crate::Error;

/// Parse a multi-document YAML (or single JSON) string into JSON values.
///
/// Empty documents (`---` separators, comment-only blocks) are dropped.
pub fn parse_documents(input: &str) -> Result<Vec<Value>, Error> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| Error::parse("manifest", format!("invalid JSON: {e}")))?;
        return Ok(match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        });
    }

    let mut documents = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(input) {
        let value = Value::deserialize(doc)
            .map_err(|e| Error::parse("manifest", format!("invalid YAML: {e}")))?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// Identity of one Kubernetes resource document
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDocument {
    /// API group ("" for core)
    pub group: String,
    /// API version
    pub version: String,
    /// Resource kind
    pub kind: String,
    /// metadata.name
    pub name: String,
    /// metadata.namespace (if set in the document)
    pub namespace: Option<String>,
    /// The full document
    pub value: Value,
}

impl ResourceDocument {
    /// Extract identity fields from a parsed document
    pub fn from_value(value: Value) -> Result<Self, Error> {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::parse("manifest", "missing apiVersion"))?;
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::parse("manifest", "missing kind"))?
            .to_string();
        let name = value
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::parse("manifest", format!("{kind} missing metadata.name")))?
            .to_string();
        let namespace = value
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
        let (group, version) = parse_api_version(api_version);

        Ok(Self {
            group,
            version,
            kind,
            name,
            namespace,
            value,
        })
    }

    /// `group/version` or `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// Parse and identify every resource in a multi-document manifest.
///
/// Fails on the first malformed document: a partially understood template
/// must not be half-applied.
pub fn parse_resources(input: &str) -> Result<Vec<ResourceDocument>, Error> {
    parse_documents(input)?
        .into_iter()
        .flat_map(|doc| match doc {
            // `kind: List` wrappers are flattened
            Value::Object(ref map) if map.get("kind").and_then(Value::as_str) == Some("List") => {
                map.get("items")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
            }
            other => vec![other],
        })
        .map(ResourceDocument::from_value)
        .collect()
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use mesh_adapter::manifest::parse_api_version;
///
/// assert_eq!(parse_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Apply priority for a resource kind (lower = apply first)
///
/// Removal runs in the reverse order so workloads go before the CRDs and
/// namespaces they live in.
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "Service" => 6,
        "Deployment" | "DaemonSet" | "StatefulSet" | "Job" => 7,
        "MutatingWebhookConfiguration" | "ValidatingWebhookConfiguration" => 8,
        _ => 9,
    }
}

/// Sort resources for apply (stable: equal kinds keep template order)
pub fn order_for_apply(resources: &mut [ResourceDocument]) {
    resources.sort_by_key(|r| kind_priority(&r.kind));
}

/// Sort resources for removal (reverse apply priority, stable)
pub fn order_for_delete(resources: &mut [ResourceDocument]) {
    resources.sort_by_key(|r| std::cmp::Reverse(kind_priority(&r.kind)));
}

/// Namespace manifest used when a namespace must exist before templates land
pub fn namespace_document(name: &str) -> String {
    format!("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {name}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOKSTORE: &str = r#"
# bookstore service
apiVersion: v1
kind: Service
metadata:
  name: bookstore
  namespace: bookstore
spec:
  ports:
  - port: 14001
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: bookstore
  namespace: bookstore
---
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: bookstore
"#;

    #[test]
    fn splits_multi_document_yaml_and_drops_empty_docs() {
        let docs = parse_documents(BOOKSTORE).expect("bookstore manifest parses");
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0]["kind"], "Service");
        assert_eq!(docs[2]["kind"], "ServiceAccount");
    }

    #[test]
    fn parses_json_documents_and_arrays() {
        let docs = parse_documents(r#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"a"}}"#)
            .expect("json parses");
        assert_eq!(docs.len(), 1);

        let docs = parse_documents(r#"[{"kind":"A"},{"kind":"B"}]"#).expect("array parses");
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn resources_carry_identity() {
        let resources = parse_resources(BOOKSTORE).expect("resources parse");
        assert_eq!(resources[1].group, "apps");
        assert_eq!(resources[1].version, "v1");
        assert_eq!(resources[1].api_version(), "apps/v1");
        assert_eq!(resources[1].namespace.as_deref(), Some("bookstore"));
        assert_eq!(resources[2].namespace, None);
        assert_eq!(resources[2].api_version(), "v1");
    }

    #[test]
    fn list_wrappers_are_flattened() {
        let list = r#"
apiVersion: v1
kind: List
items:
- apiVersion: v1
  kind: ConfigMap
  metadata:
    name: one
- apiVersion: v1
  kind: ConfigMap
  metadata:
    name: two
"#;
        let resources = parse_resources(list).expect("list parses");
        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[test]
    fn missing_identity_fields_are_rejected() {
        let err = parse_resources("kind: Service\nmetadata:\n  name: x\n").unwrap_err();
        assert!(err.to_string().contains("apiVersion"));

        let err = parse_resources("apiVersion: v1\nkind: Service\n").unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn invalid_yaml_is_a_parse_error() {
        let err = parse_documents("not: valid: yaml: {{").unwrap_err();
        assert!(matches!(err, Error::ParseFailed { .. }));
    }

    #[test]
    fn apply_and_delete_orders_are_mirrored() {
        let mut resources = parse_resources(BOOKSTORE).expect("resources parse");
        resources.insert(
            0,
            ResourceDocument::from_value(
                parse_documents(&namespace_document("bookstore")).expect("ns")[0].clone(),
            )
            .expect("ns identity"),
        );

        order_for_apply(&mut resources);
        let kinds: Vec<_> = resources.iter().map(|r| r.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Namespace", "ServiceAccount", "Service", "Deployment"]);

        order_for_delete(&mut resources);
        let kinds: Vec<_> = resources.iter().map(|r| r.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Deployment", "Service", "ServiceAccount", "Namespace"]);
    }
}
