//! Component generation stories

use std::path::Path;
use std::sync::Arc;

use mesh_adapter::generator::{
    CrdFilter, GenerationMethod, GenerationOutcome, GenerationRequest, Generator,
};
use mesh_adapter::Error;

use super::FakeSource;

const SOURCE: &str = "https://raw.githubusercontent.com/istio/istio/1.18.0/manifests/charts/base/crds/crd-all.gen.yaml";

const TWO_CRDS: &str = r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: virtualservices.networking.istio.io
spec:
  group: networking.istio.io
  names:
    kind: VirtualService
    plural: virtualservices
  scope: Namespaced
  versions:
  - name: v1beta1
    served: true
    schema:
      openAPIV3Schema:
        properties:
          spec:
            type: object
            properties:
              hosts:
                type: array
                items: {type: string}
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: gateways.networking.istio.io
spec:
  group: networking.istio.io
  names:
    kind: Gateway
    plural: gateways
  scope: Namespaced
  versions:
  - name: v1beta1
    served: true
    schema:
      openAPIV3Schema:
        properties:
          spec:
            type: object
"#;

fn request(base: &Path, force: bool) -> GenerationRequest {
    GenerationRequest {
        source_url: SOURCE.to_string(),
        method: GenerationMethod::StaticManifest,
        filter: CrdFilter::default(),
        version: "1.18.0".to_string(),
        dir_name: "1.18.0".to_string(),
        base_path: base.to_path_buf(),
        force,
        mesh_name: "ISTIO".to_string(),
    }
}

fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = std::fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| {
            let entry = entry.expect("entry");
            (
                entry.file_name().to_string_lossy().to_string(),
                std::fs::read(entry.path()).expect("read file"),
            )
        })
        .collect();
    files.sort();
    files
}

/// Story: an operator generates components from a two-CRD manifest and gets
/// exactly one definition and one schema per kind
#[tokio::test]
async fn story_two_kinds_produce_four_files() {
    let base = tempfile::tempdir().expect("tempdir");
    let generator = Generator::new(Arc::new(FakeSource::default().with(SOURCE, TWO_CRDS)));

    let outcome = generator
        .generate(&request(base.path(), false))
        .await
        .expect("generation succeeds");
    assert!(matches!(outcome, GenerationOutcome::Generated { .. }));

    let names: Vec<String> = snapshot(&base.path().join("1.18.0"))
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(
        names,
        vec![
            "Gateway.schema.json",
            "Gateway_definition.json",
            "VirtualService.schema.json",
            "VirtualService_definition.json",
        ]
    );

    let definition: serde_json::Value = serde_json::from_slice(
        &std::fs::read(base.path().join("1.18.0/VirtualService_definition.json")).expect("read"),
    )
    .expect("definition is JSON");
    assert_eq!(
        definition["spec"]["definitionRef"]["name"],
        "virtualservice.networking.istio.io"
    );
    assert_eq!(definition["spec"]["metadata"]["meshName"], "ISTIO");
}

/// Story: re-running generation without force never touches existing output
#[tokio::test]
async fn story_existing_output_is_byte_identical_without_force() {
    let base = tempfile::tempdir().expect("tempdir");
    let first = Generator::new(Arc::new(FakeSource::default().with(SOURCE, TWO_CRDS)));
    first
        .generate(&request(base.path(), false))
        .await
        .expect("first run");
    let before = snapshot(&base.path().join("1.18.0"));

    // Upstream changed, but the directory exists and force is off
    let source = Arc::new(FakeSource::default().with(SOURCE, "kind: Nothing\n"));
    let second = Generator::new(source.clone());
    let outcome = second
        .generate(&request(base.path(), false))
        .await
        .expect("skip reports success");

    assert!(matches!(outcome, GenerationOutcome::Skipped { .. }));
    assert_eq!(snapshot(&base.path().join("1.18.0")), before);
    assert!(source.fetched.lock().expect("lock").is_empty());
}

/// Story: a forced run rebuilds the directory purely from the current source
#[tokio::test]
async fn story_forced_run_replaces_everything() {
    let base = tempfile::tempdir().expect("tempdir");
    let dir = base.path().join("1.18.0");
    std::fs::create_dir_all(&dir).expect("mkdir");
    std::fs::write(dir.join("DestinationRule_definition.json"), "{}").expect("stale file");
    std::fs::write(dir.join("notes.txt"), "hand edits").expect("stale file");

    let generator = Generator::new(Arc::new(FakeSource::default().with(SOURCE, TWO_CRDS)));
    let outcome = generator
        .generate(&request(base.path(), true))
        .await
        .expect("forced run");

    assert_eq!(outcome.kinds(), ["VirtualService", "Gateway"]);
    let names: Vec<String> = snapshot(&dir).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names.len(), 4);
    assert!(!names.iter().any(|n| n.starts_with("DestinationRule") || n == "notes.txt"));
}

/// Story: an unreachable source surfaces as a generation failure
#[tokio::test]
async fn story_missing_source_is_generation_failure() {
    let base = tempfile::tempdir().expect("tempdir");
    let generator = Generator::new(Arc::new(FakeSource::default()));

    let err = generator
        .generate(&request(base.path(), false))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GenerationFailed { .. }));
    assert!(err.to_string().contains("404"));
    assert!(!base.path().join("1.18.0").exists());
}
