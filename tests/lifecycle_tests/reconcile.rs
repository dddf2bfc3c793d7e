//! Declarative reconciliation stories

use std::sync::Arc;

use mesh_adapter::cluster::ChartAction;
use mesh_adapter::dispatcher::{AdapterContext, Dispatcher};
use mesh_adapter::reconciler::DeclarativeRequest;
use mesh_adapter::Error;

use super::{events, osm_registry, FakeCluster, FakeSource, Mutation};

const CONTROL_PLANE: &str = r#"
kind: Component
metadata:
  name: osm
  namespace: osm-system
spec:
  type: OSMMesh
  settings:
    version: v1.2.3
"#;

const INJECTION: &str = r#"
kind: ApplicationConfiguration
metadata:
  name: osm-app
spec:
  components:
  - componentName: osm
    traits:
    - name: automaticSidecarInjection.OSM
      properties:
        namespaces: [bookstore, bookbuyer]
"#;

fn split(name: &str, namespace: &str) -> String {
    format!(
        r#"{{
  "kind": "Component",
  "metadata": {{
    "name": "{name}",
    "namespace": "{namespace}",
    "annotations": {{
      "pattern.meshery.io.mesh.workload.k8sAPIVersion": "split.smi-spec.io/v1alpha2",
      "pattern.meshery.io.mesh.workload.k8sKind": "TrafficSplit"
    }}
  }},
  "spec": {{"type": "TrafficSplit.OSM", "settings": {{"service": "{name}"}}}}
}}"#
    )
}

fn dispatcher(cluster: Arc<FakeCluster>) -> Dispatcher {
    let (sink, _rx) = events();
    let context = AdapterContext::builder(cluster, Arc::new(FakeSource::default()))
        .sink(sink)
        .build();
    Dispatcher::new(context, osm_registry())
}

fn is_component(m: &Mutation) -> bool {
    matches!(m, Mutation::Chart { .. } | Mutation::Manifest { .. })
}

/// Story: installing puts the control plane up before namespaces join it
#[tokio::test]
async fn story_install_orders_components_first() {
    let cluster = Arc::new(FakeCluster::default());
    let (summary, err) = dispatcher(cluster.clone())
        .process_declarative(&DeclarativeRequest {
            components: vec![CONTROL_PLANE.to_string()],
            configuration: INJECTION.to_string(),
            delete: false,
        })
        .await;

    assert!(err.is_none());
    assert_eq!(
        summary,
        "OSM control plane installed in osm-system\n\
         sidecar injection enabled for namespace bookstore\n\
         sidecar injection enabled for namespace bookbuyer"
    );
    let recorded = cluster.recorded();
    assert_eq!(
        recorded[0],
        Mutation::Chart {
            chart: "osm".to_string(),
            version: "v1.2.3".to_string(),
            namespace: "osm-system".to_string(),
            action: ChartAction::Install,
        }
    );
    assert!(recorded[1..].iter().all(|m| !is_component(m)));
}

/// Story: removal unenrolls namespaces before the control plane goes away
#[tokio::test]
async fn story_delete_orders_configuration_first() {
    let cluster = Arc::new(FakeCluster::default());
    let (_, err) = dispatcher(cluster.clone())
        .process_declarative(&DeclarativeRequest {
            components: vec![CONTROL_PLANE.to_string()],
            configuration: INJECTION.to_string(),
            delete: true,
        })
        .await;

    assert!(err.is_none());
    let recorded = cluster.recorded();
    assert_eq!(
        recorded[..2],
        [
            Mutation::Membership {
                namespace: "bookstore".to_string(),
                enabled: false,
            },
            Mutation::Membership {
                namespace: "bookbuyer".to_string(),
                enabled: false,
            },
        ]
    );
    assert!(matches!(
        recorded.last(),
        Some(Mutation::Chart {
            action: ChartAction::Uninstall,
            ..
        })
    ));
}

/// Story: two of four components fail; the other two land, the
/// configuration phase still runs and the caller sees every outcome
#[tokio::test]
async fn story_partial_failure_reports_everything() {
    let cluster = Arc::new(FakeCluster::forbidding(&["locked"]));
    let (summary, err) = dispatcher(cluster.clone())
        .process_declarative(&DeclarativeRequest {
            components: vec![
                split("first", "locked"),
                split("second", "bookstore"),
                split("third", "locked"),
                split("fourth", "bookstore"),
            ],
            configuration: INJECTION.to_string(),
            delete: false,
        })
        .await;

    assert!(matches!(err, Some(Error::AggregateReconcile { .. })));
    let lines: Vec<&str> = summary.lines().collect();
    assert!(lines[0].starts_with("first: apply failed"));
    assert_eq!(lines[1], "TrafficSplit second applied");
    assert!(lines[2].starts_with("third: apply failed"));
    assert_eq!(lines[3], "TrafficSplit fourth applied");
    assert_eq!(lines[4], "sidecar injection enabled for namespace bookstore");

    let applied: Vec<Mutation> = cluster.recorded().into_iter().filter(is_component).collect();
    assert_eq!(applied.len(), 2);
    assert!(cluster.namespace("bookbuyer").is_some());
}

/// Story: garbage in the batch is dropped, not fatal
#[tokio::test]
async fn story_unparseable_documents_are_dropped() {
    let cluster = Arc::new(FakeCluster::default());
    let (summary, err) = dispatcher(cluster.clone())
        .process_declarative(&DeclarativeRequest {
            components: vec!["{not yaml".to_string(), split("only", "bookstore")],
            configuration: "kind: Component\nmetadata: {name: wrong}\nspec: {type: x}\n".to_string(),
            delete: false,
        })
        .await;

    assert!(err.is_none());
    assert_eq!(
        summary,
        "TrafficSplit only applied\nno configuration to reconcile"
    );
    assert_eq!(cluster.recorded().len(), 1);
}
