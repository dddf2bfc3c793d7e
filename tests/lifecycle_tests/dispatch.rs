//! Operation dispatch stories

use std::sync::Arc;

use async_trait::async_trait;
use mesh_adapter::cluster::ChartAction;
use mesh_adapter::dispatcher::{
    AdapterContext, ConformanceRequest, ConformanceRunner, Dispatcher, OperationRequest,
};
use mesh_adapter::events::EventKind;
use mesh_adapter::registry::{
    MeshProfile, OperationRegistry, RegistryBuilder, SharedRegistry, OSM_BOOKSTORE, OSM_INSTALL,
    SMI_CONFORMANCE,
};
use mesh_adapter::Error;

use super::{bookstore_source, events, osm_registry, until_terminal, FakeCluster, FakeLister, FakeSource, Mutation};

struct FixedRunner(Result<String, String>);

#[async_trait]
impl ConformanceRunner for FixedRunner {
    async fn run(&self, _request: &ConformanceRequest) -> Result<String, Error> {
        self.0
            .clone()
            .map_err(|msg| Error::internal_with_context("smi-conformance", msg))
    }
}

fn dispatcher(
    cluster: Arc<FakeCluster>,
    source: FakeSource,
    runner: FixedRunner,
    registry: SharedRegistry,
) -> (Dispatcher, tokio::sync::mpsc::UnboundedReceiver<mesh_adapter::events::Event>) {
    let (sink, rx) = events();
    let context = AdapterContext::builder(cluster, Arc::new(source))
        .conformance(Arc::new(runner))
        .sink(sink)
        .build();
    (Dispatcher::new(context, registry), rx)
}

/// Story: a request for an operation the adapter does not offer fails once
/// and never reaches the cluster
#[tokio::test]
async fn story_unknown_operation_never_mutates() {
    let cluster = Arc::new(FakeCluster::default());
    let (dispatcher, mut rx) = dispatcher(
        cluster.clone(),
        FakeSource::default(),
        FixedRunner(Ok(String::new())),
        osm_registry(),
    );

    for name in ["istio_install", "", "osm-install"] {
        let result = dispatcher.dispatch(OperationRequest::new(name));
        assert!(matches!(result, Err(Error::OpInvalid { .. })));
        let events = until_terminal(&mut rx).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Failed);
    }
    assert!(cluster.recorded().is_empty());
}

/// Story: installing the bookstore twice leaves namespaces exactly as the
/// first install did
#[tokio::test]
async fn story_bookstore_install_is_idempotent() {
    let cluster = Arc::new(FakeCluster::default());
    let (dispatcher, mut rx) = dispatcher(
        cluster.clone(),
        bookstore_source(),
        FixedRunner(Ok(String::new())),
        osm_registry(),
    );

    let first = dispatcher
        .dispatch(OperationRequest::new(OSM_BOOKSTORE))
        .expect("dispatched");
    first.wait().await.expect("first run");
    let events = until_terminal(&mut rx).await;
    assert_eq!(events.last().expect("terminal").kind, EventKind::Succeeded);
    let after_first = cluster.namespace("bookstore").expect("bookstore enrolled");
    assert_eq!(
        after_first.labels.get("openservicemesh.io/monitored-by").map(String::as_str),
        Some("osm")
    );

    let second = dispatcher
        .dispatch(OperationRequest::new(OSM_BOOKSTORE))
        .expect("dispatched");
    second.wait().await.expect("second run");
    let events = until_terminal(&mut rx).await;
    assert_eq!(events.last().expect("terminal").kind, EventKind::Succeeded);

    for ns in MeshProfile::osm().sample_namespaces {
        let state = cluster.namespace(&ns).expect("namespace exists");
        if ns == "bookstore" {
            assert_eq!(state, after_first);
        }
        assert_eq!(state.labels.len(), 1);
        assert_eq!(state.annotations.len(), 1);
    }

    // Templates applied in declared order on both runs
    let applied: Vec<String> = cluster
        .recorded()
        .into_iter()
        .filter_map(|m| match m {
            Mutation::Manifest { body, .. } => Some(body),
            _ => None,
        })
        .collect();
    assert_eq!(applied.len(), 8);
    assert!(applied[0].contains("bookbuyer"));
    assert!(applied[3].contains("bookwarehouse"));
    assert_eq!(applied[..4], applied[4..]);
}

/// Story: uninstalling the bookstore removes mesh membership and deletes the
/// templates in the same order they were installed
#[tokio::test]
async fn story_bookstore_uninstall_unenrolls_namespaces() {
    let cluster = Arc::new(FakeCluster::default());
    let (dispatcher, mut rx) = dispatcher(
        cluster.clone(),
        bookstore_source(),
        FixedRunner(Ok(String::new())),
        osm_registry(),
    );

    dispatcher
        .dispatch(OperationRequest::new(OSM_BOOKSTORE))
        .expect("dispatched")
        .wait()
        .await
        .expect("install");
    until_terminal(&mut rx).await;

    dispatcher
        .dispatch(OperationRequest::new(OSM_BOOKSTORE).deleting(true))
        .expect("dispatched")
        .wait()
        .await
        .expect("uninstall");
    let events = until_terminal(&mut rx).await;
    assert_eq!(
        events.last().expect("terminal").summary,
        "bookstore application removed successfully"
    );

    let state = cluster.namespace("bookthief").expect("namespace kept");
    assert!(state.labels.is_empty());
    assert!(state.annotations.is_empty());

    let deletes: Vec<String> = cluster
        .recorded()
        .into_iter()
        .filter_map(|m| match m {
            Mutation::Manifest { body, delete: true, .. } => Some(body),
            _ => None,
        })
        .collect();
    assert_eq!(deletes.len(), 4);
    assert!(deletes[0].contains("bookbuyer"));
}

/// Story: a namespace the cluster refuses stops the sample app before any
/// template is applied
#[tokio::test]
async fn story_forbidden_namespace_aborts_sample_app() {
    let cluster = Arc::new(FakeCluster::forbidding(&["bookthief"]));
    let (dispatcher, mut rx) = dispatcher(
        cluster.clone(),
        bookstore_source(),
        FixedRunner(Ok(String::new())),
        osm_registry(),
    );

    dispatcher
        .dispatch(OperationRequest::new(OSM_BOOKSTORE))
        .expect("dispatched")
        .wait()
        .await
        .expect("task ends");
    let events = until_terminal(&mut rx).await;

    let terminal = events.last().expect("terminal");
    assert_eq!(terminal.kind, EventKind::Failed);
    assert!(terminal.details.contains("bookthief"));
    assert!(cluster.namespace("bookwarehouse").is_none());
    assert!(!cluster
        .recorded()
        .iter()
        .any(|m| matches!(m, Mutation::Manifest { .. })));
}

/// Story: the control plane installs the newest release the lister reported,
/// and still registers when the lister is down
#[tokio::test]
async fn story_install_follows_release_listing() {
    let builder = RegistryBuilder::new(
        MeshProfile::osm(),
        Arc::new(FakeLister(Ok(vec![
            "v1.2.4".to_string(),
            "v1.2.3".to_string(),
            "v1.1.2".to_string(),
            "v1.0.0".to_string(),
        ]))),
    );
    let registry = SharedRegistry::new(builder.build().await);
    assert_eq!(registry.snapshot().get(OSM_INSTALL).expect("install").versions.len(), 3);

    let cluster = Arc::new(FakeCluster::default());
    let (dispatcher, mut rx) = dispatcher(
        cluster.clone(),
        FakeSource::default(),
        FixedRunner(Ok(String::new())),
        registry,
    );
    dispatcher
        .dispatch(OperationRequest::new(OSM_INSTALL))
        .expect("dispatched");
    let events = until_terminal(&mut rx).await;
    assert_eq!(events.last().expect("terminal").kind, EventKind::Succeeded);
    assert_eq!(
        cluster.recorded(),
        vec![Mutation::Chart {
            chart: "osm".to_string(),
            version: "v1.2.4".to_string(),
            namespace: "osm-system".to_string(),
            action: ChartAction::Install,
        }]
    );

    let offline = RegistryBuilder::new(
        MeshProfile::osm(),
        Arc::new(FakeLister(Err("rate limited".to_string()))),
    )
    .build()
    .await;
    assert!(offline.get(OSM_INSTALL).expect("still registered").versions.is_empty());
}

/// Story: conformance results pass straight through to the caller
#[tokio::test]
async fn story_conformance_result_passes_through() {
    let (failing, mut rx) = dispatcher(
        Arc::new(FakeCluster::default()),
        FakeSource::default(),
        FixedRunner(Err("traffic split test failed: expected 50/50".to_string())),
        osm_registry(),
    );
    failing
        .dispatch(OperationRequest::new(SMI_CONFORMANCE))
        .expect("dispatched");
    let events = until_terminal(&mut rx).await;

    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    let terminal = events.last().expect("terminal");
    assert_eq!(terminal.kind, EventKind::Failed);
    assert!(terminal
        .details
        .ends_with("traffic split test failed: expected 50/50"));

    let (passing, mut rx) = dispatcher(
        Arc::new(FakeCluster::default()),
        FakeSource::default(),
        FixedRunner(Ok("all tests passed".to_string())),
        osm_registry(),
    );
    passing
        .dispatch(OperationRequest::new(SMI_CONFORMANCE))
        .expect("dispatched");
    let events = until_terminal(&mut rx).await;
    let terminal = events.last().expect("terminal");
    assert_eq!(terminal.kind, EventKind::Succeeded);
    assert_eq!(terminal.summary, "Conformance test completed successfully");
}

/// Story: a registry rebuilt while requests are in flight never shows a
/// half-built table
#[tokio::test]
async fn story_registry_swap_is_whole() {
    let registry = osm_registry();
    let held = registry.snapshot();
    registry.replace(OperationRegistry::default());

    assert!(held.get(OSM_INSTALL).is_ok());
    assert!(registry.snapshot().get(OSM_INSTALL).is_err());
}
