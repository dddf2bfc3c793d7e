//! Integration tests for the mesh adapter
//!
//! Tests are organized by the story they tell:
//!
//! - `generation`: how a platform operator turns upstream CRDs into
//!   component definitions, and when existing output is left alone
//! - `dispatch`: how lifecycle requests become cluster mutations and events
//! - `reconcile`: how declarative batches are ordered and reported
//!
//! The fakes here record every mutation so tests can assert on what reached
//! the "cluster" and in which order.

mod dispatch;
mod generation;
mod reconcile;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mesh_adapter::cluster::{ChartAction, ChartLocation, ClusterClient, MeshMembership};
use mesh_adapter::events::{event_channel, Event};
use mesh_adapter::generator::ManifestSource;
use mesh_adapter::registry::{
    base_operations, mesh_operations, MeshProfile, OperationRegistry, ReleaseLister,
    SharedRegistry,
};
use mesh_adapter::Error;
use tokio::sync::mpsc::UnboundedReceiver;

/// One recorded cluster call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Manifest {
        namespace: String,
        delete: bool,
        body: String,
    },
    Chart {
        chart: String,
        version: String,
        namespace: String,
        action: ChartAction,
    },
    EnsureNamespace(String),
    Membership {
        namespace: String,
        enabled: bool,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NamespaceState {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// In-memory cluster with upsert semantics
#[derive(Default)]
pub struct FakeCluster {
    pub mutations: Mutex<Vec<Mutation>>,
    pub namespaces: Mutex<HashMap<String, NamespaceState>>,
    /// Namespaces whose updates are rejected
    pub forbidden: Vec<String>,
}

impl FakeCluster {
    pub fn forbidding(namespaces: &[&str]) -> Self {
        Self {
            forbidden: namespaces.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn recorded(&self) -> Vec<Mutation> {
        self.mutations.lock().expect("lock").clone()
    }

    pub fn namespace(&self, name: &str) -> Option<NamespaceState> {
        self.namespaces.lock().expect("lock").get(name).cloned()
    }

    fn record(&self, mutation: Mutation) {
        self.mutations.lock().expect("lock").push(mutation);
    }

    fn check(&self, namespace: &str) -> Result<(), Error> {
        if self.forbidden.iter().any(|ns| ns == namespace) {
            return Err(Error::apply_in(namespace, "forbidden"));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn apply_manifest(&self, manifest: &str, namespace: &str, delete: bool) -> Result<(), Error> {
        self.check(namespace)?;
        self.record(Mutation::Manifest {
            namespace: namespace.to_string(),
            delete,
            body: manifest.to_string(),
        });
        Ok(())
    }

    async fn apply_chart(
        &self,
        chart: &ChartLocation,
        namespace: &str,
        action: ChartAction,
        _create_namespace: bool,
    ) -> Result<(), Error> {
        self.check(namespace)?;
        self.record(Mutation::Chart {
            chart: chart.chart.clone(),
            version: chart.version.clone(),
            namespace: namespace.to_string(),
            action,
        });
        Ok(())
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<(), Error> {
        self.check(namespace)?;
        self.namespaces
            .lock()
            .expect("lock")
            .entry(namespace.to_string())
            .or_default();
        self.record(Mutation::EnsureNamespace(namespace.to_string()));
        Ok(())
    }

    async fn set_mesh_membership(
        &self,
        namespace: &str,
        membership: &MeshMembership,
        enabled: bool,
    ) -> Result<(), Error> {
        self.check(namespace)?;
        {
            let mut namespaces = self.namespaces.lock().expect("lock");
            let state = namespaces.entry(namespace.to_string()).or_default();
            for (k, v) in &membership.labels {
                if enabled {
                    state.labels.insert(k.clone(), v.clone());
                } else {
                    state.labels.remove(k);
                }
            }
            for (k, v) in &membership.annotations {
                if enabled {
                    state.annotations.insert(k.clone(), v.clone());
                } else {
                    state.annotations.remove(k);
                }
            }
        }
        self.record(Mutation::Membership {
            namespace: namespace.to_string(),
            enabled,
        });
        Ok(())
    }
}

/// Source serving fixed bodies by location
#[derive(Default)]
pub struct FakeSource {
    pub bodies: HashMap<String, String>,
    pub fetched: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn with(mut self, location: impl Into<String>, body: impl Into<String>) -> Self {
        self.bodies.insert(location.into(), body.into());
        self
    }

    fn lookup(&self, location: &str) -> Result<String, Error> {
        self.fetched.lock().expect("lock").push(location.to_string());
        self.bodies
            .get(location)
            .cloned()
            .ok_or_else(|| Error::generation(location, "404 Not Found"))
    }
}

#[async_trait]
impl ManifestSource for FakeSource {
    async fn fetch(&self, location: &str) -> Result<String, Error> {
        self.lookup(location)
    }

    async fn render_chart(&self, chart: &str) -> Result<String, Error> {
        self.lookup(chart)
    }
}

/// Lister returning fixed tags
pub struct FakeLister(pub Result<Vec<String>, String>);

#[async_trait]
impl ReleaseLister for FakeLister {
    async fn latest_releases(&self, _owner: &str, _repo: &str, count: usize) -> Result<Vec<String>, Error> {
        match &self.0 {
            Ok(tags) => Ok(tags.iter().take(count).cloned().collect()),
            Err(msg) => Err(Error::internal_with_context("release-lister", msg.clone())),
        }
    }
}

/// Registry with every base and OSM operation
pub fn osm_registry() -> SharedRegistry {
    SharedRegistry::new(OperationRegistry::from_operations(
        base_operations().into_iter().chain(mesh_operations(
            &MeshProfile::osm(),
            vec!["v1.2.4".to_string(), "v1.2.3".to_string()],
        )),
    ))
}

/// A source serving every OSM bookstore template
pub fn bookstore_source() -> FakeSource {
    MeshProfile::osm()
        .sample_templates
        .iter()
        .fold(FakeSource::default(), |source, url| {
            let app = url.rsplit('/').next().unwrap_or_default().trim_end_matches(".yaml");
            source.with(
                url.clone(),
                format!("apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {app}\n  namespace: {app}\n"),
            )
        })
}

/// Channel sink plus receiver
pub fn events() -> (Arc<dyn mesh_adapter::events::EventSink>, UnboundedReceiver<Event>) {
    let (sink, rx) = event_channel();
    (Arc::new(sink), rx)
}

/// Collect events until the terminal one
pub async fn until_terminal(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut collected = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        collected.push(event);
        if terminal {
            break;
        }
    }
    collected
}
