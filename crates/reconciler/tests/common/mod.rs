//! Shared fixture: a handler wired to in-memory collaborators.

#![allow(dead_code)]

use std::sync::Arc;

use composition_core::ControllerConfig;

use composition_reconciler::memory::{
    Chart, InMemoryClusterApi, InMemoryRecordStore, InMemoryReleaseBackend,
    RecordingEventRecorder, StaticChartInspector, StaticPackageResolver, StaticResourceMapper,
};
use composition_reconciler::ports::{CompositionDefinitionInfo, ResourceRequirement};
use composition_reconciler::{
    Composition, CompositionHandler, GroupVersionResource, PackageInfo, Result,
};
use serde_json::json;

pub const CHART_URL: &str = "oci://registry.example.io/charts/fireworks-app";
pub const CHART_VERSION: &str = "1.0.0";
pub const NAMESPACE: &str = "apps";
pub const NAME: &str = "demo";
pub const UID: &str = "3f2c9a1e-7b4d-4e21-9c0a-5d6e7f809a1b";
pub const RELEASE_NAME: &str = "demo-3f2c9a1e";
pub const KEY: &str = "apps/demo";

pub const TEMPLATE: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ .Release.Name }}-web
  namespace: {{ .Release.Namespace }}
spec:
  replicas: {{ .Values.replicas }}
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ .Release.Name }}-config
  namespace: {{ .Release.Namespace }}
data:
  greeting: \"{{ .Values.greeting }}\"
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: {{ .Release.Name }}-reader
";

pub struct Fixture {
    pub handler: CompositionHandler,
    pub backend: Arc<InMemoryReleaseBackend>,
    pub store: Arc<InMemoryRecordStore>,
    pub events: Arc<RecordingEventRecorder>,
    pub cluster: Arc<InMemoryClusterApi>,
    pub inspector: Arc<StaticChartInspector>,
    pub resolver: Arc<StaticPackageResolver>,
    pub config: ControllerConfig,
}

pub fn package(version: &str) -> PackageInfo {
    PackageInfo {
        url: CHART_URL.to_string(),
        repo: "fireworks-app".to_string(),
        version: version.to_string(),
        composition_definition: CompositionDefinitionInfo {
            name: "fireworksapp".to_string(),
            namespace: "krateo-system".to_string(),
            gvr: GroupVersionResource::new(
                "core.krateo.io",
                "v1alpha1",
                "compositiondefinitions",
            ),
        },
        ..PackageInfo::default()
    }
}

pub fn record() -> Composition {
    Composition::new(
        "composition.krateo.io/v1-2-0",
        "FireworksApp",
        NAME,
        NAMESPACE,
    )
    .with_uid(UID)
    .with_spec(json!({"replicas": 2, "greeting": "hello"}))
}

fn requirements() -> Vec<ResourceRequirement> {
    [
        ("apps", "deployments", NAMESPACE),
        ("", "configmaps", NAMESPACE),
        ("rbac.authorization.k8s.io", "clusterroles", ""),
    ]
    .into_iter()
    .map(|(group, resource, namespace)| ResourceRequirement {
        group: group.to_string(),
        version: "v1".to_string(),
        resource: resource.to_string(),
        namespace: namespace.to_string(),
    })
    .collect()
}

/// Fixture around `backend`, with [`record`] already stored.
pub async fn fixture_with(backend: InMemoryReleaseBackend) -> Result<Fixture> {
    fixture_configured(backend, ControllerConfig::default()).await
}

/// Fixture whose handler takes its settings from `config`.
pub async fn fixture_configured(
    backend: InMemoryReleaseBackend,
    config: ControllerConfig,
) -> Result<Fixture> {
    let backend = Arc::new(backend);
    backend
        .register_chart(CHART_URL, Chart::new("fireworks-app", CHART_VERSION, TEMPLATE))
        .await;

    let store = Arc::new(InMemoryRecordStore::new());
    store.insert(record()).await;

    let events = Arc::new(RecordingEventRecorder::new());
    let cluster = Arc::new(InMemoryClusterApi::new());
    let inspector = Arc::new(StaticChartInspector::new(requirements()));
    let resolver = Arc::new(StaticPackageResolver::new(package(CHART_VERSION)));
    let mapper = StaticResourceMapper::with_defaults().register(
        "composition.krateo.io",
        "FireworksApp",
        "fireworksapps",
        true,
    );

    let handler = CompositionHandler::builder()
        .with_resolver(resolver.clone())
        .with_backend(backend.clone())
        .with_store(store.clone())
        .with_mapper(Arc::new(mapper))
        .with_events(events.clone())
        .with_controller_config(&config, inspector.clone(), cluster.clone())
        .build()?;

    Ok(Fixture {
        handler,
        backend,
        store,
        events,
        cluster,
        inspector,
        resolver,
        config,
    })
}

pub async fn fixture() -> Result<Fixture> {
    fixture_with(InMemoryReleaseBackend::new()).await
}

impl Fixture {
    /// The stored record. Falls back to a fresh record if missing, which
    /// makes the following assertions fail loudly.
    pub async fn stored(&self) -> Composition {
        self.store.get(KEY).await.unwrap_or_else(record)
    }
}
