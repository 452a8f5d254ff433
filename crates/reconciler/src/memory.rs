//! In-memory collaborators.
//!
//! Every port has an implementation here backed by `tokio` locks. They keep
//! call logs and support failure injection so tests can assert on ordering
//! and error paths, and the CLI uses the static mapper for path resolution.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use composition_core::{Release, ReleaseStatus};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::composition::{Composition, GroupVersionKind, GroupVersionResource};
use crate::error::{Error, Result};
use crate::ports::{
    ActionConfig, ChartInspector, ClusterObjectApi, Event, EventRecorder, InspectionRequest,
    InstallConfig, PackageInfo, PackageResolver, RecordStore, ReleaseBackend, ResourceMapper,
    ResourceRequirement, RollbackConfig, UninstallConfig, UpgradeConfig,
};
use crate::rbac::{ObjectReference, RbacObject};

/// Package-manager operations, for call logs and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Get,
    Install,
    Upgrade,
    Rollback,
    Uninstall,
}

/// A chart the in-memory backend can render.
///
/// The template supports `{{ .Values.<path> }}`, `{{ .Release.Name }}` and
/// `{{ .Release.Namespace }}` placeholders. Anything else renders empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    pub name: String,
    pub version: String,
    pub template: String,
}

impl Chart {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            template: template.into(),
        }
    }
}

fn lookup_path<'v>(values: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(values, |current, segment| current.get(segment))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitute placeholders in a chart template.
#[must_use]
pub fn render_template(template: &str, values: &Value, name: &str, namespace: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some((head, after)) = rest.split_once("{{") {
        out.push_str(head);
        let Some((expr, tail)) = after.split_once("}}") else {
            out.push_str("{{");
            out.push_str(after);
            return out;
        };

        let rendered = match expr.trim() {
            ".Release.Name" => name.to_string(),
            ".Release.Namespace" => namespace.to_string(),
            expr => expr
                .strip_prefix(".Values.")
                .and_then(|path| lookup_path(values, path))
                .map(scalar_text)
                .unwrap_or_default(),
        };
        out.push_str(&rendered);
        rest = tail;
    }

    out.push_str(rest);
    out
}

#[derive(Debug, Default)]
struct BackendState {
    /// Revision history per `(namespace, name)`, oldest first.
    releases: BTreeMap<(String, String), Vec<Release>>,
    calls: Vec<(Operation, String)>,
    failures: BTreeMap<Operation, String>,
}

impl BackendState {
    fn current(&self, namespace: &str, name: &str) -> Option<&Release> {
        self.releases
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|history| history.last())
    }

    fn check(&mut self, op: Operation, name: &str) -> Result<()> {
        self.calls.push((op, name.to_string()));
        match self.failures.get(&op) {
            Some(reason) => Err(Error::backend(format!("{op:?}").to_lowercase(), reason.clone())),
            None => Ok(()),
        }
    }
}

/// Drop the oldest revisions beyond `max_history`. Zero keeps everything.
fn trim_history(history: &mut Vec<Release>, max_history: u32) {
    let max = usize::try_from(max_history).unwrap_or(usize::MAX);
    if max > 0 {
        let excess = history.len().saturating_sub(max);
        history.drain(..excess);
    }
}

/// Package-manager backend that renders registered charts in memory.
#[derive(Debug, Default)]
pub struct InMemoryReleaseBackend {
    charts: RwLock<BTreeMap<String, Chart>>,
    state: Mutex<BackendState>,
    latency: Option<Duration>,
    retain_after_uninstall: bool,
}

impl InMemoryReleaseBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every mutating call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make uninstall a no-op, as a backend that silently failed would.
    #[must_use]
    pub fn retaining_after_uninstall(mut self) -> Self {
        self.retain_after_uninstall = true;
        self
    }

    pub async fn register_chart(&self, url: impl Into<String>, chart: Chart) {
        self.charts.write().await.insert(url.into(), chart);
    }

    /// Put a release in place as if an earlier process had installed it.
    pub async fn seed_release(&self, release: Release) {
        let key = (release.namespace.clone(), release.name.clone());
        self.state
            .lock()
            .await
            .releases
            .entry(key)
            .or_default()
            .push(release);
    }

    pub async fn fail_on(&self, op: Operation, reason: impl Into<String>) {
        self.state.lock().await.failures.insert(op, reason.into());
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    /// Operations in call order.
    pub async fn calls(&self) -> Vec<Operation> {
        self.state.lock().await.calls.iter().map(|(op, _)| *op).collect()
    }

    pub async fn count(&self, op: Operation) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .count()
    }

    pub async fn current(&self, namespace: &str, name: &str) -> Option<Release> {
        self.state.lock().await.current(namespace, name).cloned()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn render(
        &self,
        namespace: &str,
        name: &str,
        chart_url: &str,
        action: &ActionConfig,
    ) -> Result<(String, String, String)> {
        let charts = self.charts.read().await;
        let chart = charts
            .get(chart_url)
            .ok_or_else(|| Error::backend("render", format!("chart {chart_url} not found")))?;

        let version = if action.chart_version.is_empty() {
            chart.version.clone()
        } else {
            action.chart_version.clone()
        };

        let mut manifest = render_template(&chart.template, &action.values, name, namespace);
        if let Some(renderer) = &action.post_renderer {
            manifest = renderer.render(&manifest)?;
        }
        Ok((chart.name.clone(), version, manifest))
    }
}

#[async_trait]
impl ReleaseBackend for InMemoryReleaseBackend {
    async fn get_release(&self, namespace: &str, name: &str) -> Result<Option<Release>> {
        let mut state = self.state.lock().await;
        state.check(Operation::Get, name)?;
        Ok(state.current(namespace, name).cloned())
    }

    async fn install(
        &self,
        namespace: &str,
        name: &str,
        chart_url: &str,
        config: &InstallConfig,
    ) -> Result<Release> {
        self.pause().await;
        let (chart_name, chart_version, manifest) =
            self.render(namespace, name, chart_url, &config.action).await?;

        let mut state = self.state.lock().await;
        state.check(Operation::Install, name)?;
        if state.current(namespace, name).is_some() {
            return Err(Error::backend(
                "install",
                format!("cannot re-use a name that is still in use: {name}"),
            ));
        }

        let release = Release {
            chart_name,
            ..Release::new(name, namespace, chart_version, manifest)
        };
        state
            .releases
            .insert((namespace.to_string(), name.to_string()), vec![release.clone()]);
        debug!(release = name, "Installed release");
        Ok(release)
    }

    async fn upgrade(
        &self,
        namespace: &str,
        name: &str,
        chart_url: &str,
        config: &UpgradeConfig,
    ) -> Result<Release> {
        self.pause().await;
        let (chart_name, chart_version, manifest) =
            self.render(namespace, name, chart_url, &config.action).await?;

        let mut state = self.state.lock().await;
        state.check(Operation::Upgrade, name)?;
        let history = state
            .releases
            .get_mut(&(namespace.to_string(), name.to_string()))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::backend("upgrade", format!("{name} has no deployed releases")))?;

        let revision = history.last().map_or(1, |r| r.revision.saturating_add(1));
        for old in history.iter_mut() {
            old.status = ReleaseStatus::Superseded;
        }
        let release = Release {
            revision,
            chart_name,
            ..Release::new(name, namespace, chart_version, manifest)
        };
        history.push(release.clone());

        trim_history(history, config.max_history);
        Ok(release)
    }

    async fn rollback(
        &self,
        namespace: &str,
        name: &str,
        config: &RollbackConfig,
    ) -> Result<Release> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.check(Operation::Rollback, name)?;
        let history = state
            .releases
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::backend("rollback", format!("release {name} not found")))?;

        let current_revision = history.last().map_or(0, |r| r.revision);
        // Without an earlier revision the release is rolled back onto itself.
        let target = history
            .iter()
            .rev()
            .nth(1)
            .or_else(|| history.last())
            .cloned()
            .ok_or_else(|| Error::backend("rollback", format!("release {name} has no history")))?;

        for old in history.iter_mut() {
            old.status = ReleaseStatus::Superseded;
        }
        let release = Release {
            revision: current_revision.saturating_add(1),
            status: ReleaseStatus::Deployed,
            ..target
        };
        history.push(release.clone());

        trim_history(history, config.max_history);
        Ok(release)
    }

    async fn uninstall(
        &self,
        namespace: &str,
        name: &str,
        config: &UninstallConfig,
    ) -> Result<()> {
        self.pause().await;
        let mut state = self.state.lock().await;
        state.check(Operation::Uninstall, name)?;
        if self.retain_after_uninstall {
            return Ok(());
        }

        let removed = state
            .releases
            .remove(&(namespace.to_string(), name.to_string()));
        if removed.is_none() && !config.ignore_not_found {
            return Err(Error::backend("uninstall", format!("release {name} not found")));
        }
        Ok(())
    }
}

/// Record store with Kubernetes-like update semantics.
///
/// `update` persists metadata and spec and keeps the stored status;
/// `update_status` persists only the status.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<String, Composition>>,
    counters: Mutex<(usize, usize)>,
    fail_status: RwLock<Option<String>>,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, composition: Composition) {
        self.records
            .write()
            .await
            .insert(composition.key(), composition);
    }

    pub async fn get(&self, key: &str) -> Option<Composition> {
        self.records.read().await.get(key).cloned()
    }

    /// `(update calls, update_status calls)`.
    pub async fn write_counts(&self) -> (usize, usize) {
        *self.counters.lock().await
    }

    pub async fn fail_status_updates(&self, reason: impl Into<String>) {
        *self.fail_status.write().await = Some(reason.into());
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn update(&self, composition: &Composition) -> Result<Composition> {
        {
            let mut counters = self.counters.lock().await;
            counters.0 = counters.0.saturating_add(1);
        }
        let mut records = self.records.write().await;
        let stored = records
            .entry(composition.key())
            .or_insert_with(|| composition.clone());
        stored.metadata = composition.metadata.clone();
        stored.spec = composition.spec.clone();
        Ok(stored.clone())
    }

    async fn update_status(&self, composition: &Composition) -> Result<Composition> {
        {
            let mut counters = self.counters.lock().await;
            counters.1 = counters.1.saturating_add(1);
        }
        if let Some(reason) = self.fail_status.read().await.clone() {
            return Err(Error::persistence("update_status", reason));
        }

        let mut records = self.records.write().await;
        let stored = records.get_mut(&composition.key()).ok_or_else(|| {
            Error::persistence(
                "update_status",
                format!("{} not found", composition.key()),
            )
        })?;
        stored.status = composition.status.clone();
        Ok(stored.clone())
    }
}

/// Keeps every recorded event.
#[derive(Debug, Default)]
pub struct RecordingEventRecorder {
    events: Mutex<Vec<(String, Event)>>,
}

impl RecordingEventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .await
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub async fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .map(|(_, e)| e.reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventRecorder for RecordingEventRecorder {
    async fn record(&self, composition: &Composition, event: Event) {
        debug!(key = %composition.key(), reason = %event.reason, "Recorded event");
        self.events.lock().await.push((composition.key(), event));
    }
}

/// Resolves every record to the same package.
#[derive(Debug, Default)]
pub struct StaticPackageResolver {
    package: RwLock<PackageInfo>,
    failure: RwLock<Option<String>>,
}

impl StaticPackageResolver {
    #[must_use]
    pub fn new(package: PackageInfo) -> Self {
        Self {
            package: RwLock::new(package),
            failure: RwLock::new(None),
        }
    }

    /// Swap the package, e.g. to simulate a version bump.
    pub async fn set_package(&self, package: PackageInfo) {
        *self.package.write().await = package;
    }

    pub async fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.write().await = Some(reason.into());
    }
}

#[async_trait]
impl PackageResolver for StaticPackageResolver {
    async fn resolve(&self, _composition: &Composition) -> Result<PackageInfo> {
        if let Some(reason) = self.failure.read().await.clone() {
            return Err(Error::resolver(reason));
        }
        Ok(self.package.read().await.clone())
    }
}

/// Type and scope table keyed by group and kind.
#[derive(Debug, Default)]
pub struct StaticResourceMapper {
    kinds: BTreeMap<(String, String), (String, bool)>,
}

impl StaticResourceMapper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapper preloaded with the built-in kinds charts commonly render.
    #[must_use]
    pub fn with_defaults() -> Self {
        [
            ("", "Pod", "pods", true),
            ("", "Service", "services", true),
            ("", "ConfigMap", "configmaps", true),
            ("", "Secret", "secrets", true),
            ("", "ServiceAccount", "serviceaccounts", true),
            ("", "PersistentVolumeClaim", "persistentvolumeclaims", true),
            ("", "Namespace", "namespaces", false),
            ("", "Node", "nodes", false),
            ("", "PersistentVolume", "persistentvolumes", false),
            ("apps", "Deployment", "deployments", true),
            ("apps", "StatefulSet", "statefulsets", true),
            ("apps", "DaemonSet", "daemonsets", true),
            ("batch", "Job", "jobs", true),
            ("batch", "CronJob", "cronjobs", true),
            ("networking.k8s.io", "Ingress", "ingresses", true),
            ("rbac.authorization.k8s.io", "Role", "roles", true),
            ("rbac.authorization.k8s.io", "RoleBinding", "rolebindings", true),
            ("rbac.authorization.k8s.io", "ClusterRole", "clusterroles", false),
            (
                "rbac.authorization.k8s.io",
                "ClusterRoleBinding",
                "clusterrolebindings",
                false,
            ),
        ]
        .into_iter()
        .fold(Self::new(), |mapper, (group, kind, resource, namespaced)| {
            mapper.register(group, kind, resource, namespaced)
        })
    }

    #[must_use]
    pub fn register(
        mut self,
        group: &str,
        kind: &str,
        resource: &str,
        namespaced: bool,
    ) -> Self {
        self.kinds.insert(
            (group.to_string(), kind.to_string()),
            (resource.to_string(), namespaced),
        );
        self
    }

    fn lookup(&self, gvk: &GroupVersionKind) -> Result<&(String, bool)> {
        self.kinds
            .get(&(gvk.group.clone(), gvk.kind.clone()))
            .ok_or_else(|| Error::mapping(gvk.to_string(), "no matches for kind"))
    }
}

#[async_trait]
impl ResourceMapper for StaticResourceMapper {
    async fn gvk_to_gvr(&self, gvk: &GroupVersionKind) -> Result<GroupVersionResource> {
        let (resource, _) = self.lookup(gvk)?;
        Ok(GroupVersionResource::new(
            gvk.group.clone(),
            gvk.version.clone(),
            resource.clone(),
        ))
    }

    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool> {
        self.lookup(gvk).map(|(_, namespaced)| *namespaced)
    }
}

/// Inspector that reports a fixed requirement list.
#[derive(Debug, Default)]
pub struct StaticChartInspector {
    requirements: Vec<ResourceRequirement>,
    failure: RwLock<Option<String>>,
}

impl StaticChartInspector {
    #[must_use]
    pub fn new(requirements: Vec<ResourceRequirement>) -> Self {
        Self {
            requirements,
            failure: RwLock::new(None),
        }
    }

    pub async fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.write().await = Some(reason.into());
    }
}

#[async_trait]
impl ChartInspector for StaticChartInspector {
    async fn resources(&self, _request: &InspectionRequest) -> Result<Vec<ResourceRequirement>> {
        if let Some(reason) = self.failure.read().await.clone() {
            return Err(Error::inspector(reason));
        }
        Ok(self.requirements.clone())
    }
}

/// Cluster API that stores permission objects in a map.
#[derive(Debug, Default)]
pub struct InMemoryClusterApi {
    objects: RwLock<BTreeMap<ObjectReference, RbacObject>>,
    applied: Mutex<Vec<ObjectReference>>,
    deleted: Mutex<Vec<ObjectReference>>,
    failure: RwLock<Option<String>>,
}

impl InMemoryClusterApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn references(&self) -> BTreeSet<ObjectReference> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn applied(&self) -> Vec<ObjectReference> {
        self.applied.lock().await.clone()
    }

    pub async fn deleted(&self) -> Vec<ObjectReference> {
        self.deleted.lock().await.clone()
    }

    pub async fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.write().await = Some(reason.into());
    }
}

#[async_trait]
impl ClusterObjectApi for InMemoryClusterApi {
    async fn apply(&self, object: &RbacObject) -> Result<()> {
        if let Some(reason) = self.failure.read().await.clone() {
            return Err(Error::cluster_api("apply", reason));
        }
        let reference = object.reference();
        self.applied.lock().await.push(reference.clone());
        self.objects.write().await.insert(reference, object.clone());
        Ok(())
    }

    async fn delete(&self, object: &ObjectReference, ignore_not_found: bool) -> Result<()> {
        if let Some(reason) = self.failure.read().await.clone() {
            return Err(Error::cluster_api("delete", reason));
        }
        self.deleted.lock().await.push(object.clone());
        let removed = self.objects.write().await.remove(object);
        if removed.is_none() && !ignore_not_found {
            return Err(Error::cluster_api(
                "delete",
                format!("{} {} not found", object.kind, object.name),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    #[test]
    fn test_render_template_substitutes_values() {
        let template = "name: {{ .Release.Name }}\nns: {{ .Release.Namespace }}\nreplicas: {{ .Values.replicas }}\nimage: {{ .Values.image.tag }}\nmissing: {{ .Values.nope }}\n";
        let values = json!({"replicas": 3, "image": {"tag": "1.2"}});

        let rendered = render_template(template, &values, "rel", "demo");
        assert_eq!(
            rendered,
            "name: rel\nns: demo\nreplicas: 3\nimage: 1.2\nmissing: \n"
        );
    }

    #[test]
    fn test_render_template_unterminated_is_kept() {
        assert_eq!(render_template("a {{ b", &json!({}), "r", "n"), "a {{ b");
    }

    #[test]
    fn test_render_template_adjacent_placeholders() {
        let rendered = render_template(
            "{{.Release.Name}}{{ .Release.Namespace }}-{{ .Values.x }}}}",
            &json!({"x": true}),
            "r",
            "n",
        );
        assert_eq!(rendered, "rn-true}}");
    }

    #[test]
    fn test_trim_history_keeps_newest() {
        let mut history: Vec<Release> = (1..=5)
            .map(|revision| Release {
                revision,
                ..Release::default()
            })
            .collect();

        trim_history(&mut history, 2);
        let kept: Vec<_> = history.iter().map(|r| r.revision).collect();
        assert_eq!(kept, vec![4, 5]);

        trim_history(&mut history, 0);
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_backend_lifecycle() {
        let backend = InMemoryReleaseBackend::new();
        backend
            .register_chart("oci://charts/app", Chart::new("app", "1.0.0", "kind: {{ .Values.kind }}\n"))
            .await;

        let install = InstallConfig {
            action: ActionConfig {
                values: json!({"kind": "ConfigMap"}),
                ..ActionConfig::default()
            },
        };
        let installed = backend
            .install("demo", "rel", "oci://charts/app", &install)
            .await
            .unwrap();
        assert_eq!(installed.revision, 1);
        assert_eq!(installed.chart_version, "1.0.0");

        let upgraded = backend
            .upgrade("demo", "rel", "oci://charts/app", &UpgradeConfig::default())
            .await
            .unwrap();
        assert_eq!(upgraded.revision, 2);
        assert_eq!(upgraded.manifest, "kind: \n");

        let rolled = backend
            .rollback("demo", "rel", &RollbackConfig::default())
            .await
            .unwrap();
        assert_eq!(rolled.revision, 3);
        assert_eq!(rolled.manifest, "kind: ConfigMap\n");

        backend
            .uninstall("demo", "rel", &UninstallConfig::default())
            .await
            .unwrap();
        assert!(backend.get_release("demo", "rel").await.unwrap().is_none());
        assert!(backend
            .uninstall("demo", "rel", &UninstallConfig::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_record_store_keeps_status_on_update() {
        let store = InMemoryRecordStore::new();
        let mut record = Composition::new("v1", "App", "a", "ns");
        record.status.digest = "abc".to_string();
        store.insert(record.clone()).await;

        record.status.digest = String::new();
        record.metadata.labels.insert("k".to_string(), "v".to_string());
        let stored = store.update(&record).await.unwrap();

        assert_eq!(stored.status.digest, "abc");
        assert_eq!(stored.metadata.labels.get("k").map(String::as_str), Some("v"));
        assert_eq!(store.write_counts().await, (1, 0));
    }

    #[tokio::test]
    async fn test_static_mapper_unknown_kind() {
        let mapper = StaticResourceMapper::with_defaults();
        let gvk = GroupVersionKind::from_api_version_and_kind("example.io/v1", "Widget");
        assert!(matches!(
            mapper.gvk_to_gvr(&gvk).await,
            Err(Error::Mapping { .. })
        ));
    }
}
