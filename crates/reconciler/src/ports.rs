//! Collaborator contracts the handler is driven against.
//!
//! Every collaborator is an `async` trait object held in an `Arc`. The
//! in-memory implementations in [`crate::memory`] back the tests and the CLI.

use async_trait::async_trait;
use composition_core::Release;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::composition::{Composition, GroupVersionKind, GroupVersionResource};
use crate::error::Result;
use crate::rbac::{ObjectReference, RbacObject};
use crate::values::LabelPostRenderer;

/// Repository credentials.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// The definition a composition was generated from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompositionDefinitionInfo {
    pub name: String,
    pub namespace: String,
    pub gvr: GroupVersionResource,
}

/// Resolved package coordinates for a composition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackageInfo {
    pub url: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub auth: Option<Credentials>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    #[serde(default)]
    pub composition_definition: CompositionDefinitionInfo,
}

/// Settings shared by install and upgrade.
#[derive(Debug, Clone, Default)]
pub struct ActionConfig {
    pub chart_name: String,
    pub chart_version: String,
    pub values: Value,
    pub credentials: Option<Credentials>,
    pub insecure_skip_tls_verify: bool,
    pub post_renderer: Option<LabelPostRenderer>,
}

#[derive(Debug, Clone, Default)]
pub struct InstallConfig {
    pub action: ActionConfig,
}

#[derive(Debug, Clone, Default)]
pub struct UpgradeConfig {
    pub action: ActionConfig,
    pub max_history: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RollbackConfig {
    pub max_history: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UninstallConfig {
    pub ignore_not_found: bool,
}

/// Resolves the package a composition installs.
#[async_trait]
pub trait PackageResolver: Send + Sync {
    async fn resolve(&self, composition: &Composition) -> Result<PackageInfo>;
}

/// Package-manager backend.
#[async_trait]
pub trait ReleaseBackend: Send + Sync {
    /// Look up a release. `None` when it does not exist.
    async fn get_release(&self, namespace: &str, name: &str) -> Result<Option<Release>>;

    async fn install(
        &self,
        namespace: &str,
        name: &str,
        chart_url: &str,
        config: &InstallConfig,
    ) -> Result<Release>;

    async fn upgrade(
        &self,
        namespace: &str,
        name: &str,
        chart_url: &str,
        config: &UpgradeConfig,
    ) -> Result<Release>;

    /// Roll back to the previous revision and return the resulting release.
    async fn rollback(
        &self,
        namespace: &str,
        name: &str,
        config: &RollbackConfig,
    ) -> Result<Release>;

    async fn uninstall(&self, namespace: &str, name: &str, config: &UninstallConfig)
        -> Result<()>;
}

/// What the chart inspector is asked about.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionRequest {
    pub composition_name: String,
    pub composition_namespace: String,
    pub composition_gvr: GroupVersionResource,
    pub composition_definition_name: String,
    pub composition_definition_namespace: String,
}

/// A resource type a chart creates. Empty namespace means cluster-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ResourceRequirement {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
    #[serde(default)]
    pub namespace: String,
}

/// Reports which resource types a chart would create.
#[async_trait]
pub trait ChartInspector: Send + Sync {
    async fn resources(&self, request: &InspectionRequest) -> Result<Vec<ResourceRequirement>>;
}

/// Writes permission objects to the cluster.
#[async_trait]
pub trait ClusterObjectApi: Send + Sync {
    /// Create or replace.
    async fn apply(&self, object: &RbacObject) -> Result<()>;

    async fn delete(&self, object: &ObjectReference, ignore_not_found: bool) -> Result<()>;
}

/// Persists the record itself.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist metadata and spec. Status is left as stored.
    async fn update(&self, composition: &Composition) -> Result<Composition>;

    /// Persist the status sub-document only.
    async fn update_status(&self, composition: &Composition) -> Result<Composition>;
}

/// Type and scope lookup for arbitrary kinds.
#[async_trait]
pub trait ResourceMapper: Send + Sync {
    async fn gvk_to_gvr(&self, gvk: &GroupVersionKind) -> Result<GroupVersionResource>;

    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Warning,
}

/// An event attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub severity: Severity,
    pub reason: String,
    pub action: String,
    pub message: String,
}

impl Event {
    pub fn normal(
        reason: impl Into<String>,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Normal,
            reason: reason.into(),
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn warning(
        reason: impl Into<String>,
        action: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            reason: reason.into(),
            action: action.into(),
            message: message.into(),
        }
    }
}

/// Event sink. Recording is best-effort and never fails the caller.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, composition: &Composition, event: Event);
}
