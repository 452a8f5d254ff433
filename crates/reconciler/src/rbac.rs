//! Permission bundles: generation from chart contents, apply and removal.
//!
//! A bundle is generated fresh on every call from the same inputs, so the
//! bundle removed on Delete is the one applied on Observe/Create.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use composition_core::ControllerConfig;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::composition::GroupVersionResource;
use crate::error::{Error, Result};
use crate::ports::{ChartInspector, ClusterObjectApi, InspectionRequest, ResourceRequirement};

pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

const MANAGE_VERBS: [&str; 7] = ["get", "list", "watch", "create", "update", "patch", "delete"];
const SELF_VERBS: [&str; 5] = ["get", "list", "watch", "update", "patch"];
const READ_VERBS: [&str; 3] = ["get", "list", "watch"];

fn strings<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    pub verbs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    pub api_group: String,
    pub kind: String,
    pub name: String,
}

/// A role or binding object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RbacObject {
    Role {
        name: String,
        namespace: String,
        rules: Vec<PolicyRule>,
    },
    ClusterRole {
        name: String,
        rules: Vec<PolicyRule>,
    },
    RoleBinding {
        name: String,
        namespace: String,
        #[serde(rename = "roleRef")]
        role_ref: RoleRef,
        subjects: Vec<Subject>,
    },
    ClusterRoleBinding {
        name: String,
        #[serde(rename = "roleRef")]
        role_ref: RoleRef,
        subjects: Vec<Subject>,
    },
}

/// Kind, name and namespace of an object, enough to delete it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl RbacObject {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Role { .. } => "Role",
            Self::ClusterRole { .. } => "ClusterRole",
            Self::RoleBinding { .. } => "RoleBinding",
            Self::ClusterRoleBinding { .. } => "ClusterRoleBinding",
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Role { name, .. }
            | Self::ClusterRole { name, .. }
            | Self::RoleBinding { name, .. }
            | Self::ClusterRoleBinding { name, .. } => name,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        match self {
            Self::Role { namespace, .. } | Self::RoleBinding { namespace, .. } => namespace,
            Self::ClusterRole { .. } | Self::ClusterRoleBinding { .. } => "",
        }
    }

    #[must_use]
    pub fn is_binding(&self) -> bool {
        matches!(self, Self::RoleBinding { .. } | Self::ClusterRoleBinding { .. })
    }

    #[must_use]
    pub fn reference(&self) -> ObjectReference {
        ObjectReference {
            kind: self.kind().to_string(),
            name: self.name().to_string(),
            namespace: self.namespace().to_string(),
        }
    }
}

/// Ordered set of role and binding objects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionBundle {
    pub objects: Vec<RbacObject>,
}

impl PermissionBundle {
    pub fn roles(&self) -> impl Iterator<Item = &RbacObject> {
        self.objects.iter().filter(|o| !o.is_binding())
    }

    pub fn bindings(&self) -> impl Iterator<Item = &RbacObject> {
        self.objects.iter().filter(|o| o.is_binding())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Inputs identifying the composition a bundle is for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RbacParameters {
    pub composition_name: String,
    pub composition_namespace: String,
    pub composition_gvr: GroupVersionResource,
    pub definition_name: String,
    pub definition_namespace: String,
    pub definition_gvr: GroupVersionResource,
}

#[async_trait]
pub trait PermissionGenerator: Send + Sync {
    /// Generate the bundle for a composition. `base_name` is the release name.
    async fn generate(&self, base_name: &str, params: &RbacParameters) -> Result<PermissionBundle>;
}

#[async_trait]
pub trait PermissionInstaller: Send + Sync {
    /// Upsert every object, roles before bindings.
    async fn apply(&self, bundle: &PermissionBundle) -> Result<()>;

    /// Delete every object, bindings before roles. Missing objects are fine.
    async fn remove(&self, bundle: &PermissionBundle) -> Result<()>;
}

/// Generates bundles bound to one service identity from chart inspection.
pub struct RbacGenerator {
    service_account_name: String,
    service_account_namespace: String,
    inspector: Arc<dyn ChartInspector>,
}

impl RbacGenerator {
    pub fn new(
        service_account_name: impl Into<String>,
        service_account_namespace: impl Into<String>,
        inspector: Arc<dyn ChartInspector>,
    ) -> Self {
        Self {
            service_account_name: service_account_name.into(),
            service_account_namespace: service_account_namespace.into(),
            inspector,
        }
    }

    /// Generator bound to the service account named in `config`.
    #[must_use]
    pub fn from_config(config: &ControllerConfig, inspector: Arc<dyn ChartInspector>) -> Self {
        Self::new(
            config.service_account_name.as_str(),
            config.service_account_namespace.as_str(),
            inspector,
        )
    }

    fn subjects(&self) -> Vec<Subject> {
        vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: self.service_account_name.clone(),
            namespace: self.service_account_namespace.clone(),
        }]
    }

    fn role_binding(&self, name: &str, namespace: &str) -> RbacObject {
        RbacObject::RoleBinding {
            name: name.to_string(),
            namespace: namespace.to_string(),
            role_ref: RoleRef {
                api_group: RBAC_API_GROUP.to_string(),
                kind: "Role".to_string(),
                name: name.to_string(),
            },
            subjects: self.subjects(),
        }
    }

    fn cluster_role_binding(&self, name: &str) -> RbacObject {
        RbacObject::ClusterRoleBinding {
            name: name.to_string(),
            role_ref: RoleRef {
                api_group: RBAC_API_GROUP.to_string(),
                kind: "ClusterRole".to_string(),
                name: name.to_string(),
            },
            subjects: self.subjects(),
        }
    }

    fn validate(&self, base_name: &str, params: &RbacParameters) -> Result<()> {
        if base_name.is_empty() {
            return Err(Error::permission("base name is empty"));
        }
        if self.service_account_name.is_empty() || self.service_account_namespace.is_empty() {
            return Err(Error::permission("service account identity is not configured"));
        }
        if params.composition_namespace.is_empty() {
            return Err(Error::permission(format!(
                "composition {} has no namespace",
                params.composition_name
            )));
        }
        Ok(())
    }
}

/// Rules granting full management of the given resources, one per group.
fn manage_rules(resources: &BTreeSet<(String, String)>) -> Vec<PolicyRule> {
    // The set is ordered by group, so equal groups are adjacent.
    resources
        .iter()
        .chunk_by(|(group, _)| group.clone())
        .into_iter()
        .map(|(group, items)| PolicyRule {
            api_groups: vec![group],
            resources: items.map(|(_, resource)| resource.clone()).collect(),
            resource_names: Vec::new(),
            verbs: strings(MANAGE_VERBS),
        })
        .collect()
}

/// Split requirements into per-namespace and cluster-scoped resource sets.
fn partition(
    requirements: &[ResourceRequirement],
) -> (
    BTreeMap<String, BTreeSet<(String, String)>>,
    BTreeSet<(String, String)>,
) {
    let mut namespaced: BTreeMap<String, BTreeSet<(String, String)>> = BTreeMap::new();
    let mut cluster = BTreeSet::new();

    for req in requirements {
        let key = (req.group.clone(), req.resource.clone());
        if req.namespace.is_empty() {
            cluster.insert(key);
        } else {
            namespaced
                .entry(req.namespace.clone())
                .or_default()
                .insert(key);
        }
    }

    (namespaced, cluster)
}

#[async_trait]
impl PermissionGenerator for RbacGenerator {
    async fn generate(&self, base_name: &str, params: &RbacParameters) -> Result<PermissionBundle> {
        self.validate(base_name, params)?;

        let request = InspectionRequest {
            composition_name: params.composition_name.clone(),
            composition_namespace: params.composition_namespace.clone(),
            composition_gvr: params.composition_gvr.clone(),
            composition_definition_name: params.definition_name.clone(),
            composition_definition_namespace: params.definition_namespace.clone(),
        };
        let requirements = self.inspector.resources(&request).await?;
        let (mut namespaced, cluster) = partition(&requirements);

        // The composition namespace always gets a role: it carries the
        // composition self-access rule.
        namespaced
            .entry(params.composition_namespace.clone())
            .or_default();

        let mut roles = Vec::new();
        let mut bindings = Vec::new();

        for (namespace, resources) in &namespaced {
            let name = if *namespace == params.composition_namespace {
                base_name.to_string()
            } else {
                format!("{base_name}-{namespace}")
            };

            let mut rules = manage_rules(resources);
            if *namespace == params.composition_namespace {
                let gvr = &params.composition_gvr;
                rules.push(PolicyRule {
                    api_groups: vec![gvr.group.clone()],
                    resources: vec![gvr.resource.clone(), format!("{}/status", gvr.resource)],
                    resource_names: vec![params.composition_name.clone()],
                    verbs: strings(SELF_VERBS),
                });
            }

            roles.push(RbacObject::Role {
                name: name.clone(),
                namespace: namespace.clone(),
                rules,
            });
            bindings.push(self.role_binding(&name, namespace));
        }

        let cluster_name = format!("{}-{base_name}", params.composition_namespace);
        if !cluster.is_empty() {
            roles.push(RbacObject::ClusterRole {
                name: cluster_name.clone(),
                rules: manage_rules(&cluster),
            });
            bindings.push(self.cluster_role_binding(&cluster_name));
        }

        let definition_role = format!("{cluster_name}-definition");
        let def = &params.definition_gvr;
        roles.push(RbacObject::ClusterRole {
            name: definition_role.clone(),
            rules: vec![PolicyRule {
                api_groups: vec![def.group.clone()],
                resources: vec![def.resource.clone()],
                resource_names: vec![params.definition_name.clone()],
                verbs: strings(READ_VERBS),
            }],
        });
        bindings.push(self.cluster_role_binding(&definition_role));

        debug!(
            base_name,
            roles = roles.len(),
            bindings = bindings.len(),
            "Generated permission bundle"
        );

        roles.extend(bindings);
        Ok(PermissionBundle { objects: roles })
    }
}

/// Applies and removes bundles through the cluster API.
pub struct RbacInstaller {
    api: Arc<dyn ClusterObjectApi>,
}

impl RbacInstaller {
    pub fn new(api: Arc<dyn ClusterObjectApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PermissionInstaller for RbacInstaller {
    async fn apply(&self, bundle: &PermissionBundle) -> Result<()> {
        for object in bundle.roles().chain(bundle.bindings()) {
            self.api.apply(object).await.map_err(|e| {
                e.context(format!("applying {} {}", object.kind(), object.name()))
            })?;
        }
        Ok(())
    }

    async fn remove(&self, bundle: &PermissionBundle) -> Result<()> {
        for object in bundle.bindings().chain(bundle.roles()) {
            self.api
                .delete(&object.reference(), true)
                .await
                .map_err(|e| e.context(format!("deleting {} {}", object.kind(), object.name())))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use crate::memory::StaticChartInspector;

    fn params() -> RbacParameters {
        RbacParameters {
            composition_name: "demo".to_string(),
            composition_namespace: "apps".to_string(),
            composition_gvr: GroupVersionResource::new(
                "composition.krateo.io",
                "v1-2-0",
                "fireworksapps",
            ),
            definition_name: "fireworksapp".to_string(),
            definition_namespace: "krateo-system".to_string(),
            definition_gvr: GroupVersionResource::new(
                "core.krateo.io",
                "v1alpha1",
                "compositiondefinitions",
            ),
        }
    }

    fn requirement(group: &str, resource: &str, namespace: &str) -> ResourceRequirement {
        ResourceRequirement {
            group: group.to_string(),
            version: "v1".to_string(),
            resource: resource.to_string(),
            namespace: namespace.to_string(),
        }
    }

    fn generator(requirements: Vec<ResourceRequirement>) -> RbacGenerator {
        RbacGenerator::new(
            "composition-controller",
            "krateo-system",
            Arc::new(StaticChartInspector::new(requirements)),
        )
    }

    #[tokio::test]
    async fn test_bundle_layout() {
        let gen = generator(vec![
            requirement("apps", "deployments", "apps"),
            requirement("", "services", "apps"),
            requirement("", "configmaps", "other"),
            requirement("", "namespaces", ""),
        ]);
        let bundle = gen.generate("demo-1234", &params()).await.unwrap();

        let names: Vec<(&str, &str)> = bundle
            .objects
            .iter()
            .map(|o| (o.kind(), o.name()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("Role", "demo-1234"),
                ("Role", "demo-1234-other"),
                ("ClusterRole", "apps-demo-1234"),
                ("ClusterRole", "apps-demo-1234-definition"),
                ("RoleBinding", "demo-1234"),
                ("RoleBinding", "demo-1234-other"),
                ("ClusterRoleBinding", "apps-demo-1234"),
                ("ClusterRoleBinding", "apps-demo-1234-definition"),
            ]
        );
    }

    #[tokio::test]
    async fn test_composition_role_grants_self_and_status() {
        let bundle = generator(Vec::new())
            .generate("demo-1234", &params())
            .await
            .unwrap();

        let Some(RbacObject::Role { rules, .. }) = bundle.objects.first() else {
            panic!("first object should be the composition role");
        };
        let self_rule = rules.last().unwrap();
        assert_eq!(
            self_rule.resources,
            vec!["fireworksapps".to_string(), "fireworksapps/status".to_string()]
        );
        assert_eq!(self_rule.resource_names, vec!["demo".to_string()]);
    }

    #[tokio::test]
    async fn test_generation_is_deterministic() {
        let reqs = vec![
            requirement("", "secrets", "apps"),
            requirement("apps", "deployments", "apps"),
        ];
        let mut reversed = reqs.clone();
        reversed.reverse();

        let a = generator(reqs).generate("base", &params()).await.unwrap();
        let b = generator(reversed).generate("base", &params()).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected() {
        let gen = RbacGenerator::new("", "", Arc::new(StaticChartInspector::new(Vec::new())));
        let result = gen.generate("base", &params()).await;
        assert!(matches!(result, Err(Error::Permission { .. })));
    }

    #[tokio::test]
    async fn test_bindings_use_configured_service_account() {
        let config = ControllerConfig {
            service_account_name: "cdc-sa".to_string(),
            service_account_namespace: "platform".to_string(),
            ..ControllerConfig::default()
        };
        let gen = RbacGenerator::from_config(&config, Arc::new(StaticChartInspector::new(Vec::new())));
        let bundle = gen.generate("demo-1234", &params()).await.unwrap();

        let subjects: Vec<&Subject> = bundle
            .bindings()
            .flat_map(|binding| match binding {
                RbacObject::RoleBinding { subjects, .. }
                | RbacObject::ClusterRoleBinding { subjects, .. } => subjects.iter(),
                other => panic!("not a binding: {}", other.kind()),
            })
            .collect();

        assert!(!subjects.is_empty());
        assert!(subjects
            .iter()
            .all(|s| s.name == "cdc-sa" && s.namespace == "platform"));
    }
}
