//! Managed-resource references for the objects a release created.

use composition_digest::{ManifestObject, MinimalMetadata};
use tracing::debug;

use crate::composition::{GroupVersionKind, GroupVersionResource, ManagedResource};
use crate::error::Result;
use crate::ports::ResourceMapper;

/// Resolve each descriptor to its plural type and scope.
///
/// Cluster-scoped objects lose their namespace. The first lookup failure
/// aborts the whole batch.
///
/// # Errors
///
/// Returns the mapper error, with the failing object's identity as context.
pub async fn populate_managed_resources(
    mapper: &dyn ResourceMapper,
    resources: &[MinimalMetadata],
) -> Result<Vec<ManagedResource>> {
    let mut managed = Vec::with_capacity(resources.len());

    for reference in resources {
        let mut reference = reference.clone();
        let gvk =
            GroupVersionKind::from_api_version_and_kind(reference.api_version(), reference.kind());

        let gvr = mapper.gvk_to_gvr(&gvk).await.map_err(|e| {
            e.context(format!(
                "getting GVR for {}/{} with name {} and namespace {}",
                reference.api_version(),
                reference.kind(),
                reference.name(),
                reference.namespace()
            ))
        })?;

        let namespaced = mapper
            .is_namespaced(&gvk)
            .await
            .map_err(|e| e.context(format!("getting REST mapping for {gvk}")))?;
        if !namespaced {
            reference.set_namespace("");
        }

        let path = build_path(&gvr, reference.namespace(), reference.name());
        debug!(path = %path, "Resolved managed resource");

        managed.push(ManagedResource {
            api_version: reference.api_version().to_string(),
            resource: gvr.resource,
            name: reference.name().to_string(),
            namespace: reference.namespace().to_string(),
            path,
        });
    }

    Ok(managed)
}

/// Canonical API path of an object.
///
/// `/api/<v>` for the core group, `/apis/<group>/<v>` otherwise; the
/// namespace segment is omitted when `namespace` is empty.
#[must_use]
pub fn build_path(gvr: &GroupVersionResource, namespace: &str, name: &str) -> String {
    let prefix = if gvr.group.is_empty() {
        format!("/api/{}", gvr.version)
    } else {
        format!("/apis/{}/{}", gvr.group, gvr.version)
    };

    if namespace.is_empty() {
        format!("{prefix}/{}/{name}", gvr.resource)
    } else {
        format!("{prefix}/namespaces/{namespace}/{}/{name}", gvr.resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_path_namespaced_grouped() {
        let gvr = GroupVersionResource::new("apps", "v1", "deployments");
        assert_eq!(
            build_path(&gvr, "default", "test-deployment"),
            "/apis/apps/v1/namespaces/default/deployments/test-deployment"
        );
    }

    #[test]
    fn test_build_path_core_namespaced() {
        let gvr = GroupVersionResource::new("", "v1", "configmaps");
        assert_eq!(
            build_path(&gvr, "demo", "cm"),
            "/api/v1/namespaces/demo/configmaps/cm"
        );
    }

    #[test]
    fn test_build_path_cluster_scoped() {
        let gvr = GroupVersionResource::new("", "v1", "nodes");
        assert_eq!(build_path(&gvr, "", "test-node"), "/api/v1/nodes/test-node");
    }
}
