//! Chart values built from a record, and the label post-renderer.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::composition::{Composition, GroupVersionResource};
use crate::error::{Error, Result};
use crate::meta;

pub const LABEL_COMPOSITION_ID: &str = "krateo.io/composition-id";
pub const LABEL_COMPOSITION_NAME: &str = "krateo.io/composition-name";
pub const LABEL_COMPOSITION_NAMESPACE: &str = "krateo.io/composition-namespace";
pub const LABEL_COMPOSITION_GROUP: &str = "krateo.io/composition-group";
pub const LABEL_COMPOSITION_VERSION: &str = "krateo.io/composition-version";
pub const LABEL_COMPOSITION_RESOURCE: &str = "krateo.io/composition-resource";
pub const LABEL_MANAGEMENT_NAMESPACE: &str = "krateo.io/management-namespace";

const GLOBAL_KEY: &str = "global";

/// Chart values: the record's spec plus injected globals.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Values(Map<String, Value>);

impl Values {
    /// Values taken verbatim from `spec`. A missing spec gives empty values.
    ///
    /// # Errors
    ///
    /// Returns error if `spec` is present but not an object.
    pub fn from_spec(composition: &Composition) -> Result<Self> {
        match &composition.spec {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Ok(Self(map.clone())),
            other => Err(Error::invalid_record(format!(
                "spec of {} must be an object, got {other}",
                composition.key()
            ))),
        }
    }

    /// Merge composition identity under `global`. Keys the user already set
    /// under `global` are left alone.
    ///
    /// # Errors
    ///
    /// Returns error if the user's `global` is not an object.
    pub fn inject_global_values(
        &mut self,
        composition: &Composition,
        gvr: &GroupVersionResource,
        krateo_namespace: &str,
    ) -> Result<()> {
        let gvk = composition.gvk();
        let defaults = [
            ("compositionId", Value::from(composition.uid())),
            ("compositionName", Value::from(composition.name())),
            ("compositionNamespace", Value::from(composition.namespace())),
            ("compositionApiVersion", Value::from(composition.api_version.as_str())),
            ("compositionGroup", Value::from(gvk.group.as_str())),
            ("compositionResource", Value::from(gvr.resource.as_str())),
            ("compositionKind", Value::from(composition.kind.as_str())),
            ("krateoNamespace", Value::from(krateo_namespace)),
            (
                "gracefullyPaused",
                Value::from(meta::is_gracefully_paused(composition)),
            ),
        ];

        let global = self
            .0
            .entry(GLOBAL_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(global) = global.as_object_mut() else {
            return Err(Error::invalid_record(format!(
                "spec.global of {} must be an object",
                composition.key()
            )));
        };

        for (key, value) in defaults {
            global.entry(key).or_insert(value);
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Stamps composition identity labels onto every rendered object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelPostRenderer {
    labels: BTreeMap<String, String>,
}

impl LabelPostRenderer {
    #[must_use]
    pub fn from_composition(
        composition: &Composition,
        gvr: &GroupVersionResource,
        krateo_namespace: &str,
    ) -> Self {
        let labels = [
            (LABEL_COMPOSITION_ID, composition.uid()),
            (LABEL_COMPOSITION_NAME, composition.name()),
            (LABEL_COMPOSITION_NAMESPACE, composition.namespace()),
            (LABEL_COMPOSITION_GROUP, gvr.group.as_str()),
            (LABEL_COMPOSITION_VERSION, gvr.version.as_str()),
            (LABEL_COMPOSITION_RESOURCE, gvr.resource.as_str()),
            (LABEL_MANAGEMENT_NAMESPACE, krateo_namespace),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self { labels }
    }

    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Add the labels to each object document and re-emit the stream.
    ///
    /// Empty documents are dropped. Existing labels with the same keys are
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns error if a document is malformed or cannot be re-encoded.
    pub fn render(&self, manifest: &str) -> Result<String> {
        let mut rendered = Vec::new();

        for document in serde_yaml::Deserializer::from_str(manifest) {
            let decoded = Option::<Value>::deserialize(document)
                .map_err(|e| Error::post_render(e.to_string()))?;
            let Some(mut object) = decoded else {
                continue;
            };
            self.stamp(&mut object);
            rendered
                .push(serde_yaml::to_string(&object).map_err(|e| Error::post_render(e.to_string()))?);
        }

        Ok(rendered.join("---\n"))
    }

    fn stamp(&self, object: &mut Value) {
        let Some(root) = object.as_object_mut() else {
            return;
        };
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(metadata) = metadata.as_object_mut() else {
            return;
        };
        let labels = metadata
            .entry("labels")
            .or_insert_with(|| Value::Object(Map::new()));
        if !labels.is_object() {
            *labels = Value::Object(Map::new());
        }
        if let Some(labels) = labels.as_object_mut() {
            for (k, v) in &self.labels {
                labels.insert(k.clone(), Value::String(v.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    fn record() -> Composition {
        Composition::new("composition.krateo.io/v1-2-0", "FireworksApp", "demo", "apps")
            .with_uid("uid-1")
    }

    fn gvr() -> GroupVersionResource {
        GroupVersionResource::new("composition.krateo.io", "v1-2-0", "fireworksapps")
    }

    #[test]
    fn test_missing_spec_gives_empty_values() {
        let values = Values::from_spec(&record()).unwrap();
        assert_eq!(values.into_value(), json!({}));
    }

    #[test]
    fn test_non_object_spec_is_rejected() {
        let record = record().with_spec(json!([1, 2]));
        assert!(matches!(
            Values::from_spec(&record),
            Err(Error::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_global_values_injected() {
        let record = record().with_spec(json!({"replicas": 2}));
        let mut values = Values::from_spec(&record).unwrap();
        values
            .inject_global_values(&record, &gvr(), "krateo-system")
            .unwrap();

        let value = values.into_value();
        assert_eq!(value["replicas"], 2);
        assert_eq!(value["global"]["compositionId"], "uid-1");
        assert_eq!(value["global"]["compositionGroup"], "composition.krateo.io");
        assert_eq!(value["global"]["compositionResource"], "fireworksapps");
        assert_eq!(value["global"]["krateoNamespace"], "krateo-system");
        assert_eq!(value["global"]["gracefullyPaused"], false);
    }

    #[test]
    fn test_user_global_values_win() {
        let record = record().with_spec(json!({"global": {"compositionName": "custom"}}));
        let mut values = Values::from_spec(&record).unwrap();
        values
            .inject_global_values(&record, &gvr(), "krateo-system")
            .unwrap();

        let value = values.into_value();
        assert_eq!(value["global"]["compositionName"], "custom");
        assert_eq!(value["global"]["compositionNamespace"], "apps");
    }

    #[test]
    fn test_post_renderer_stamps_every_document() {
        let renderer = LabelPostRenderer::from_composition(&record(), &gvr(), "krateo-system");
        let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  labels:\n    app: web\n---\n# empty\n---\napiVersion: v1\nkind: Service\nmetadata:\n  name: b\n";

        let rendered = renderer.render(manifest).unwrap();
        let (objects, _) =
            composition_digest::decode_manifest::<composition_digest::UnstructuredObject>(
                &rendered,
            )
            .unwrap();

        assert_eq!(objects.len(), 2);
        for object in &objects {
            let labels = &object.object["metadata"]["labels"];
            assert_eq!(labels[LABEL_COMPOSITION_ID], "uid-1");
            assert_eq!(labels[LABEL_MANAGEMENT_NAMESPACE], "krateo-system");
        }
        assert_eq!(objects[0].object["metadata"]["labels"]["app"], "web");
    }
}
