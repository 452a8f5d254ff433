//! Object shapes a manifest can be decoded into.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity fields every decodable manifest object exposes.
pub trait ManifestObject {
    fn api_version(&self) -> &str;
    fn kind(&self) -> &str;
    fn name(&self) -> &str;
    fn namespace(&self) -> &str;
    fn annotations(&self) -> BTreeMap<String, String>;

    fn set_name(&mut self, name: &str);
    fn set_namespace(&mut self, namespace: &str);
    fn set_annotations(&mut self, annotations: BTreeMap<String, String>);
}

/// Object metadata subset kept by [`MinimalMetadata`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Kept so package-manager hook annotations survive decoding.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Only the fields needed for managed-resource references.
///
/// Decoding into this struct skips every other field of the document, which
/// is much cheaper than building a full JSON tree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinimalMetadata {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl MinimalMetadata {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: Metadata {
                name: name.into(),
                namespace: namespace.into(),
                annotations: BTreeMap::new(),
            },
        }
    }
}

impl ManifestObject for MinimalMetadata {
    fn api_version(&self) -> &str {
        &self.api_version
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.metadata.name
    }

    fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        self.metadata.annotations.clone()
    }

    fn set_name(&mut self, name: &str) {
        self.metadata.name = name.to_string();
    }

    fn set_namespace(&mut self, namespace: &str) {
        self.metadata.namespace = namespace.to_string();
    }

    fn set_annotations(&mut self, annotations: BTreeMap<String, String>) {
        self.metadata.annotations = annotations;
    }
}

/// A fully decoded object, kept as a JSON tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnstructuredObject {
    pub object: Map<String, Value>,
}

impl UnstructuredObject {
    fn top_str(&self, key: &str) -> &str {
        self.object.get(key).and_then(Value::as_str).unwrap_or("")
    }

    fn metadata_str(&self, key: &str) -> &str {
        self.object
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    fn metadata_mut(&mut self) -> Option<&mut Map<String, Value>> {
        let entry = self
            .object
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        entry.as_object_mut()
    }
}

impl ManifestObject for UnstructuredObject {
    fn api_version(&self) -> &str {
        self.top_str("apiVersion")
    }

    fn kind(&self) -> &str {
        self.top_str("kind")
    }

    fn name(&self) -> &str {
        self.metadata_str("name")
    }

    fn namespace(&self) -> &str {
        self.metadata_str("namespace")
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        self.object
            .get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_name(&mut self, name: &str) {
        if let Some(metadata) = self.metadata_mut() {
            metadata.insert("name".to_string(), Value::String(name.to_string()));
        }
    }

    fn set_namespace(&mut self, namespace: &str) {
        let Some(metadata) = self.metadata_mut() else {
            return;
        };
        if namespace.is_empty() {
            metadata.remove("namespace");
        } else {
            metadata.insert(
                "namespace".to_string(),
                Value::String(namespace.to_string()),
            );
        }
    }

    fn set_annotations(&mut self, annotations: BTreeMap<String, String>) {
        let map = annotations
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        if let Some(metadata) = self.metadata_mut() {
            metadata.insert("annotations".to_string(), Value::Object(map));
        }
    }
}
