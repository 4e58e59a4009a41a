//! Shared Kubernetes utilities using kube-rs
//!
//! Metadata construction with the standard cairn label set, typed API
//! resource lookup for foreign CRDs (Velero), and small Secret helpers.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::discovery::ApiResource;

// =============================================================================
// ObjectMeta - Canonical metadata for objects cairn writes
// =============================================================================

/// Kubernetes ObjectMeta for objects cairn writes.
///
/// Automatically adds the name, instance, and managed-by labels on
/// construction. `resource_version` is only populated on objects read back
/// from the API server and is required for optimistic-concurrency replaces;
/// any other server-side metadata lands in `other` and survives a replace.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Owner references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// Server-assigned version, echoed back on replace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Metadata cairn does not model (finalizers, uid, ...), written back unchanged
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl ObjectMeta {
    /// Create new metadata with standard cairn labels
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let name = name.into();
        let mut labels = BTreeMap::new();
        labels.insert(crate::LABEL_NAME.to_string(), crate::LABEL_NAME_CAIRN.to_string());
        labels.insert(crate::LABEL_INSTANCE.to_string(), name.clone());
        labels.insert(
            crate::LABEL_MANAGED_BY.to_string(),
            crate::LABEL_MANAGED_BY_CAIRN.to_string(),
        );
        Self {
            name,
            namespace: namespace.into(),
            labels,
            ..Default::default()
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add an owner reference
    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner_references.push(owner);
        self
    }
}

/// Build the full label set for an object owned by a parent resource
///
/// Adds the component label and both operator identity labels to the
/// standard set produced by [`ObjectMeta::new`].
pub fn owned_labels(name: &str, component: &str, owner: &str) -> BTreeMap<String, String> {
    let mut labels = ObjectMeta::new(name, "").labels;
    labels.insert(crate::LABEL_COMPONENT.to_string(), component.to_string());
    labels.insert(crate::LABEL_OPERATOR.to_string(), "True".to_string());
    labels.insert(crate::LABEL_OWNER.to_string(), owner.to_string());
    labels
}

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for types that have a known API group, version, and kind.
///
/// Implement this for foreign CRD types (e.g. Velero) to derive their
/// `ApiResource` from internal constants, keeping serialization and API
/// calls consistent.
pub trait HasApiResource {
    /// Full API version (e.g., "velero.io/v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "BackupStorageLocation")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from an apiVersion string and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into (group, version); core types have an empty group
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Lowercase plural of a kind, as used in REST paths
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') {
        format!("{}es", lower)
    } else if let Some(stem) = lower.strip_suffix('y') {
        format!("{}ies", stem)
    } else {
        format!("{}s", lower)
    }
}

// =============================================================================
// Secrets and annotations
// =============================================================================

/// Flatten a Secret's `data` and `stringData` into raw bytes per key
///
/// `stringData` wins on conflict, matching API server semantics on write.
pub fn secret_data(secret: &Secret) -> BTreeMap<String, Vec<u8>> {
    let mut out: BTreeMap<String, Vec<u8>> = secret
        .data
        .as_ref()
        .map(|d| d.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
        .unwrap_or_default();
    if let Some(ref string_data) = secret.string_data {
        for (k, v) in string_data {
            out.insert(k.clone(), v.clone().into_bytes());
        }
    }
    out
}

/// Parse a boolean annotation value.
///
/// Accepts 1, t, T, TRUE, true, True, 0, f, F, FALSE, false, False.
pub fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => Err(format!("invalid boolean value {:?}", other)),
    }
}

/// `namespace/name` for logs and error context
pub fn namespaced_name(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
