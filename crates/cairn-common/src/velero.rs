//! Velero resource types
//!
//! Typed structs for the Velero BackupStorageLocation, the object cairn
//! ultimately writes for every location intent. `BackupStorageLocationSpec`
//! is also embedded verbatim in `DataProtection` for inline locations, so it carries
//! a JSON schema.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::SecretKeyRef;
use crate::kube_utils::{HasApiResource, ObjectMeta};

/// API group version of the Velero resources cairn writes
pub const VELERO_API_VERSION: &str = "velero.io/v1";

const BSL_KIND: &str = "BackupStorageLocation";

fn velero_api_version() -> String {
    VELERO_API_VERSION.to_string()
}

fn bsl_kind() -> String {
    BSL_KIND.to_string()
}

/// A BackupStorageLocation as cairn reads and writes it.
///
/// Only metadata cairn manages is kept; `status` and server-populated
/// metadata beyond `resourceVersion` are dropped on read.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStorageLocation {
    #[serde(default = "velero_api_version")]
    #[allow(missing_docs)]
    pub api_version: String,
    #[serde(default = "bsl_kind")]
    #[allow(missing_docs)]
    pub kind: String,
    #[allow(missing_docs)]
    pub metadata: ObjectMeta,
    #[allow(missing_docs)]
    pub spec: BackupStorageLocationSpec,
}

impl HasApiResource for BackupStorageLocation {
    const API_VERSION: &'static str = VELERO_API_VERSION;
    const KIND: &'static str = BSL_KIND;
}

impl BackupStorageLocation {
    /// A location carrying cairn's base labels and no owner
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        spec: BackupStorageLocationSpec,
    ) -> Self {
        Self {
            api_version: velero_api_version(),
            kind: bsl_kind(),
            metadata: ObjectMeta::new(name, namespace),
            spec,
        }
    }
}

/// Where and how Velero stores backups for one location
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStorageLocationSpec {
    /// Velero object store plugin, e.g. `aws` or `velero.io/azure`
    pub provider: String,
    #[allow(missing_docs)]
    pub object_storage: ObjectStorageLocation,
    /// Plugin config such as `region`, `s3Url`, or `storageAccount`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
    /// Secret key holding the plugin's credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<SecretKeyRef>,
    /// Velero settles which single location is the default and may flip this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<bool>,
    /// Velero duration string, e.g. `2m0s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_sync_period: Option<String>,
    /// Spec fields cairn does not manage, such as `accessMode` or
    /// `validationFrequency`; carried over from the live object on update
    #[serde(flatten)]
    #[schemars(skip)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// Bucket, prefix, and CA of one location
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStorageLocation {
    /// Bucket or container name
    pub bucket: String,
    /// Key prefix for everything Velero writes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// PEM certificates trusted for the storage endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub ca_cert: Option<ByteString>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bsl() -> BackupStorageLocation {
        BackupStorageLocation::new(
            "dpa-sample-1",
            "velero",
            BackupStorageLocationSpec {
                provider: "aws".to_string(),
                object_storage: ObjectStorageLocation {
                    bucket: "cairn-backups".to_string(),
                    prefix: Some("velero".to_string()),
                    ca_cert: Some(ByteString(b"-----BEGIN CERTIFICATE-----".to_vec())),
                },
                config: BTreeMap::from([("region".to_string(), "us-east-1".to_string())]),
                credential: Some(SecretKeyRef::new("cloud-credentials", "cloud")),
                default: Some(true),
                backup_sync_period: Some("2m0s".to_string()),
                other: BTreeMap::new(),
            },
        )
    }

    #[test]
    fn serializes_to_velero_wire_format() {
        let json = serde_json::to_value(sample_bsl()).unwrap();

        assert_eq!(json["apiVersion"], "velero.io/v1");
        assert_eq!(json["kind"], "BackupStorageLocation");
        assert_eq!(json["metadata"]["name"], "dpa-sample-1");
        assert_eq!(json["spec"]["objectStorage"]["bucket"], "cairn-backups");
        assert_eq!(json["spec"]["backupSyncPeriod"], "2m0s");
        assert_eq!(json["spec"]["credential"]["key"], "cloud");
        // ByteString fields travel base64-encoded
        assert!(json["spec"]["objectStorage"]["caCert"]
            .as_str()
            .unwrap()
            .starts_with("LS0tLS1"));
    }

    #[test]
    fn server_objects_parse_with_unknown_fields() {
        let json = serde_json::json!({
            "apiVersion": "velero.io/v1",
            "kind": "BackupStorageLocation",
            "metadata": {
                "name": "dpa-sample-1",
                "namespace": "velero",
                "uid": "1234",
                "resourceVersion": "42",
                "creationTimestamp": "2026-01-01T00:00:00Z"
            },
            "spec": {
                "provider": "aws",
                "objectStorage": {"bucket": "cairn-backups"},
                "default": true
            },
            "status": {"phase": "Available"}
        });
        let bsl: BackupStorageLocation = serde_json::from_value(json).unwrap();
        assert_eq!(bsl.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(bsl.spec.default, Some(true));
        assert!(bsl.spec.config.is_empty());
        assert!(!bsl.metadata.other.contains_key("resourceVersion"));
        assert!(!bsl.spec.other.contains_key("default"));
    }

    #[test]
    fn unmanaged_fields_survive_a_round_trip() {
        let json = serde_json::json!({
            "apiVersion": "velero.io/v1",
            "kind": "BackupStorageLocation",
            "metadata": {
                "name": "dpa-sample-1",
                "namespace": "velero",
                "finalizers": ["example.com/protect"],
                "resourceVersion": "42"
            },
            "spec": {
                "provider": "aws",
                "objectStorage": {"bucket": "cairn-backups"},
                "accessMode": "ReadOnly",
                "validationFrequency": "1m0s"
            }
        });
        let bsl: BackupStorageLocation = serde_json::from_value(json).unwrap();
        assert_eq!(bsl.spec.other["accessMode"], "ReadOnly");

        let back = serde_json::to_value(&bsl).unwrap();
        assert_eq!(back["metadata"]["finalizers"][0], "example.com/protect");
        assert_eq!(back["spec"]["accessMode"], "ReadOnly");
        assert_eq!(back["spec"]["validationFrequency"], "1m0s");
    }

    #[test]
    fn unset_optionals_are_omitted() {
        let bsl = BackupStorageLocation::new(
            "minimal",
            "velero",
            BackupStorageLocationSpec {
                provider: "gcp".to_string(),
                object_storage: ObjectStorageLocation {
                    bucket: "my-bucket".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let json = serde_json::to_string(&bsl).unwrap();
        assert!(!json.contains("prefix"));
        assert!(!json.contains("credential"));
        assert!(!json.contains("\"default\""));
    }
}
