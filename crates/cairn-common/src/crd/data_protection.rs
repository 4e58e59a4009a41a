//! DataProtection Custom Resource Definition
//!
//! The parent resource for backup storage locations. Each entry in
//! `backupLocations` is a [`LocationIntent`]: either a complete inline
//! Velero spec or a reference to a [`CloudBucket`](super::CloudBucket) with
//! local overrides. The two sources are mutually exclusive. On the wire a
//! [`BackupLocation`] carries them as two optional fields so that a bad entry
//! still deserializes; converting it into a [`LocationIntent`] rejects
//! entries that set both or neither.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, SecretKeyRef};
use crate::velero::BackupStorageLocationSpec;
use crate::Error;

/// Feature flag disabling the default-credential requirement
pub const FEATURE_NO_SECRET: &str = "no-secret";

/// Reference to a CloudBucket in the parent's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CloudBucketRef {
    /// CloudBucket name
    pub name: String,
}

/// A backup location built from a CloudBucket plus local overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketRef {
    /// The CloudBucket providing bucket name, provider, and region
    pub cloud_bucket_ref: CloudBucketRef,

    /// Config overrides; keys set here win over CloudBucket-derived values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,

    /// Credential override; defaults to the provider's namespace-wide Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<SecretKeyRef>,

    /// Whether Velero should treat this location as its default
    #[serde(default)]
    pub default: bool,

    /// How often Velero syncs backups from object storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_sync_period: Option<String>,

    /// Prefix within the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// PEM-encoded CA bundle for the storage endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub ca_cert: Option<ByteString>,
}

/// Where a location's configuration comes from
#[derive(Clone, Debug, PartialEq)]
pub enum LocationSource {
    /// A complete Velero BackupStorageLocation spec
    Inline(BackupStorageLocationSpec),
    /// A CloudBucket reference with overrides
    Bucket(BucketRef),
}

impl LocationSource {
    /// The source named by the two optional wire fields, exactly one of which
    /// must be set
    pub fn from_parts(
        velero: Option<BackupStorageLocationSpec>,
        bucket: Option<BucketRef>,
    ) -> Result<Self, &'static str> {
        match (velero, bucket) {
            (Some(spec), None) => Ok(Self::Inline(spec)),
            (None, Some(bucket)) => Ok(Self::Bucket(bucket)),
            (Some(_), Some(_)) => Err("velero and bucket are mutually exclusive; set exactly one"),
            (None, None) => Err("one of velero or bucket must be set"),
        }
    }
}

/// One user-declared backup storage location, validated
#[derive(Clone, Debug, PartialEq)]
pub struct LocationIntent {
    /// Explicit target name; generated from the parent when absent
    pub name: Option<String>,
    /// Configuration source
    pub source: LocationSource,
}

impl LocationIntent {
    /// Intent for an inline Velero spec
    pub fn inline(name: Option<String>, spec: BackupStorageLocationSpec) -> Self {
        Self {
            name,
            source: LocationSource::Inline(spec),
        }
    }

    /// Intent referencing a CloudBucket
    pub fn bucket(name: Option<String>, bucket: BucketRef) -> Self {
        Self {
            name,
            source: LocationSource::Bucket(bucket),
        }
    }

    /// Build an intent from the two optional wire fields
    ///
    /// Exactly one of `velero` and `bucket` must be set.
    pub fn from_parts(
        name: Option<String>,
        velero: Option<BackupStorageLocationSpec>,
        bucket: Option<BucketRef>,
    ) -> Result<Self, Error> {
        match LocationSource::from_parts(velero, bucket) {
            Ok(source) => Ok(Self { name, source }),
            Err(message) => Err(Error::validation_for(
                name.unwrap_or_else(|| "backup location".to_string()),
                message,
            )),
        }
    }

    /// The user-facing default flag of this intent
    pub fn default_flag(&self) -> bool {
        match &self.source {
            LocationSource::Inline(spec) => spec.default.unwrap_or(false),
            LocationSource::Bucket(bucket) => bucket.default,
        }
    }
}

/// A `spec.backupLocations` entry as written by the user
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupLocation {
    /// Explicit location name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Inline Velero BackupStorageLocation spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velero: Option<BackupStorageLocationSpec>,
    /// CloudBucket reference with overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<BucketRef>,
}

impl TryFrom<BackupLocation> for LocationIntent {
    type Error = Error;

    fn try_from(raw: BackupLocation) -> Result<Self, Self::Error> {
        Self::from_parts(raw.name, raw.velero, raw.bucket)
    }
}

impl From<LocationIntent> for BackupLocation {
    fn from(intent: LocationIntent) -> Self {
        let mut raw = BackupLocation {
            name: intent.name,
            ..Default::default()
        };
        match intent.source {
            LocationSource::Inline(spec) => raw.velero = Some(spec),
            LocationSource::Bucket(bucket) => raw.bucket = Some(bucket),
        }
        raw
    }
}

/// Specification for a DataProtection parent
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cairn.dev",
    version = "v1alpha1",
    kind = "DataProtection",
    plural = "dataprotections",
    shortname = "dp",
    namespaced,
    status = "DataProtectionStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DataProtectionSpec {
    /// Ordered backup location intents
    #[serde(default)]
    pub backup_locations: Vec<BackupLocation>,

    /// Whether container images are backed up; defaults to true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_images: Option<bool>,

    /// Feature flags (e.g. "no-secret")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_flags: Vec<String>,
}

impl DataProtectionSpec {
    /// Whether image backup is enabled
    pub fn backup_images_enabled(&self) -> bool {
        self.backup_images.unwrap_or(true)
    }

    /// Whether credentials may be omitted entirely
    pub fn no_secret(&self) -> bool {
        self.feature_flags.iter().any(|f| f == FEATURE_NO_SECRET)
    }
}

/// Status of a DataProtection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataProtectionStatus {
    /// Names of the BackupStorageLocations written by the last reconcile
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<String>,

    /// Name of the CA bundle ConfigMap, when any location carries a CA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::velero::ObjectStorageLocation;

    fn parse_spec(value: serde_json::Value) -> Result<DataProtectionSpec, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn parses_inline_and_bucket_intents() {
        let spec = parse_spec(serde_json::json!({
            "backupLocations": [
                {
                    "name": "primary",
                    "velero": {
                        "provider": "aws",
                        "objectStorage": {"bucket": "test-aws-bucket", "prefix": "velero"},
                        "config": {"region": "us-east-1"},
                        "default": true
                    }
                },
                {
                    "bucket": {
                        "cloudBucketRef": {"name": "azure-bucket"},
                        "config": {"storageAccount": "mystorageaccount"},
                        "prefix": "velero"
                    }
                }
            ],
            "featureFlags": ["no-secret"]
        }))
        .unwrap();

        let intents: Vec<LocationIntent> = spec
            .backup_locations
            .iter()
            .cloned()
            .map(LocationIntent::try_from)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(intents.len(), 2);
        assert_eq!(intents[0].name.as_deref(), Some("primary"));
        assert!(intents[0].default_flag());
        match &intents[1].source {
            LocationSource::Bucket(b) => assert_eq!(b.cloud_bucket_ref.name, "azure-bucket"),
            other => panic!("expected bucket source, got {other:?}"),
        }
        assert!(spec.no_secret());
        assert!(spec.backup_images_enabled());
    }

    #[test]
    fn malformed_entries_still_deserialize() {
        let items: Vec<DataProtection> = serde_json::from_value(serde_json::json!([
            {
                "apiVersion": "cairn.dev/v1alpha1",
                "kind": "DataProtection",
                "metadata": {"name": "good", "namespace": "velero"},
                "spec": {"backupLocations": [{"bucket": {"cloudBucketRef": {"name": "b"}}}]}
            },
            {
                "apiVersion": "cairn.dev/v1alpha1",
                "kind": "DataProtection",
                "metadata": {"name": "bad", "namespace": "velero"},
                "spec": {"backupLocations": [{"name": "x"}]}
            }
        ]))
        .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].spec.backup_locations[0].name.as_deref(), Some("x"));
    }

    #[test]
    fn conversion_rejects_both_or_neither_source() {
        let both = BackupLocation {
            velero: Some(BackupStorageLocationSpec::default()),
            bucket: Some(BucketRef::default()),
            ..Default::default()
        };
        let err = LocationIntent::try_from(both).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));

        let neither = BackupLocation {
            name: Some("empty".to_string()),
            ..Default::default()
        };
        let err = LocationIntent::try_from(neither).unwrap_err();
        assert!(err.to_string().contains("one of velero or bucket"));
    }

    #[test]
    fn from_parts_enforces_exactly_one_source() {
        let spec = BackupStorageLocationSpec {
            provider: "gcp".to_string(),
            object_storage: ObjectStorageLocation {
                bucket: "b".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(LocationIntent::from_parts(None, Some(spec.clone()), None).is_ok());
        assert!(LocationIntent::from_parts(None, None, Some(BucketRef::default())).is_ok());
        assert!(
            LocationIntent::from_parts(None, Some(spec), Some(BucketRef::default())).is_err()
        );
        assert!(LocationIntent::from_parts(None, None, None).is_err());
    }

    #[test]
    fn intent_serializes_back_to_wire_shape() {
        let intent = LocationIntent::bucket(
            Some("loc".to_string()),
            BucketRef {
                cloud_bucket_ref: CloudBucketRef {
                    name: "cb".to_string(),
                },
                default: true,
                ..Default::default()
            },
        );
        let json = serde_json::to_value(BackupLocation::from(intent)).unwrap();
        assert_eq!(json["name"], "loc");
        assert_eq!(json["bucket"]["cloudBucketRef"]["name"], "cb");
        assert!(json.get("velero").is_none());
    }
}
