//! CloudBucket Custom Resource Definition
//!
//! A CloudBucket describes one bucket or container at a cloud provider:
//! where it lives, how it is tagged, and which Secret holds the credentials
//! used to create it. Backup locations reference it by name.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{CloudProvider, Condition, SecretKeyRef};

/// Condition type reporting whether the cloud bucket exists
pub const CONDITION_BUCKET_READY: &str = "BucketReady";

/// The bucket was created by the last reconcile
pub const REASON_BUCKET_CREATED: &str = "BucketCreated";

/// The bucket already existed
pub const REASON_BUCKET_READY: &str = "BucketReady";

/// The bucket could not be created
pub const REASON_BUCKET_CREATION_FAILED: &str = "BucketCreationFailed";

/// Specification for a CloudBucket
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cairn.dev",
    version = "v1alpha1",
    kind = "CloudBucket",
    plural = "cloudbuckets",
    shortname = "cb",
    namespaced,
    status = "CloudBucketStatus",
    printcolumn = r#"{"name":"Bucket","type":"string","jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudBucketSpec {
    /// Bucket (or Azure container) name at the provider
    pub name: String,

    /// Cloud provider hosting the bucket
    pub provider: CloudProvider,

    /// Region or location of the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Provider-specific configuration (e.g. storageAccount, resourceGroup)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,

    /// Tags (AWS), metadata (Azure), or labels (GCS) applied at creation
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// Secret holding the credentials used to create and delete the bucket
    pub creation_secret: SecretKeyRef,

    /// Whether the AWS shared config file should be honoured by consumers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_shared_config: Option<bool>,
}

/// Status of a CloudBucket
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudBucketStatus {
    /// Name of the bucket at the provider, once it exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Last time the bucket was confirmed or created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl CloudBucket {
    /// The delete-confirmation annotation value, if set
    pub fn delete_annotation(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(crate::CLOUD_BUCKET_DELETE_ANNOTATION))
            .map(String::as_str)
    }

    /// Whether this CloudBucket carries the cairn finalizer
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == crate::CLOUD_BUCKET_FINALIZER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_parses_from_json() {
        let spec: CloudBucketSpec = serde_json::from_value(serde_json::json!({
            "name": "cairn-backups",
            "provider": "aws",
            "region": "us-east-1",
            "tags": {"team": "storage"},
            "creationSecret": {"name": "cloud-credentials", "key": "cloud"}
        }))
        .unwrap();

        assert_eq!(spec.provider, CloudProvider::Aws);
        assert_eq!(spec.region.as_deref(), Some("us-east-1"));
        assert_eq!(spec.tags.get("team").map(String::as_str), Some("storage"));
        assert_eq!(spec.creation_secret.key, "cloud");
        assert!(spec.config.is_empty());
    }

    #[test]
    fn annotation_and_finalizer_helpers() {
        let mut bucket = CloudBucket::new(
            "backups",
            CloudBucketSpec {
                name: "cairn-backups".to_string(),
                provider: CloudProvider::Gcp,
                region: None,
                config: BTreeMap::new(),
                tags: BTreeMap::new(),
                creation_secret: SecretKeyRef::new("cloud-credentials-gcp", "cloud"),
                enable_shared_config: None,
            },
        );
        assert_eq!(bucket.delete_annotation(), None);
        assert!(!bucket.has_finalizer());

        bucket.metadata.annotations = Some(BTreeMap::from([(
            crate::CLOUD_BUCKET_DELETE_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
        bucket.metadata.finalizers = Some(vec![crate::CLOUD_BUCKET_FINALIZER.to_string()]);
        assert_eq!(bucket.delete_annotation(), Some("true"));
        assert!(bucket.has_finalizer());
    }
}
