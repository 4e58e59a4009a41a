//! Provider-native config for CloudBucket-backed locations
//!
//! A location that references a CloudBucket gets its Velero config from two
//! places: values derived from the CloudBucket (region, the AWS shared-config
//! flag, recognized provider keys from its `config`) and the location's own
//! `config` overrides. Overrides always win key by key.

use std::collections::BTreeMap;

use cairn_common::crd::{CloudBucketSpec, CloudProvider};

/// Velero AWS plugin config keys
pub const AWS_KEYS: &[&str] = &[
    "region",
    "profile",
    "s3ForcePathStyle",
    "s3Url",
    "checksumAlgorithm",
    "enableSharedConfig",
    "insecureSkipTLSVerify",
];

/// Velero Azure plugin config keys
pub const AZURE_KEYS: &[&str] = &["resourceGroup", "storageAccount", "subscriptionId", "region"];

/// Velero GCP plugin config keys
pub const GCP_KEYS: &[&str] = &["project", "snapshotLocation"];

/// Config keys a provider's Velero plugin understands
pub fn provider_keys(provider: CloudProvider) -> &'static [&'static str] {
    match provider {
        CloudProvider::Aws => AWS_KEYS,
        CloudProvider::Azure => AZURE_KEYS,
        CloudProvider::Gcp => GCP_KEYS,
    }
}

/// Build the Velero config for a location backed by `bucket`.
///
/// Keys in `overrides` are copied unchanged; everything else is filled from
/// the CloudBucket. AWS configs always carry `checksumAlgorithm`, empty
/// unless set, so the plugin does not pick its own default.
pub fn map_config(
    bucket: &CloudBucketSpec,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let provider = bucket.provider;
    let keys = provider_keys(provider);

    let mut config: BTreeMap<String, String> = bucket
        .config
        .iter()
        .filter(|(k, _)| keys.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let region = bucket.region.as_deref().map(str::trim).filter(|r| !r.is_empty());
    match provider {
        CloudProvider::Aws => {
            if let Some(region) = region {
                config.insert("region".to_string(), region.to_string());
            }
            if let Some(shared) = bucket.enable_shared_config {
                config.insert("enableSharedConfig".to_string(), shared.to_string());
            }
        }
        CloudProvider::Azure => {
            if let Some(region) = region {
                config.insert("region".to_string(), region.to_string());
            }
        }
        // GCS location is fixed at bucket creation
        CloudProvider::Gcp => {}
    }

    for (k, v) in overrides {
        config.insert(k.clone(), v.clone());
    }

    if provider == CloudProvider::Aws {
        config
            .entry("checksumAlgorithm".to_string())
            .or_insert_with(String::new);
    }
    config
}
