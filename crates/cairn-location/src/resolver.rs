//! Location resolution
//!
//! Turns one [`LocationIntent`] into a [`ResolvedLocation`]: the inline
//! Velero spec is taken as given, a CloudBucket reference is looked up and
//! merged with its overrides. Both then go through the same provider checks
//! and credential resolution, and the result is what the orchestrator writes
//! as a BackupStorageLocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use cairn_common::crd::{
    BucketRef, CloudProvider, DataProtection, LocationIntent, LocationSource, SecretKeyRef,
};
use cairn_common::error::UNKNOWN_CONTEXT;
use cairn_common::kube_utils::{namespaced_name, parse_bool};
use cairn_common::velero::{BackupStorageLocationSpec, ObjectStorageLocation};
use cairn_common::{Error, Settings};
use cairn_credentials::sts::sts_patch;
use cairn_credentials::{CredentialCache, CredentialResolver};
use k8s_openapi::ByteString;
use kube::ResourceExt;

use crate::ca_bundle::validate_ca_pem;
use crate::kube_client::LocationKubeClient;
use crate::mapper::map_config;
use crate::region::BucketRegionLocator;
use crate::validation::target_name;

/// A location intent merged into its provider-native form
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedLocation {
    /// BackupStorageLocation name
    pub name: String,
    /// Storage provider
    pub provider: CloudProvider,
    /// Bucket or container name
    pub bucket: String,
    /// Prefix within the bucket
    pub prefix: Option<String>,
    /// PEM CA certificate(s) for the storage endpoint
    pub ca_cert: Option<Vec<u8>>,
    /// Credential Secret key; None only when credentials are not required
    pub credential: Option<SecretKeyRef>,
    /// Provider-native Velero config
    pub config: BTreeMap<String, String>,
    /// Requested default flag
    pub default: bool,
    /// Velero backup sync period
    pub backup_sync_period: Option<String>,
}

impl ResolvedLocation {
    /// Read a Velero spec as a location named `name`, taking it as given
    pub fn from_spec(name: &str, spec: &BackupStorageLocationSpec) -> Result<Self, Error> {
        let provider: CloudProvider = spec
            .provider
            .parse()
            .map_err(|_| Error::unsupported_provider(format!("location {}", name), &spec.provider))?;
        Ok(Self {
            name: name.to_string(),
            provider,
            bucket: spec.object_storage.bucket.clone(),
            prefix: spec.object_storage.prefix.clone(),
            ca_cert: spec.object_storage.ca_cert.as_ref().map(|c| c.0.clone()),
            credential: spec.credential.clone(),
            config: spec.config.clone(),
            default: spec.default.unwrap_or(false),
            backup_sync_period: spec.backup_sync_period.clone(),
        })
    }

    /// The BackupStorageLocation spec for this location
    pub fn to_spec(&self) -> BackupStorageLocationSpec {
        BackupStorageLocationSpec {
            provider: self.provider.as_str().to_string(),
            object_storage: ObjectStorageLocation {
                bucket: self.bucket.clone(),
                prefix: self.prefix.clone(),
                ca_cert: self.ca_cert.clone().map(ByteString),
            },
            config: self.config.clone(),
            credential: self.credential.clone(),
            default: Some(self.default),
            backup_sync_period: self.backup_sync_period.clone(),
            other: BTreeMap::new(),
        }
    }
}

/// Parent-level inputs shared by every intent of one reconcile
#[derive(Clone, Debug)]
pub struct ResolveContext {
    /// Namespace of the parent and everything it references
    pub namespace: String,
    /// Parent name, used for generated location names
    pub parent: String,
    /// Whether image backup is enabled
    pub backup_images: bool,
    /// Whether credentials may be omitted
    pub no_secret: bool,
}

impl ResolveContext {
    /// Context for a DataProtection parent
    pub fn for_parent(parent: &DataProtection) -> Self {
        Self {
            namespace: parent.namespace().unwrap_or_default(),
            parent: parent.name_any(),
            backup_images: parent.spec.backup_images_enabled(),
            no_secret: parent.spec.no_secret(),
        }
    }

    /// `namespace/parent` for error context
    pub fn resource(&self) -> String {
        namespaced_name(&self.namespace, &self.parent)
    }
}

/// Resolves location intents against the cluster
pub struct ConfigResolver {
    kube: Arc<dyn LocationKubeClient>,
    regions: Arc<dyn BucketRegionLocator>,
    credentials: CredentialResolver,
    cache: Option<Arc<CredentialCache>>,
    settings: Settings,
}

impl ConfigResolver {
    /// Create a resolver
    pub fn new(
        kube: Arc<dyn LocationKubeClient>,
        regions: Arc<dyn BucketRegionLocator>,
        credentials: CredentialResolver,
        settings: Settings,
    ) -> Self {
        Self {
            kube,
            regions,
            credentials,
            cache: None,
            settings,
        }
    }

    /// Reuse parsed credentials across reconciles
    pub fn with_cache(mut self, cache: Arc<CredentialCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Resolve the intent at `index` of the parent described by `ctx`
    pub async fn resolve(
        &self,
        ctx: &ResolveContext,
        index: usize,
        intent: &LocationIntent,
    ) -> Result<ResolvedLocation, Error> {
        let field = format!("spec.backupLocations[{}]", index);
        let name = target_name(&ctx.parent, index, intent);

        let mut location = match &intent.source {
            LocationSource::Inline(spec) => ResolvedLocation::from_spec(&name, spec)?,
            LocationSource::Bucket(bucket) => self.from_bucket(ctx, &field, &name, bucket).await?,
        };
        let provider = location.provider;

        if location.bucket.trim().is_empty() {
            return Err(Error::validation_for_field(
                ctx.resource(),
                format!("{}.bucket", field),
                "bucket name must not be empty",
            ));
        }
        if let Some(ca) = location.ca_cert.as_deref().filter(|c| !c.is_empty()) {
            validate_ca_pem(ca).map_err(|e| {
                Error::validation_for_field(ctx.resource(), format!("{}.caCert", field), e)
            })?;
        }
        match provider {
            CloudProvider::Aws => self.check_aws(ctx, &field, &mut location).await?,
            CloudProvider::Azure => check_azure(ctx, &field, &location.config)?,
            CloudProvider::Gcp => {}
        }

        self.resolve_credential(ctx, &field, provider, &mut location)
            .await?;
        debug!(location = %location.name, provider = %provider, bucket = %location.bucket, "Resolved location");
        Ok(location)
    }

    async fn from_bucket(
        &self,
        ctx: &ResolveContext,
        field: &str,
        name: &str,
        bucket_ref: &BucketRef,
    ) -> Result<ResolvedLocation, Error> {
        let ref_name = bucket_ref.cloud_bucket_ref.name.trim();
        if ref_name.is_empty() {
            return Err(Error::validation_for_field(
                ctx.resource(),
                format!("{}.bucket.cloudBucketRef.name", field),
                "CloudBucket reference name must not be empty",
            ));
        }
        let cloud_bucket = self
            .kube
            .get_cloud_bucket(ref_name, &ctx.namespace)
            .await?
            .ok_or_else(|| {
                Error::not_found(
                    format!("CloudBucket {}", namespaced_name(&ctx.namespace, ref_name)),
                    UNKNOWN_CONTEXT,
                    "referenced CloudBucket does not exist",
                )
            })?;

        Ok(ResolvedLocation {
            name: name.to_string(),
            provider: cloud_bucket.spec.provider,
            bucket: cloud_bucket.spec.name.clone(),
            prefix: bucket_ref.prefix.clone(),
            ca_cert: bucket_ref.ca_cert.as_ref().map(|c| c.0.clone()),
            credential: bucket_ref.credential.clone(),
            config: map_config(&cloud_bucket.spec, &bucket_ref.config),
            default: bucket_ref.default,
            backup_sync_period: bucket_ref.backup_sync_period.clone(),
        })
    }

    /// Make sure an AWS location that needs a region has one.
    ///
    /// Path-style addressing and image backup both need the region; when it
    /// is missing it is discovered from S3, which only works against AWS
    /// itself.
    async fn check_aws(
        &self,
        ctx: &ResolveContext,
        field: &str,
        location: &mut ResolvedLocation,
    ) -> Result<(), Error> {
        let value = |k: &str| {
            location
                .config
                .get(k)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let path_style = match value("s3ForcePathStyle") {
            Some(v) => parse_bool(v).map_err(|e| {
                Error::validation_for_field(
                    ctx.resource(),
                    format!("{}.config.s3ForcePathStyle", field),
                    e,
                )
            })?,
            None => false,
        };
        if value("region").is_some() || !(path_style || ctx.backup_images) {
            return Ok(());
        }
        if value("s3Url").is_some() {
            return Err(Error::validation_for_field(
                ctx.resource(),
                format!("{}.config.region", field),
                "region is required for a custom s3Url when s3ForcePathStyle or image backup is enabled",
            ));
        }

        let region = self
            .regions
            .bucket_region(&location.bucket)
            .await
            .map_err(|e| {
                if e.is_retryable() {
                    e
                } else {
                    Error::validation_for_field(
                        ctx.resource(),
                        format!("{}.config.region", field),
                        format!(
                            "region is not set and could not be discovered for bucket {}: {}",
                            location.bucket, e
                        ),
                    )
                }
            })?;
        info!(location = %location.name, bucket = %location.bucket, region = %region, "Using discovered bucket region");
        location.config.insert("region".to_string(), region);
        Ok(())
    }

    async fn resolve_credential(
        &self,
        ctx: &ResolveContext,
        field: &str,
        provider: CloudProvider,
        location: &mut ResolvedLocation,
    ) -> Result<(), Error> {
        let reference = match location.credential.take() {
            Some(reference) => {
                if reference.name.trim().is_empty() || reference.key.trim().is_empty() {
                    return Err(Error::validation_for_field(
                        ctx.resource(),
                        format!("{}.credential", field),
                        "credential must set both name and key",
                    ));
                }
                reference
            }
            None if ctx.no_secret => {
                debug!(location = %location.name, "No credential required");
                return Ok(());
            }
            None => self.settings.default_credential(provider),
        };

        let secret = self
            .kube
            .get_secret(&reference.name, &ctx.namespace)
            .await?
            .ok_or_else(|| {
                Error::not_found(
                    format!("Secret {}", namespaced_name(&ctx.namespace, &reference.name)),
                    provider.as_str(),
                    "credential secret does not exist",
                )
            })?;
        self.credentials.parse_secret(
            &secret,
            &reference.key,
            provider,
            &location.config,
            self.cache.as_deref(),
        )?;

        if let Some(patched) = sts_patch(&secret, &reference.key, provider, &location.config) {
            info!(
                secret = %reference.name,
                provider = %provider,
                "Writing resolved location settings into STS credential secret"
            );
            self.kube
                .update_secret_data(&reference.name, &ctx.namespace, &reference.key, patched)
                .await?;
        }

        location.credential = Some(reference);
        Ok(())
    }
}


fn check_azure(
    ctx: &ResolveContext,
    field: &str,
    config: &BTreeMap<String, String>,
) -> Result<(), Error> {
    for key in ["resourceGroup", "storageAccount"] {
        if config.get(key).is_some_and(|v| v.trim().is_empty()) {
            return Err(Error::validation_for_field(
                ctx.resource(),
                format!("{}.config.{}", field, key),
                format!("{} must not be empty", key),
            ));
        }
    }
    Ok(())
}
