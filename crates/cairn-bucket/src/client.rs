//! Bucket lifecycle contract and shared idempotency rules
//!
//! Every provider client answers the same three questions: does the bucket
//! exist, make sure it exists, make sure it is gone. All three are
//! idempotent. Name and tag validation happens before any provider call;
//! only the provider call itself is wrapped in retry/backoff.

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use cairn_common::crd::{CloudBucketSpec, CloudProvider};
use cairn_common::retry::{retry_with_backoff, RetryConfig};
use cairn_common::Error;
use tracing::{debug, info};

use crate::tags::validate_tags;
use crate::transport::TransportError;
use crate::validation::validate_bucket_name;

/// Idempotent bucket lifecycle operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BucketClient: Send + Sync {
    /// Whether the bucket exists
    async fn exists(&self) -> Result<bool, Error>;

    /// Ensure the bucket exists; succeeds when it already does
    async fn create(&self) -> Result<bool, Error>;

    /// Ensure the bucket is gone; succeeds when it already is
    async fn delete(&self) -> Result<bool, Error>;
}

/// The bucket a lifecycle client operates on
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BucketTarget {
    /// Bucket or container name
    pub name: String,
    /// Region or location
    pub region: Option<String>,
    /// Tags, metadata, or labels applied at creation
    pub tags: BTreeMap<String, String>,
    /// Provider-specific configuration
    pub config: BTreeMap<String, String>,
}

impl From<&CloudBucketSpec> for BucketTarget {
    fn from(spec: &CloudBucketSpec) -> Self {
        Self {
            name: spec.name.clone(),
            region: spec.region.clone().filter(|r| !r.is_empty()),
            tags: spec.tags.clone(),
            config: spec.config.clone(),
        }
    }
}

/// Run one provider call under the retry policy
pub(crate) async fn provider_call<T, F, Fut>(
    retry: &RetryConfig,
    provider: CloudProvider,
    operation: &str,
    bucket: &str,
    op: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let name = format!("{}:{}:{}", provider, operation, bucket);
    retry_with_backoff(retry, &name, TransportError::is_retryable, op).await
}

/// Interpret an existence check: 404 means absent, not an error
pub(crate) fn exists_outcome(
    provider: CloudProvider,
    bucket: &str,
    result: Result<(), TransportError>,
) -> Result<bool, Error> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => {
            debug!(%provider, bucket, "Bucket does not exist");
            Ok(false)
        }
        Err(e) => Err(e.into_error(provider, "exists")),
    }
}

/// Interpret a create call: 409 means the bucket is already there
///
/// Returns whether this call created the bucket.
pub(crate) fn create_outcome(
    provider: CloudProvider,
    bucket: &str,
    result: Result<(), TransportError>,
) -> Result<bool, Error> {
    match result {
        Ok(()) => {
            info!(%provider, bucket, "Bucket created");
            Ok(true)
        }
        Err(e) if e.is_conflict() => {
            debug!(%provider, bucket, error = %e, "Bucket already exists");
            Ok(false)
        }
        Err(e) => Err(e.into_error(provider, "create")),
    }
}

/// Interpret a delete call: 404 means the bucket is already gone
pub(crate) fn delete_outcome(
    provider: CloudProvider,
    bucket: &str,
    result: Result<(), TransportError>,
) -> Result<bool, Error> {
    match result {
        Ok(()) => {
            info!(%provider, bucket, "Bucket deleted");
            Ok(true)
        }
        Err(e) if e.is_not_found() => {
            debug!(%provider, bucket, "Bucket already deleted");
            Ok(true)
        }
        Err(e) => Err(e.into_error(provider, "delete")),
    }
}

/// Local checks run before a create
pub(crate) fn validate_for_create(
    provider: CloudProvider,
    target: &BucketTarget,
    tags: &BTreeMap<String, String>,
) -> Result<(), Error> {
    validate_bucket_name(provider, &target.name)?;
    validate_tags(provider, tags)
}
