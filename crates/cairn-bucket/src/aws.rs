//! S3 bucket lifecycle

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_common::crd::CloudProvider;
use cairn_common::retry::RetryConfig;
use cairn_common::Error;
use tracing::{debug, instrument};

use crate::client::{
    create_outcome, delete_outcome, exists_outcome, provider_call, validate_for_create,
    BucketClient, BucketTarget,
};
use crate::transport::TransportError;
use crate::validation::validate_s3_name;

const PROVIDER: CloudProvider = CloudProvider::Aws;

/// S3 wire operations used by [`AwsBucketClient`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait S3Api: Send + Sync {
    /// HeadBucket
    async fn head_bucket(&self, bucket: &str) -> Result<(), TransportError>;

    /// CreateBucket, with a location constraint when `region` is set
    async fn create_bucket(&self, bucket: &str, region: Option<String>)
        -> Result<(), TransportError>;

    /// PutBucketTagging, replacing the whole tag set
    async fn put_bucket_tagging(
        &self,
        bucket: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), TransportError>;

    /// DeleteBucket
    async fn delete_bucket(&self, bucket: &str) -> Result<(), TransportError>;
}

/// Bucket lifecycle for S3 and S3-compatible endpoints
pub struct AwsBucketClient<T> {
    api: Arc<T>,
    target: BucketTarget,
    retry: RetryConfig,
}

impl<T: S3Api> AwsBucketClient<T> {
    /// Create a client for one bucket
    pub fn new(api: Arc<T>, target: BucketTarget, retry: RetryConfig) -> Self {
        Self { api, target, retry }
    }

    fn bucket(&self) -> &str {
        &self.target.name
    }

    async fn apply_tags(&self) -> Result<(), Error> {
        if self.target.tags.is_empty() {
            return Ok(());
        }
        let bucket = self.bucket();
        provider_call(&self.retry, PROVIDER, "tag", bucket, || {
            self.api.put_bucket_tagging(bucket, &self.target.tags)
        })
        .await
        .map_err(|e| e.into_error(PROVIDER, "tag"))?;
        debug!(bucket, count = self.target.tags.len(), "Applied bucket tags");
        Ok(())
    }
}

#[async_trait]
impl<T: S3Api> BucketClient for AwsBucketClient<T> {
    #[instrument(skip(self), fields(provider = "aws", bucket = %self.target.name))]
    async fn exists(&self) -> Result<bool, Error> {
        let bucket = self.bucket();
        validate_s3_name(bucket)?;
        let result = provider_call(&self.retry, PROVIDER, "exists", bucket, || {
            self.api.head_bucket(bucket)
        })
        .await;
        exists_outcome(PROVIDER, bucket, result)
    }

    #[instrument(skip(self), fields(provider = "aws", bucket = %self.target.name))]
    async fn create(&self) -> Result<bool, Error> {
        validate_for_create(PROVIDER, &self.target, &self.target.tags)?;
        let bucket = self.bucket();
        let result = provider_call(&self.retry, PROVIDER, "create", bucket, || {
            self.api.create_bucket(bucket, self.target.region.clone())
        })
        .await;
        if create_outcome(PROVIDER, bucket, result)? {
            self.apply_tags().await?;
        }
        Ok(true)
    }

    #[instrument(skip(self), fields(provider = "aws", bucket = %self.target.name))]
    async fn delete(&self) -> Result<bool, Error> {
        let bucket = self.bucket();
        validate_s3_name(bucket)?;
        let result = provider_call(&self.retry, PROVIDER, "delete", bucket, || {
            self.api.delete_bucket(bucket)
        })
        .await;
        delete_outcome(PROVIDER, bucket, result)
    }
}
