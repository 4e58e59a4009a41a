//! Azure Blob container lifecycle
//!
//! The bucket name is the container name. The storage account is a property
//! of the transport, resolved from the credential or location config.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_common::crd::CloudProvider;
use cairn_common::retry::RetryConfig;
use cairn_common::Error;
use tracing::instrument;

use crate::client::{
    create_outcome, delete_outcome, exists_outcome, provider_call, validate_for_create,
    BucketClient, BucketTarget,
};
use crate::transport::TransportError;
use crate::validation::validate_azure_name;

const PROVIDER: CloudProvider = CloudProvider::Azure;

/// Blob service container operations used by [`AzureBucketClient`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobContainerApi: Send + Sync {
    /// Get Container Properties
    async fn get_container_properties(&self, container: &str) -> Result<(), TransportError>;

    /// Create Container, with metadata applied atomically
    async fn create_container(
        &self,
        container: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), TransportError>;

    /// Delete Container
    async fn delete_container(&self, container: &str) -> Result<(), TransportError>;
}

/// Container lifecycle for Azure Blob Storage
pub struct AzureBucketClient<T> {
    api: Arc<T>,
    target: BucketTarget,
    retry: RetryConfig,
}

impl<T: BlobContainerApi> AzureBucketClient<T> {
    /// Create a client for one container
    pub fn new(api: Arc<T>, target: BucketTarget, retry: RetryConfig) -> Self {
        Self { api, target, retry }
    }
}

#[async_trait]
impl<T: BlobContainerApi> BucketClient for AzureBucketClient<T> {
    #[instrument(skip(self), fields(provider = "azure", container = %self.target.name))]
    async fn exists(&self) -> Result<bool, Error> {
        let container = self.target.name.as_str();
        validate_azure_name(container)?;
        let result = provider_call(&self.retry, PROVIDER, "exists", container, || {
            self.api.get_container_properties(container)
        })
        .await;
        exists_outcome(PROVIDER, container, result)
    }

    #[instrument(skip(self), fields(provider = "azure", container = %self.target.name))]
    async fn create(&self) -> Result<bool, Error> {
        validate_for_create(PROVIDER, &self.target, &self.target.tags)?;
        let container = self.target.name.as_str();
        let result = provider_call(&self.retry, PROVIDER, "create", container, || {
            self.api.create_container(container, &self.target.tags)
        })
        .await;
        create_outcome(PROVIDER, container, result)?;
        Ok(true)
    }

    #[instrument(skip(self), fields(provider = "azure", container = %self.target.name))]
    async fn delete(&self) -> Result<bool, Error> {
        let container = self.target.name.as_str();
        validate_azure_name(container)?;
        let result = provider_call(&self.retry, PROVIDER, "delete", container, || {
            self.api.delete_container(container)
        })
        .await;
        delete_outcome(PROVIDER, container, result)
    }
}
