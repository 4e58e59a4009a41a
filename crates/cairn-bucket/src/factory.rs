//! Builds a provider bucket client from a resolved credential

use std::sync::Arc;

use async_trait::async_trait;
use cairn_common::Error;
use cairn_common::Settings;
use cairn_credentials::NormalizedCredential;

use crate::aws::AwsBucketClient;
use crate::azure::AzureBucketClient;
use crate::client::{BucketClient, BucketTarget};
use crate::gcs::GcsBucketClient;
use crate::transport::{AzureBlobTransport, GcsTransport, S3Transport};

/// A lifecycle client over the real provider transport
pub enum ProviderBucketClient {
    /// Amazon S3
    Aws(AwsBucketClient<S3Transport>),
    /// Azure Blob Storage
    Azure(AzureBucketClient<AzureBlobTransport>),
    /// Google Cloud Storage
    Gcp(GcsBucketClient<GcsTransport>),
}

impl ProviderBucketClient {
    /// Build the client matching the credential's provider
    pub fn new(
        target: BucketTarget,
        credential: &NormalizedCredential,
        settings: &Settings,
    ) -> Result<Self, Error> {
        let retry = settings.retry.clone();
        Ok(match credential {
            NormalizedCredential::Aws(c) => {
                let transport = S3Transport::new(c, &target);
                Self::Aws(AwsBucketClient::new(Arc::new(transport), target, retry))
            }
            NormalizedCredential::Azure(c) => {
                let transport = AzureBlobTransport::new(c, &target)?;
                Self::Azure(AzureBucketClient::new(Arc::new(transport), target, retry))
            }
            NormalizedCredential::Gcp(c) => {
                let transport = GcsTransport::new(c, &target)?;
                Self::Gcp(GcsBucketClient::new(
                    Arc::new(transport),
                    target,
                    retry,
                    settings.gcs_delete_workers,
                ))
            }
        })
    }
}

#[async_trait]
impl BucketClient for ProviderBucketClient {
    async fn exists(&self) -> Result<bool, Error> {
        match self {
            Self::Aws(c) => c.exists().await,
            Self::Azure(c) => c.exists().await,
            Self::Gcp(c) => c.exists().await,
        }
    }

    async fn create(&self) -> Result<bool, Error> {
        match self {
            Self::Aws(c) => c.create().await,
            Self::Azure(c) => c.create().await,
            Self::Gcp(c) => c.create().await,
        }
    }

    async fn delete(&self) -> Result<bool, Error> {
        match self {
            Self::Aws(c) => c.delete().await,
            Self::Azure(c) => c.delete().await,
            Self::Gcp(c) => c.delete().await,
        }
    }
}

/// Creates bucket clients for the controller
#[cfg_attr(test, mockall::automock)]
pub trait BucketClientFactory: Send + Sync {
    /// Client for `target` authenticated with `credential`
    fn client(
        &self,
        target: BucketTarget,
        credential: &NormalizedCredential,
    ) -> Result<Box<dyn BucketClient>, Error>;
}

/// Factory producing [`ProviderBucketClient`]s
pub struct DefaultBucketClientFactory {
    settings: Settings,
}

impl DefaultBucketClientFactory {
    /// Create a factory applying `settings` to every client
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl BucketClientFactory for DefaultBucketClientFactory {
    fn client(
        &self,
        target: BucketTarget,
        credential: &NormalizedCredential,
    ) -> Result<Box<dyn BucketClient>, Error> {
        Ok(Box::new(ProviderBucketClient::new(
            target,
            credential,
            &self.settings,
        )?))
    }
}
