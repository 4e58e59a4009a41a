//! GCS bucket lifecycle
//!
//! GCS refuses to delete a bucket that still holds objects, so delete first
//! empties the bucket with a bounded pool of workers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_common::crd::CloudProvider;
use cairn_common::retry::RetryConfig;
use cairn_common::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::client::{
    create_outcome, delete_outcome, exists_outcome, provider_call, validate_for_create,
    BucketClient, BucketTarget,
};
use crate::tags::sanitize_gcs_labels;
use crate::transport::TransportError;
use crate::validation::validate_gcs_name;

const PROVIDER: CloudProvider = CloudProvider::Gcp;

/// Location used when a bucket has no region
pub const DEFAULT_LOCATION: &str = "us-central1";

/// One page of an object listing
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectPage {
    /// Object names in this page
    pub names: Vec<String>,
    /// Token for the next page, if any
    pub next_page_token: Option<String>,
}

/// GCS JSON API operations used by [`GcsBucketClient`]
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GcsApi: Send + Sync {
    /// buckets.get
    async fn get_bucket(&self, bucket: &str) -> Result<(), TransportError>;

    /// buckets.insert with location and labels
    async fn insert_bucket(
        &self,
        bucket: &str,
        location: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), TransportError>;

    /// objects.list, one page
    async fn list_objects(
        &self,
        bucket: &str,
        page_token: Option<String>,
    ) -> Result<ObjectPage, TransportError>;

    /// objects.delete
    async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), TransportError>;

    /// buckets.delete
    async fn delete_bucket(&self, bucket: &str) -> Result<(), TransportError>;
}

/// Bucket lifecycle for Google Cloud Storage
pub struct GcsBucketClient<T> {
    api: Arc<T>,
    target: BucketTarget,
    retry: RetryConfig,
    delete_workers: usize,
}

impl<T: GcsApi + 'static> GcsBucketClient<T> {
    /// Create a client for one bucket; `delete_workers` bounds purge concurrency
    pub fn new(api: Arc<T>, target: BucketTarget, retry: RetryConfig, delete_workers: usize) -> Self {
        Self {
            api,
            target,
            retry,
            delete_workers: delete_workers.max(1),
        }
    }

    fn location(&self) -> &str {
        self.target
            .region
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_LOCATION)
    }

    /// Delete every object in the bucket, stopping at the first failure
    async fn purge_objects(&self) -> Result<usize, TransportError> {
        let bucket = self.target.name.clone();
        let (job_tx, job_rx) = mpsc::channel::<String>(self.delete_workers * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (err_tx, mut err_rx) = mpsc::channel::<TransportError>(self.delete_workers);

        let mut workers = Vec::with_capacity(self.delete_workers);
        for _ in 0..self.delete_workers {
            let api = self.api.clone();
            let jobs = job_rx.clone();
            let errors = err_tx.clone();
            let retry = self.retry.clone();
            let bucket = bucket.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let next = jobs.lock().await.recv().await;
                    let Some(object) = next else { break };
                    let result = provider_call(&retry, PROVIDER, "delete_object", &bucket, || {
                        api.delete_object(&bucket, &object)
                    })
                    .await;
                    match result {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => {
                            let _ = errors.send(e).await;
                            break;
                        }
                    }
                }
            }));
        }
        drop(job_rx);
        drop(err_tx);

        let mut queued = 0usize;
        let mut page_token = None;
        let listed: Result<(), TransportError> = 'listing: loop {
            let page = match provider_call(&self.retry, PROVIDER, "list_objects", &bucket, || {
                self.api.list_objects(&bucket, page_token.clone())
            })
            .await
            {
                Ok(page) => page,
                Err(e) => break 'listing Err(e),
            };
            for name in page.names {
                if let Ok(e) = err_rx.try_recv() {
                    break 'listing Err(e);
                }
                if job_tx.send(name).await.is_err() {
                    break 'listing Ok(());
                }
                queued += 1;
            }
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break Ok(()),
            }
        };
        drop(job_tx);

        if let Err(e) = listed {
            for worker in &workers {
                worker.abort();
            }
            return Err(e);
        }
        for worker in workers {
            if let Err(e) = worker.await {
                return Err(TransportError::other(format!("object delete worker failed: {}", e)));
            }
        }
        match err_rx.try_recv() {
            Ok(e) => Err(e),
            Err(_) => Ok(queued),
        }
    }
}

#[async_trait]
impl<T: GcsApi + 'static> BucketClient for GcsBucketClient<T> {
    #[instrument(skip(self), fields(provider = "gcp", bucket = %self.target.name))]
    async fn exists(&self) -> Result<bool, Error> {
        let bucket = self.target.name.as_str();
        validate_gcs_name(bucket)?;
        let result = provider_call(&self.retry, PROVIDER, "exists", bucket, || {
            self.api.get_bucket(bucket)
        })
        .await;
        exists_outcome(PROVIDER, bucket, result)
    }

    #[instrument(skip(self), fields(provider = "gcp", bucket = %self.target.name))]
    async fn create(&self) -> Result<bool, Error> {
        let labels = sanitize_gcs_labels(&self.target.tags);
        validate_for_create(PROVIDER, &self.target, &labels)?;
        let bucket = self.target.name.as_str();
        let location = self.location();
        let result = provider_call(&self.retry, PROVIDER, "create", bucket, || {
            self.api.insert_bucket(bucket, location, &labels)
        })
        .await;
        create_outcome(PROVIDER, bucket, result)?;
        Ok(true)
    }

    #[instrument(skip(self), fields(provider = "gcp", bucket = %self.target.name))]
    async fn delete(&self) -> Result<bool, Error> {
        let bucket = self.target.name.as_str();
        validate_gcs_name(bucket)?;
        match self.purge_objects().await {
            Ok(0) => {}
            Ok(count) => info!(bucket, count, "Deleted bucket objects"),
            Err(e) if e.is_not_found() => {
                debug!(bucket, "Bucket already deleted");
                return Ok(true);
            }
            Err(e) => {
                warn!(bucket, error = %e, "Aborted bucket purge");
                return Err(e.into_error(PROVIDER, "delete"));
            }
        }
        let result = provider_call(&self.retry, PROVIDER, "delete", bucket, || {
            self.api.delete_bucket(bucket)
        })
        .await;
        delete_outcome(PROVIDER, bucket, result)
    }
}
