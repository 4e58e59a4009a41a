//! S3 bucket region discovery
//!
//! S3 answers an anonymous `HEAD` on any existing bucket with the
//! `x-amz-bucket-region` header, whatever the status code, so a bucket's
//! region can be found without credentials.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use cairn_common::{Error, ProviderFailure};

/// Header carrying a bucket's region on S3 responses
pub const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

const S3_GLOBAL_ENDPOINT: &str = "https://s3.amazonaws.com";

/// Finds the region an S3 bucket lives in
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BucketRegionLocator: Send + Sync {
    /// Region of `bucket`
    async fn bucket_region(&self, bucket: &str) -> Result<String, Error>;
}

/// Locator issuing unauthenticated requests to the S3 global endpoint
pub struct HttpRegionLocator {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpRegionLocator {
    /// Create a locator with its own HTTP client
    pub fn new() -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::internal_with_context("region-locator", e.to_string()))?;
        Ok(Self {
            http,
            endpoint: S3_GLOBAL_ENDPOINT.to_string(),
        })
    }
}

/// The bucket region advertised in S3 response headers
pub fn region_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(BUCKET_REGION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl BucketRegionLocator for HttpRegionLocator {
    async fn bucket_region(&self, bucket: &str) -> Result<String, Error> {
        // path-style keeps dotted bucket names valid under TLS
        let url = format!("{}/{}", self.endpoint, bucket);
        let response = self.http.head(&url).send().await.map_err(|e| {
            Error::provider("aws", "locate-region", ProviderFailure::Network, None, e.to_string())
        })?;
        let status = response.status().as_u16();
        match region_from_headers(response.headers()) {
            Some(region) => {
                debug!(bucket, region = %region, status, "Discovered bucket region");
                Ok(region)
            }
            None => Err(Error::provider(
                "aws",
                "locate-region",
                ProviderFailure::from_status(status),
                Some(status),
                format!("no {} header for bucket {}", BUCKET_REGION_HEADER, bucket),
            )),
        }
    }
}
