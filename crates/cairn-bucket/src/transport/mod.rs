//! Provider transports
//!
//! Each transport speaks one provider's wire API and reports failures as a
//! [`TransportError`] classified by HTTP status. Lifecycle clients decide
//! what a failure means (retry, idempotent success, or terminal error).

pub mod azure_blob;
pub mod gcs_http;
pub mod s3;
pub mod token;

use cairn_common::crd::CloudProvider;
use cairn_common::{Error, ProviderFailure};
use thiserror::Error;

pub use azure_blob::AzureBlobTransport;
pub use gcs_http::GcsTransport;
pub use s3::S3Transport;

/// Longest provider error body kept in messages
const MAX_ERROR_BODY: usize = 512;

/// A failed provider call
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{failure}: {message}")]
pub struct TransportError {
    /// Classified failure reason
    pub failure: ProviderFailure,
    /// HTTP status, when the provider responded
    pub status: Option<u16>,
    /// Provider error text
    pub message: String,
}

impl TransportError {
    /// Failure classified from an HTTP status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            failure: ProviderFailure::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Connection, DNS, or timeout failure
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            failure: ProviderFailure::Network,
            status: None,
            message: message.into(),
        }
    }

    /// Unclassified failure without a status
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            failure: ProviderFailure::Other,
            status: None,
            message: message.into(),
        }
    }

    /// Whether the call should be retried with backoff
    pub fn is_retryable(&self) -> bool {
        self.failure.is_retryable()
    }

    /// Whether the target does not exist
    pub fn is_not_found(&self) -> bool {
        self.failure == ProviderFailure::NotFound
    }

    /// Whether the target already exists
    pub fn is_conflict(&self) -> bool {
        self.failure == ProviderFailure::Conflict
    }

    /// Convert into a cairn error for the given provider operation
    pub fn into_error(self, provider: CloudProvider, operation: &str) -> Error {
        Error::provider(
            provider.as_str(),
            operation,
            self.failure,
            self.status,
            self.message,
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            return Self::network(e.to_string());
        }
        match e.status() {
            Some(status) => Self::from_status(status.as_u16(), e.to_string()),
            None => Self::other(e.to_string()),
        }
    }
}

/// Pass successful responses through; turn anything else into a classified error
pub(crate) async fn check_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let mut message = if body.trim().is_empty() {
        status.to_string()
    } else {
        body.trim().to_string()
    };
    if message.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    Err(TransportError::from_status(status.as_u16(), message))
}
