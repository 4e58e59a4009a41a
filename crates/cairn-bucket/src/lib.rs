//! Cloud bucket lifecycle for cairn
//!
//! Idempotent exists/create/delete for S3 buckets, Azure Blob containers,
//! and GCS buckets, with names and tags validated before any provider call
//! and provider failures classified for retry. The CloudBucket controller
//! drives these clients from the cluster.

#![deny(missing_docs)]

pub mod aws;
pub mod azure;
pub mod client;
pub mod controller;
pub mod factory;
pub mod gcs;
pub mod tags;
pub mod transport;
pub mod validation;

pub use aws::{AwsBucketClient, S3Api};
pub use azure::{AzureBucketClient, BlobContainerApi};
pub use client::{BucketClient, BucketTarget};
pub use factory::{BucketClientFactory, DefaultBucketClientFactory, ProviderBucketClient};
pub use gcs::{GcsApi, GcsBucketClient, ObjectPage};
pub use tags::{sanitize_gcs_labels, validate_tags};
pub use transport::TransportError;
pub use validation::validate_bucket_name;
