//! cairn - Velero backup storage locations and cloud buckets
//!
//! Facade over the workspace crates:
//!
//! - [`common`]: CRDs, errors, retry, settings, and Kubernetes helpers
//! - [`credentials`]: credential secret parsing for AWS, Azure, and GCP
//! - [`bucket`]: idempotent bucket lifecycle and the CloudBucket controller
//! - [`location`]: location resolution, CA bundle, and the DataProtection controller

#![deny(missing_docs)]

pub use cairn_bucket as bucket;
pub use cairn_common as common;
pub use cairn_credentials as credentials;
pub use cairn_location as location;

pub use cairn_common::{Error, Result, Settings};
