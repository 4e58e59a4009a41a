//! Custom Resource Definitions for cairn
//!
//! `CloudBucket` describes a cloud bucket independent of any consumer;
//! `DataProtection` is the parent carrying the ordered list of backup
//! location intents.

mod cloud_bucket;
mod data_protection;
mod types;

pub use cloud_bucket::{
    CloudBucket, CloudBucketSpec, CloudBucketStatus, CONDITION_BUCKET_READY,
    REASON_BUCKET_CREATED, REASON_BUCKET_CREATION_FAILED, REASON_BUCKET_READY,
};
pub use data_protection::{
    BackupLocation, BucketRef, CloudBucketRef, DataProtection, DataProtectionSpec, DataProtectionStatus,
    LocationIntent, LocationSource, FEATURE_NO_SECRET,
};
pub use types::{set_condition, CloudProvider, Condition, ConditionStatus, SecretKeyRef};
