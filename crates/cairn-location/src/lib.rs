//! Backup storage locations for cairn
//!
//! Resolves the location intents of a DataProtection parent into Velero
//! BackupStorageLocations: CloudBucket references are mapped into
//! provider-native config, credentials are checked against their Secrets,
//! and CA certificates are gathered into one bundle. The orchestrator writes
//! the result and removes locations no intent produces anymore.

#![deny(missing_docs)]

pub mod ca_bundle;
pub mod controller;
pub mod kube_client;
pub mod mapper;
pub mod orchestrator;
pub mod region;
pub mod resolver;
pub mod validation;

pub use ca_bundle::{collect_ca_bundle, validate_ca_pem};
pub use kube_client::{KubeClientImpl, LocationKubeClient};
pub use mapper::map_config;
pub use orchestrator::{LocationChange, ReconcileOrchestrator, ReconcileOutcome};
pub use region::{BucketRegionLocator, HttpRegionLocator};
pub use resolver::{ConfigResolver, ResolveContext, ResolvedLocation};
pub use validation::{parse_intents, target_name, target_names, validate_intents};
