//! Common types for cairn: CRDs, errors, retry, settings, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod retry;
pub mod settings;
pub mod velero;

pub use error::{Error, ProviderFailure, ResolutionKind};
pub use settings::Settings;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Standard Kubernetes name label
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Standard Kubernetes instance label
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";

/// Standard Kubernetes managed-by label
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard Kubernetes component label
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Value of the managed-by label for everything cairn writes
pub const LABEL_MANAGED_BY_CAIRN: &str = "cairn-operator";

/// Value of the name label for everything cairn writes
pub const LABEL_NAME_CAIRN: &str = "cairn-velero";

/// Operator identity label marking objects written by cairn
pub const LABEL_OPERATOR: &str = "cairn.dev/operator";

/// Operator identity label carrying the owning parent's name
pub const LABEL_OWNER: &str = "cairn.dev/owner";

/// Component value for BackupStorageLocation objects
pub const COMPONENT_BSL: &str = "bsl";

/// Component value for the CA bundle ConfigMap
pub const COMPONENT_CA_BUNDLE: &str = "ca-bundle";

/// Label key marking a credential Secret as an STS / federated-identity secret
pub const STS_SECRET_LABEL: &str = "cairn.dev/secret-type";

/// Label value for [`STS_SECRET_LABEL`]
pub const STS_SECRET_LABEL_VALUE: &str = "sts-credentials";

/// Finalizer placed on CloudBucket resources
pub const CLOUD_BUCKET_FINALIZER: &str = "cairn.dev/cloudbucket-finalizer";

/// Annotation confirming that the cloud bucket should be deleted with its CloudBucket
pub const CLOUD_BUCKET_DELETE_ANNOTATION: &str = "cairn.dev/cloudbucket-delete";

/// Requeue interval after a successful reconcile (seconds)
pub const REQUEUE_SUCCESS_SECS: u64 = 300;

/// Requeue interval after a transient failure (seconds)
pub const REQUEUE_ERROR_SECS: u64 = 30;

/// Requeue interval after a validation failure that needs a spec change (seconds)
pub const REQUEUE_VALIDATION_SECS: u64 = 600;
