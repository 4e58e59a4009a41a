//! Error types for cairn
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the resource, provider, or operation it concerns
//! so that status messages and logs identify what failed.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Why a referenced object could not be resolved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionKind {
    /// The referenced resource does not exist
    NotFound,
    /// The referenced resource exists but its payload cannot be parsed
    Malformed,
    /// The provider named by the resource is not supported
    Unsupported,
}

impl std::fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Malformed => write!(f, "malformed"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Classification of a failed cloud provider call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderFailure {
    /// 401: credentials were rejected
    Authentication,
    /// 403: credentials are valid but lack permission
    Authorization,
    /// 404: the bucket or object does not exist
    NotFound,
    /// 409: the bucket already exists or is in a conflicting state
    Conflict,
    /// 400: the request was malformed
    BadRequest,
    /// 429 or 5xx: the provider asked us to try again
    Transient,
    /// Connection, DNS, or timeout failure before a response arrived
    Network,
    /// Anything else
    Other,
}

impl ProviderFailure {
    /// Classify an HTTP status code returned by a provider API
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Authentication,
            403 => Self::Authorization,
            404 => Self::NotFound,
            409 => Self::Conflict,
            429 | 500 | 502 | 503 | 504 => Self::Transient,
            _ => Self::Other,
        }
    }

    /// Whether a call failing this way should be retried with backoff
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Network)
    }
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication failed"),
            Self::Authorization => write!(f, "permission denied"),
            Self::NotFound => write!(f, "not found"),
            Self::Conflict => write!(f, "conflict"),
            Self::BadRequest => write!(f, "bad request"),
            Self::Transient => write!(f, "transient failure"),
            Self::Network => write!(f, "network failure"),
            Self::Other => write!(f, "request failed"),
        }
    }
}

/// Main error type for cairn operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Missing, contradictory, or otherwise invalid user configuration
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource or location with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.backupLocations[0].bucket.prefix")
        field: Option<String>,
    },

    /// A referenced object could not be resolved
    #[error("{kind} {resource} [{provider}]: {message}")]
    Resolution {
        /// Why resolution failed
        kind: ResolutionKind,
        /// The referenced resource (e.g., "CloudBucket ns/name")
        resource: String,
        /// Provider in play, if known
        provider: String,
        /// Description of what failed
        message: String,
    },

    /// Credential payload could not be interpreted for the provider
    #[error("credential error [{provider}]: {message}")]
    Credential {
        /// Provider whose credential format was expected
        provider: String,
        /// Description of the missing or invalid key
        message: String,
    },

    /// Cloud provider API call failed
    #[error("provider error [{provider}] {operation}: {reason}: {message}")]
    Provider {
        /// Provider type (aws, azure, gcp)
        provider: String,
        /// Operation that failed (e.g., "create", "delete")
        operation: String,
        /// Classified failure reason
        reason: ProviderFailure,
        /// HTTP status if the provider responded
        status: Option<u16>,
        /// Provider error text
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "controller")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a not-found resolution error
    pub fn not_found(
        resource: impl Into<String>,
        provider: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Resolution {
            kind: ResolutionKind::NotFound,
            resource: resource.into(),
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create an unsupported-provider resolution error
    pub fn unsupported_provider(resource: impl Into<String>, provider: impl Into<String>) -> Self {
        let provider = provider.into();
        Self::Resolution {
            kind: ResolutionKind::Unsupported,
            resource: resource.into(),
            message: format!("provider {:?} is not one of aws, azure, gcp", provider),
            provider,
        }
    }

    /// Create a credential error for a provider
    pub fn credential(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Credential {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a provider error with full context
    pub fn provider(
        provider: impl Into<String>,
        operation: impl Into<String>,
        reason: ProviderFailure,
        status: Option<u16>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            operation: operation.into(),
            reason,
            status,
            message: msg.into(),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, resolution, credential, and serialization errors need a
    /// spec or secret change. Provider errors follow their classification.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::Resolution { .. } => false,
            Error::Credential { .. } => false,
            Error::Provider { reason, .. } => reason.is_retryable(),
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the provider failure reason if this is a provider error
    pub fn provider_failure(&self) -> Option<ProviderFailure> {
        match self {
            Error::Provider { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
