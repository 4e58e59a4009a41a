//! Shared CRD types: providers, secret references, and conditions

use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cloud object-storage provider
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// Amazon S3 (and S3-compatible endpoints)
    Aws,
    /// Azure Blob Storage
    Azure,
    /// Google Cloud Storage
    Gcp,
}

impl CloudProvider {
    /// The identifier Velero uses for this provider
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
        }
    }
}

impl FromStr for CloudProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let name = normalized
            .strip_prefix("velero.io/")
            .unwrap_or(normalized.as_str());
        match name {
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            "gcp" => Ok(Self::Gcp),
            _ => Err(format!("unknown provider: {}", s)),
        }
    }
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one key of a Secret in the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretKeyRef {
    /// Secret name
    pub name: String,
    /// Key within the Secret's data
    pub key: String,
}

impl SecretKeyRef {
    /// Create a new reference
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., BucketReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Insert or update a condition by type.
///
/// The existing transition time is kept when the status did not change, so
/// repeated reconciles with the same outcome do not churn the status.
/// Returns true when anything other than the timestamp changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            if existing.status == new.status {
                new.last_transition_time = existing.last_transition_time;
            }
            let changed = existing.status != new.status
                || existing.reason != new.reason
                || existing.message != new.message;
            *existing = new;
            changed
        }
        None => {
            conditions.push(new);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing_accepts_velero_prefixes() {
        assert_eq!("aws".parse::<CloudProvider>().unwrap(), CloudProvider::Aws);
        assert_eq!(
            "velero.io/aws".parse::<CloudProvider>().unwrap(),
            CloudProvider::Aws
        );
        assert_eq!(
            "Velero.io/Azure".parse::<CloudProvider>().unwrap(),
            CloudProvider::Azure
        );
        assert_eq!("gcp".parse::<CloudProvider>().unwrap(), CloudProvider::Gcp);
        assert!("alibabacloud".parse::<CloudProvider>().is_err());
        assert!("velero.io/".parse::<CloudProvider>().is_err());
    }

    #[test]
    fn provider_serializes_lowercase() {
        let json = serde_json::to_string(&CloudProvider::Azure).unwrap();
        assert_eq!(json, "\"azure\"");
        assert_eq!(CloudProvider::Gcp.to_string(), "gcp");
    }

    #[test]
    fn set_condition_keeps_transition_time_when_status_is_stable() {
        let mut conditions = Vec::new();
        let first = Condition::new("BucketReady", ConditionStatus::True, "BucketCreated", "ok");
        let first_time = first.last_transition_time;
        assert!(set_condition(&mut conditions, first));

        let again = Condition::new("BucketReady", ConditionStatus::True, "BucketCreated", "ok");
        assert!(!set_condition(&mut conditions, again));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first_time);

        let failed = Condition::new(
            "BucketReady",
            ConditionStatus::False,
            "BucketCreationFailed",
            "403",
        );
        assert!(set_condition(&mut conditions, failed));
        assert_eq!(conditions[0].status, ConditionStatus::False);
    }
}
