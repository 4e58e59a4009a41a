//! Runtime settings for cairn
//!
//! Settings come from `CAIRN_*` environment variables layered over
//! [`Settings::default`]. Unset variables keep their defaults; variables that
//! are set but unparseable are validation errors naming the variable.

use std::str::FromStr;
use std::time::Duration;

use crate::crd::{CloudProvider, SecretKeyRef};
use crate::retry::RetryConfig;
use crate::Error;

/// Default number of workers emptying a GCS bucket before deletion
pub const DEFAULT_GCS_DELETE_WORKERS: usize = 10;

/// Default lifetime of a cached credential (seconds)
pub const DEFAULT_CREDENTIAL_CACHE_TTL_SECS: u64 = 300;

/// Name of the singleton CA bundle ConfigMap
pub const DEFAULT_CA_BUNDLE_NAME: &str = "cairn-ca-bundle";

/// Key under which the concatenated PEM bundle is stored
pub const CA_BUNDLE_KEY: &str = "ca-bundle.pem";

/// Key inside a credential Secret when none is specified
pub const DEFAULT_CREDENTIAL_KEY: &str = "cloud";

/// Runtime settings shared by the resolver, orchestrator, and bucket controller
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Backoff policy wrapped around provider calls
    pub retry: RetryConfig,
    /// Number of concurrent workers deleting GCS objects
    pub gcs_delete_workers: usize,
    /// Lifetime of a cached parsed credential
    pub credential_cache_ttl: Duration,
    /// Providers whose CA certificates are left out of the CA bundle
    pub ca_bundle_excluded_providers: Vec<CloudProvider>,
    /// Name of the CA bundle ConfigMap
    pub ca_bundle_name: String,
    /// Default credential Secret name for AWS locations
    pub aws_default_credential: String,
    /// Default credential Secret name for Azure locations
    pub azure_default_credential: String,
    /// Default credential Secret name for GCP locations
    pub gcp_default_credential: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            gcs_delete_workers: DEFAULT_GCS_DELETE_WORKERS,
            credential_cache_ttl: Duration::from_secs(DEFAULT_CREDENTIAL_CACHE_TTL_SECS),
            ca_bundle_excluded_providers: Vec::new(),
            ca_bundle_name: DEFAULT_CA_BUNDLE_NAME.to_string(),
            aws_default_credential: "cloud-credentials".to_string(),
            azure_default_credential: "cloud-credentials-azure".to_string(),
            gcp_default_credential: "cloud-credentials-gcp".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment
    ///
    /// Environment variables:
    /// - CAIRN_RETRY_MAX_RETRIES: retries after the first provider call (default: 5)
    /// - CAIRN_RETRY_BASE_DELAY_MS: first backoff delay (default: 500)
    /// - CAIRN_RETRY_MAX_DELAY_MS: backoff ceiling (default: 30000)
    /// - CAIRN_RETRY_JITTER: jitter fraction between 0 and 1 (default: 0.5)
    /// - CAIRN_GCS_DELETE_WORKERS: GCS purge workers (default: 10)
    /// - CAIRN_CREDENTIAL_CACHE_TTL_SECS: credential cache lifetime (default: 300)
    /// - CAIRN_CA_BUNDLE_EXCLUDED_PROVIDERS: comma-separated providers (default: none)
    /// - CAIRN_CA_BUNDLE_NAME: CA bundle ConfigMap name (default: cairn-ca-bundle)
    /// - CAIRN_AWS_CREDENTIAL / CAIRN_AZURE_CREDENTIAL / CAIRN_GCP_CREDENTIAL:
    ///   default credential Secret names
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut settings = Self::default();

        if let Some(v) = parse_var::<u32>(&lookup, "CAIRN_RETRY_MAX_RETRIES")? {
            settings.retry.max_retries = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "CAIRN_RETRY_BASE_DELAY_MS")? {
            settings.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "CAIRN_RETRY_MAX_DELAY_MS")? {
            settings.retry.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<f64>(&lookup, "CAIRN_RETRY_JITTER")? {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::validation_for_field(
                    "settings",
                    "CAIRN_RETRY_JITTER",
                    format!("jitter must be between 0 and 1, got {}", v),
                ));
            }
            settings.retry.jitter = v;
        }
        if let Some(v) = parse_var::<usize>(&lookup, "CAIRN_GCS_DELETE_WORKERS")? {
            if v == 0 {
                return Err(Error::validation_for_field(
                    "settings",
                    "CAIRN_GCS_DELETE_WORKERS",
                    "at least one worker is required",
                ));
            }
            settings.gcs_delete_workers = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "CAIRN_CREDENTIAL_CACHE_TTL_SECS")? {
            settings.credential_cache_ttl = Duration::from_secs(v);
        }
        if let Some(raw) = lookup("CAIRN_CA_BUNDLE_EXCLUDED_PROVIDERS") {
            settings.ca_bundle_excluded_providers = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    CloudProvider::from_str(s).map_err(|_| {
                        Error::validation_for_field(
                            "settings",
                            "CAIRN_CA_BUNDLE_EXCLUDED_PROVIDERS",
                            format!("unknown provider {:?}", s),
                        )
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = lookup("CAIRN_CA_BUNDLE_NAME").filter(|v| !v.trim().is_empty()) {
            settings.ca_bundle_name = v;
        }
        if let Some(v) = lookup("CAIRN_AWS_CREDENTIAL").filter(|v| !v.trim().is_empty()) {
            settings.aws_default_credential = v;
        }
        if let Some(v) = lookup("CAIRN_AZURE_CREDENTIAL").filter(|v| !v.trim().is_empty()) {
            settings.azure_default_credential = v;
        }
        if let Some(v) = lookup("CAIRN_GCP_CREDENTIAL").filter(|v| !v.trim().is_empty()) {
            settings.gcp_default_credential = v;
        }

        Ok(settings)
    }

    /// The namespace-wide default credential for a provider
    pub fn default_credential(&self, provider: CloudProvider) -> SecretKeyRef {
        let name = match provider {
            CloudProvider::Aws => &self.aws_default_credential,
            CloudProvider::Azure => &self.azure_default_credential,
            CloudProvider::Gcp => &self.gcp_default_credential,
        };
        SecretKeyRef {
            name: name.clone(),
            key: DEFAULT_CREDENTIAL_KEY.to_string(),
        }
    }

    /// Whether a provider's CA certificates belong in the CA bundle
    pub fn bundles_ca_for(&self, provider: CloudProvider) -> bool {
        !self.ca_bundle_excluded_providers.contains(&provider)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            Error::validation_for_field("settings", key, format!("invalid value {:?}: {}", raw, e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.gcs_delete_workers, DEFAULT_GCS_DELETE_WORKERS);
    }

    #[test]
    fn overrides_are_applied() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("CAIRN_RETRY_MAX_RETRIES", "2"),
            ("CAIRN_RETRY_BASE_DELAY_MS", "10"),
            ("CAIRN_GCS_DELETE_WORKERS", "4"),
            ("CAIRN_CA_BUNDLE_EXCLUDED_PROVIDERS", "azure, gcp"),
            ("CAIRN_AWS_CREDENTIAL", "my-aws-creds"),
        ]))
        .unwrap();

        assert_eq!(settings.retry.max_retries, 2);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(10));
        assert_eq!(settings.gcs_delete_workers, 4);
        assert!(settings.bundles_ca_for(CloudProvider::Aws));
        assert!(!settings.bundles_ca_for(CloudProvider::Azure));
        assert!(!settings.bundles_ca_for(CloudProvider::Gcp));
        assert_eq!(
            settings.default_credential(CloudProvider::Aws).name,
            "my-aws-creds"
        );
    }

    #[test]
    fn unparseable_values_name_the_variable() {
        let err = Settings::from_lookup(lookup_from(&[("CAIRN_RETRY_MAX_RETRIES", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("lots"));
        match err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("CAIRN_RETRY_MAX_RETRIES"))
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn zero_workers_and_bad_jitter_are_rejected() {
        assert!(Settings::from_lookup(lookup_from(&[("CAIRN_GCS_DELETE_WORKERS", "0")])).is_err());
        assert!(Settings::from_lookup(lookup_from(&[("CAIRN_RETRY_JITTER", "1.5")])).is_err());
    }

    #[test]
    fn default_credentials_per_provider() {
        let settings = Settings::default();
        let aws = settings.default_credential(CloudProvider::Aws);
        assert_eq!(aws.name, "cloud-credentials");
        assert_eq!(aws.key, "cloud");
        assert_eq!(
            settings.default_credential(CloudProvider::Azure).name,
            "cloud-credentials-azure"
        );
        assert_eq!(
            settings.default_credential(CloudProvider::Gcp).name,
            "cloud-credentials-gcp"
        );
    }
}
