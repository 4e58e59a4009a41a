//! Credential parsing for cairn
//!
//! Turns a provider-specific credential secret into a [`NormalizedCredential`]:
//! AWS ini profiles, Azure `KEY=VALUE` blobs or individual keys, and GCP JSON
//! key files. The secret format is recognized from the keys present, never
//! from a declared type.

#![deny(missing_docs)]

pub mod aws;
pub mod azure;
pub mod cache;
pub mod env;
pub mod gcp;
pub mod sts;

use std::collections::BTreeMap;
use std::sync::Arc;

use cairn_common::crd::CloudProvider;
use cairn_common::kube_utils::secret_data;
use cairn_common::{Error, ResolutionKind};
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

pub use aws::{AwsAuth, AwsCredential};
pub use azure::{AzureAuth, AzureCredential, AzureLayout};
pub use cache::CredentialCache;
pub use env::{OsProjectEnv, ProjectEnv};
pub use gcp::{GcpCredential, GcpCredentialKind};

/// A parsed credential for one provider
#[derive(Clone, Debug, PartialEq)]
pub enum NormalizedCredential {
    /// AWS profile
    Aws(AwsCredential),
    /// Azure storage credential
    Azure(AzureCredential),
    /// GCP key file
    Gcp(GcpCredential),
}

impl NormalizedCredential {
    /// Provider this credential belongs to
    pub fn provider(&self) -> CloudProvider {
        match self {
            Self::Aws(_) => CloudProvider::Aws,
            Self::Azure(_) => CloudProvider::Azure,
            Self::Gcp(_) => CloudProvider::Gcp,
        }
    }

    /// Whether the credential uses a federated, short-lived identity
    pub fn is_federated(&self) -> bool {
        match self {
            Self::Aws(c) => c.is_web_identity(),
            Self::Azure(c) => matches!(c.auth, AzureAuth::WorkloadIdentity { .. }),
            Self::Gcp(c) => c.kind == GcpCredentialKind::ExternalAccount,
        }
    }
}

/// Parses credential secrets for all supported providers
#[derive(Clone)]
pub struct CredentialResolver {
    project_env: Arc<dyn ProjectEnv>,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new(Arc::new(OsProjectEnv))
    }
}

impl CredentialResolver {
    /// Create a resolver reading GCP project hints from `project_env`
    pub fn new(project_env: Arc<dyn ProjectEnv>) -> Self {
        Self { project_env }
    }

    /// Parse secret data for a provider.
    ///
    /// `key` selects the field holding the credential; `config` is the
    /// location config (AWS `profile`, Azure account fallbacks, GCP
    /// `projectID`).
    pub fn parse(
        &self,
        data: &BTreeMap<String, Vec<u8>>,
        key: &str,
        provider: CloudProvider,
        config: &BTreeMap<String, String>,
    ) -> Result<NormalizedCredential, Error> {
        match provider {
            CloudProvider::Aws => {
                let payload = required_field(data, key, provider)?;
                let profile = config.get("profile").map(String::as_str);
                aws::parse(payload, profile).map(NormalizedCredential::Aws)
            }
            CloudProvider::Azure => azure::parse(data, key, config).map(NormalizedCredential::Azure),
            CloudProvider::Gcp => {
                let payload = required_field(data, key, provider)?;
                gcp::parse(payload, config, self.project_env.as_ref()).map(NormalizedCredential::Gcp)
            }
        }
    }

    /// Parse a Secret, consulting and filling `cache` when given
    pub fn parse_secret(
        &self,
        secret: &Secret,
        key: &str,
        provider: CloudProvider,
        config: &BTreeMap<String, String>,
        cache: Option<&CredentialCache>,
    ) -> Result<NormalizedCredential, Error> {
        let namespace = secret.metadata.namespace.as_deref().unwrap_or_default();
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        let version = secret.metadata.resource_version.as_deref();

        let scope = config_scope(provider, config);

        if let Some(hit) = cache.and_then(|c| c.get(namespace, name, key, &scope, version)) {
            debug!(namespace, name, key, scope = %scope, "Using cached credential");
            return Ok(hit);
        }

        let parsed = self.parse(&secret_data(secret), key, provider, config)?;
        if let Some(cache) = cache {
            cache.insert(namespace, name, key, &scope, version, parsed.clone());
        }
        Ok(parsed)
    }
}

/// The location config keys a parse for `provider` reads
pub fn config_inputs(provider: CloudProvider) -> &'static [&'static str] {
    match provider {
        CloudProvider::Aws => &["profile"],
        CloudProvider::Azure => &["storageAccount", "resourceGroup", "subscriptionId"],
        CloudProvider::Gcp => &["projectID"],
    }
}

/// Cache scope for a parse: the provider plus the config values it reads
pub fn config_scope(provider: CloudProvider, config: &BTreeMap<String, String>) -> String {
    let mut scope = provider.as_str().to_string();
    for key in config_inputs(provider) {
        if let Some(value) = config.get(*key) {
            scope.push_str(&format!(";{}={}", key, value));
        }
    }
    scope
}

fn required_field<'a>(
    data: &'a BTreeMap<String, Vec<u8>>,
    key: &str,
    provider: CloudProvider,
) -> Result<&'a [u8], Error> {
    let payload = data.get(key).ok_or_else(|| {
        Error::not_found(
            format!("secret key {:?}", key),
            provider.as_str(),
            "credential secret has no such key",
        )
    })?;
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::Resolution {
            kind: ResolutionKind::Malformed,
            resource: format!("secret key {:?}", key),
            provider: provider.to_string(),
            message: "credential payload is empty".to_string(),
        });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MockProjectEnv;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use std::time::Duration;

    fn resolver() -> CredentialResolver {
        let mut env = MockProjectEnv::new();
        env.expect_var().returning(|_| None);
        CredentialResolver::new(Arc::new(env))
    }

    fn data(key: &str, value: &str) -> BTreeMap<String, Vec<u8>> {
        BTreeMap::from([(key.to_string(), value.as_bytes().to_vec())])
    }

    const AWS: &str = "[default]\naws_access_key_id = A\naws_secret_access_key = B\n";

    #[test]
    fn dispatches_by_provider() {
        let r = resolver();
        let aws = r
            .parse(&data("cloud", AWS), "cloud", CloudProvider::Aws, &BTreeMap::new())
            .unwrap();
        assert_eq!(aws.provider(), CloudProvider::Aws);
        assert!(!aws.is_federated());

        let azure = r
            .parse(
                &data("cloud", "AZURE_TENANT_ID=t\nAZURE_CLIENT_ID=c\n"),
                "cloud",
                CloudProvider::Azure,
                &BTreeMap::new(),
            )
            .unwrap();
        assert!(azure.is_federated());
    }

    #[test]
    fn aws_profile_comes_from_config() {
        let text = format!("{}[prod]\naws_access_key_id = P\naws_secret_access_key = Q\n", AWS);
        let config = BTreeMap::from([("profile".to_string(), "prod".to_string())]);
        match resolver()
            .parse(&data("cloud", &text), "cloud", CloudProvider::Aws, &config)
            .unwrap()
        {
            NormalizedCredential::Aws(c) => assert_eq!(c.profile, "prod"),
            other => panic!("expected aws credential, got {other:?}"),
        }
    }

    #[test]
    fn missing_and_empty_keys_are_resolution_errors() {
        let r = resolver();
        let err = r
            .parse(&data("cloud", AWS), "other", CloudProvider::Aws, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution {
                kind: ResolutionKind::NotFound,
                ..
            }
        ));

        let err = r
            .parse(&data("cloud", "  \n"), "cloud", CloudProvider::Gcp, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Resolution {
                kind: ResolutionKind::Malformed,
                ..
            }
        ));
    }

    fn aws_secret(text: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("cloud-credentials".to_string()),
                namespace: Some("velero".to_string()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "cloud".to_string(),
                ByteString(text.as_bytes().to_vec()),
            )])),
            ..Default::default()
        }
    }

    #[test]
    fn cached_parse_honours_each_profile() {
        let r = resolver();
        let cache = CredentialCache::new(Duration::from_secs(60));
        let secret = aws_secret(&format!(
            "{}[prod]\naws_access_key_id = P\naws_secret_access_key = Q\n",
            AWS
        ));
        let profile = |p: &str| BTreeMap::from([("profile".to_string(), p.to_string())]);
        let key_id = |c: NormalizedCredential| match c {
            NormalizedCredential::Aws(AwsCredential {
                auth: AwsAuth::StaticKeys { access_key_id, .. },
                ..
            }) => access_key_id,
            other => panic!("expected static aws keys, got {other:?}"),
        };

        let default = r
            .parse_secret(&secret, "cloud", CloudProvider::Aws, &BTreeMap::new(), Some(&cache))
            .unwrap();
        assert_eq!(key_id(default), "A");

        let prod = r
            .parse_secret(&secret, "cloud", CloudProvider::Aws, &profile("prod"), Some(&cache))
            .unwrap();
        assert_eq!(key_id(prod), "P");

        assert!(r
            .parse_secret(&secret, "cloud", CloudProvider::Aws, &profile("nope"), Some(&cache))
            .is_err());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn scope_only_reads_provider_inputs() {
        let config = BTreeMap::from([
            ("profile".to_string(), "prod".to_string()),
            ("region".to_string(), "us-east-1".to_string()),
            ("projectID".to_string(), "p".to_string()),
        ]);
        assert_eq!(config_scope(CloudProvider::Aws, &config), "aws;profile=prod");
        assert_eq!(config_scope(CloudProvider::Gcp, &config), "gcp;projectID=p");
        assert_eq!(config_scope(CloudProvider::Azure, &config), "azure");
    }

    #[test]
    fn parse_secret_uses_cache_until_rotation() {
        let r = resolver();
        let cache = CredentialCache::new(Duration::from_secs(60));
        let mut secret = Secret {
            metadata: ObjectMeta {
                name: Some("cloud-credentials".to_string()),
                namespace: Some("velero".to_string()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "cloud".to_string(),
                ByteString(AWS.as_bytes().to_vec()),
            )])),
            ..Default::default()
        };

        r.parse_secret(&secret, "cloud", CloudProvider::Aws, &BTreeMap::new(), Some(&cache))
            .unwrap();
        assert_eq!(cache.len(), 1);

        // a rotated secret with a broken payload must not be masked by the cache
        secret.metadata.resource_version = Some("2".to_string());
        secret.data = Some(BTreeMap::from([(
            "cloud".to_string(),
            ByteString(b"garbage".to_vec()),
        )]));
        assert!(r
            .parse_secret(&secret, "cloud", CloudProvider::Aws, &BTreeMap::new(), Some(&cache))
            .is_err());
    }
}
