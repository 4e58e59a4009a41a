//! Azure credential parsing
//!
//! Azure secrets come in two layouts: one field holding newline-delimited
//! `KEY=VALUE` pairs, or the same keys stored as individual secret fields.
//! Within either layout a storage account access key takes precedence over
//! identity-based authentication.

use std::collections::BTreeMap;

use cairn_common::Error;

const PROVIDER: &str = "azure";

/// Secret fields that may hold a `KEY=VALUE` blob, after the selected key
pub const BLOB_FIELDS: [&str; 2] = ["cloud", "azurekey"];

/// Shared-key access
pub const ACCESS_KEY: &str = "AZURE_STORAGE_ACCOUNT_ACCESS_KEY";
/// Storage account name
pub const STORAGE_ACCOUNT: &str = "AZURE_STORAGE_ACCOUNT";
/// Subscription id
pub const SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
/// Resource group
pub const RESOURCE_GROUP: &str = "AZURE_RESOURCE_GROUP";
/// Entra ID tenant
pub const TENANT_ID: &str = "AZURE_TENANT_ID";
/// Application (client) id
pub const CLIENT_ID: &str = "AZURE_CLIENT_ID";
/// Client secret for service principals
pub const CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
/// Projected token path for workload identity
pub const FEDERATED_TOKEN_FILE: &str = "AZURE_FEDERATED_TOKEN_FILE";
/// Cloud environment name (e.g. AzurePublicCloud)
pub const CLOUD_NAME: &str = "AZURE_CLOUD_NAME";

/// Token path used for workload identity when the secret names none
pub const DEFAULT_FEDERATED_TOKEN_FILE: &str = "/var/run/secrets/azure/tokens/azure-identity-token";

/// Which secret layout the credential was read from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AzureLayout {
    /// A single field holding `KEY=VALUE` lines
    Blob {
        /// Name of the field
        field: String,
    },
    /// One secret field per key
    Keys,
}

/// How an Azure credential authenticates
#[derive(Clone, PartialEq)]
pub enum AzureAuth {
    /// Storage account shared key
    SharedKey {
        /// Base64 account key
        access_key: String,
    },
    /// Service principal with a client secret
    ServicePrincipal {
        /// Tenant id
        tenant_id: String,
        /// Client id
        client_id: String,
        /// Client secret
        client_secret: String,
    },
    /// Workload identity federation with a projected token
    WorkloadIdentity {
        /// Tenant id
        tenant_id: String,
        /// Client id
        client_id: String,
        /// Path to the projected service account token
        federated_token_file: String,
    },
}

impl std::fmt::Debug for AzureAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey { .. } => f
                .debug_struct("SharedKey")
                .field("access_key", &"<redacted>")
                .finish(),
            Self::ServicePrincipal {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ServicePrincipal")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .finish(),
            Self::WorkloadIdentity {
                tenant_id,
                client_id,
                federated_token_file,
            } => f
                .debug_struct("WorkloadIdentity")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("federated_token_file", federated_token_file)
                .finish(),
        }
    }
}

/// A resolved Azure credential
#[derive(Clone, Debug, PartialEq)]
pub struct AzureCredential {
    /// Storage account the credential applies to
    pub storage_account: Option<String>,
    /// Subscription id
    pub subscription_id: Option<String>,
    /// Resource group
    pub resource_group: Option<String>,
    /// Cloud environment name
    pub cloud_name: Option<String>,
    /// Authentication method
    pub auth: AzureAuth,
    /// Layout the credential was read from
    pub layout: AzureLayout,
}

/// Parse newline-delimited `KEY=VALUE` pairs.
///
/// Blank lines and `#` comments are skipped; values may be quoted.
pub fn parse_env_blob(text: &str) -> Result<BTreeMap<String, String>, Error> {
    let mut out = BTreeMap::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            Error::credential(PROVIDER, format!("line {}: expected KEY=VALUE", idx + 1))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::credential(
                PROVIDER,
                format!("line {}: empty key", idx + 1),
            ));
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        out.insert(key.to_string(), value.to_string());
    }
    Ok(out)
}

/// Parse an Azure credential secret.
///
/// `key` is the field selected by the location's credential reference;
/// `config` supplies storageAccount, resourceGroup, and subscriptionId
/// fallbacks.
pub fn parse(
    secret: &BTreeMap<String, Vec<u8>>,
    key: &str,
    config: &BTreeMap<String, String>,
) -> Result<AzureCredential, Error> {
    let top_level: BTreeMap<String, String> = secret
        .iter()
        .filter_map(|(k, v)| {
            std::str::from_utf8(v)
                .ok()
                .map(|s| (k.clone(), s.trim().to_string()))
        })
        .collect();

    let blob_field = std::iter::once(key)
        .chain(BLOB_FIELDS)
        .find(|f| secret.contains_key(*f));

    let (values, layout) = match blob_field {
        Some(field) => {
            let text = std::str::from_utf8(&secret[field]).map_err(|_| {
                Error::credential(PROVIDER, format!("field {:?} is not valid UTF-8", field))
            })?;
            (
                parse_env_blob(text)?,
                AzureLayout::Blob {
                    field: field.to_string(),
                },
            )
        }
        None => (top_level.clone(), AzureLayout::Keys),
    };

    let get = |k: &str| values.get(k).filter(|v| !v.is_empty()).cloned();

    let auth = if let Some(access_key) = get(ACCESS_KEY) {
        AzureAuth::SharedKey { access_key }
    } else {
        match (get(TENANT_ID), get(CLIENT_ID)) {
            (Some(tenant_id), Some(client_id)) => match get(CLIENT_SECRET) {
                Some(client_secret) => AzureAuth::ServicePrincipal {
                    tenant_id,
                    client_id,
                    client_secret,
                },
                None => AzureAuth::WorkloadIdentity {
                    tenant_id,
                    client_id,
                    federated_token_file: get(FEDERATED_TOKEN_FILE)
                        .unwrap_or_else(|| DEFAULT_FEDERATED_TOKEN_FILE.to_string()),
                },
            },
            _ => {
                return Err(Error::credential(
                    PROVIDER,
                    format!(
                        "no recognized credentials: expected {}, or {} and {} with {} or {}",
                        ACCESS_KEY, TENANT_ID, CLIENT_ID, CLIENT_SECRET, FEDERATED_TOKEN_FILE
                    ),
                ))
            }
        }
    };

    let from_config = |k: &str| config.get(k).filter(|v| !v.is_empty()).cloned();
    let storage_account = top_level
        .get(STORAGE_ACCOUNT)
        .filter(|v| !v.is_empty())
        .cloned()
        .or_else(|| get(STORAGE_ACCOUNT))
        .or_else(|| from_config("storageAccount"));

    Ok(AzureCredential {
        storage_account,
        subscription_id: get(SUBSCRIPTION_ID).or_else(|| from_config("subscriptionId")),
        resource_group: get(RESOURCE_GROUP).or_else(|| from_config("resourceGroup")),
        cloud_name: get(CLOUD_NAME),
        auth,
        layout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(pairs: &[(&str, &str)]) -> BTreeMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn blob_with_service_principal() {
        let s = secret(&[(
            "cloud",
            "AZURE_SUBSCRIPTION_ID=sub\nAZURE_TENANT_ID=tenant\nAZURE_CLIENT_ID=client\n\
             AZURE_CLIENT_SECRET=\"s3cret\"\nAZURE_RESOURCE_GROUP=rg\nAZURE_CLOUD_NAME=AzurePublicCloud\n",
        )]);
        let cred = parse(&s, "cloud", &BTreeMap::new()).unwrap();
        assert_eq!(
            cred.layout,
            AzureLayout::Blob {
                field: "cloud".to_string()
            }
        );
        assert_eq!(cred.subscription_id.as_deref(), Some("sub"));
        assert_eq!(cred.resource_group.as_deref(), Some("rg"));
        match cred.auth {
            AzureAuth::ServicePrincipal { client_secret, .. } => assert_eq!(client_secret, "s3cret"),
            other => panic!("expected service principal, got {other:?}"),
        }
    }

    #[test]
    fn azurekey_field_is_accepted_when_selected_key_missing() {
        let s = secret(&[("azurekey", "AZURE_STORAGE_ACCOUNT_ACCESS_KEY=abc==\n")]);
        let cred = parse(&s, "cloud", &BTreeMap::new()).unwrap();
        assert!(matches!(cred.auth, AzureAuth::SharedKey { .. }));
    }

    #[test]
    fn access_key_beats_identity() {
        let s = secret(&[(
            "cloud",
            "AZURE_TENANT_ID=t\nAZURE_CLIENT_ID=c\nAZURE_CLIENT_SECRET=s\n\
             AZURE_STORAGE_ACCOUNT_ACCESS_KEY=key==\n",
        )]);
        let cred = parse(&s, "cloud", &BTreeMap::new()).unwrap();
        assert!(matches!(cred.auth, AzureAuth::SharedKey { .. }));
    }

    #[test]
    fn individual_keys_with_workload_identity() {
        let s = secret(&[
            ("AZURE_TENANT_ID", "tenant"),
            ("AZURE_CLIENT_ID", "client"),
            ("AZURE_FEDERATED_TOKEN_FILE", "/var/run/token"),
        ]);
        let cred = parse(&s, "cloud", &BTreeMap::new()).unwrap();
        assert_eq!(cred.layout, AzureLayout::Keys);
        match cred.auth {
            AzureAuth::WorkloadIdentity {
                federated_token_file,
                ..
            } => assert_eq!(federated_token_file, "/var/run/token"),
            other => panic!("expected workload identity, got {other:?}"),
        }
    }

    #[test]
    fn storage_account_precedence() {
        let config = BTreeMap::from([("storageAccount".to_string(), "fromconfig".to_string())]);

        let s = secret(&[
            ("cloud", "AZURE_STORAGE_ACCOUNT=fromblob\nAZURE_STORAGE_ACCOUNT_ACCESS_KEY=k\n"),
            ("AZURE_STORAGE_ACCOUNT", "explicit"),
        ]);
        assert_eq!(
            parse(&s, "cloud", &config).unwrap().storage_account.as_deref(),
            Some("explicit")
        );

        let s = secret(&[(
            "cloud",
            "AZURE_STORAGE_ACCOUNT=fromblob\nAZURE_STORAGE_ACCOUNT_ACCESS_KEY=k\n",
        )]);
        assert_eq!(
            parse(&s, "cloud", &config).unwrap().storage_account.as_deref(),
            Some("fromblob")
        );

        let s = secret(&[("cloud", "AZURE_STORAGE_ACCOUNT_ACCESS_KEY=k\n")]);
        assert_eq!(
            parse(&s, "cloud", &config).unwrap().storage_account.as_deref(),
            Some("fromconfig")
        );
    }

    #[test]
    fn unrecognized_keys_name_both_formats() {
        let s = secret(&[("cloud", "SOMETHING=else\n")]);
        let msg = parse(&s, "cloud", &BTreeMap::new()).unwrap_err().to_string();
        assert!(msg.contains(ACCESS_KEY));
        assert!(msg.contains(CLIENT_SECRET));
        assert!(msg.contains("[azure]"));
    }

    #[test]
    fn malformed_blob_is_rejected() {
        let s = secret(&[("cloud", "AZURE_TENANT_ID tenant\n")]);
        assert!(parse(&s, "cloud", &BTreeMap::new()).is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let s = secret(&[(
            "cloud",
            "AZURE_TENANT_ID=t\nAZURE_CLIENT_ID=c\nAZURE_CLIENT_SECRET=topsecret\n",
        )]);
        let out = format!("{:?}", parse(&s, "cloud", &BTreeMap::new()).unwrap());
        assert!(!out.contains("topsecret"));
    }
}
