//! GCP credential parsing
//!
//! GCP secrets hold a JSON key file. `service_account` keys carry their
//! project directly. `external_account` (Workload Identity Federation)
//! files name the impersonated service account in
//! `service_account_impersonation_url`, and the project is derived from
//! that account's email domain when possible.

use std::collections::BTreeMap;

use cairn_common::Error;
use serde::Deserialize;

use crate::env::{project_from_env, ProjectEnv};

const PROVIDER: &str = "gcp";

const SA_EMAIL_SUFFIX: &str = ".iam.gserviceaccount.com";

/// Credential file type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcpCredentialKind {
    /// Service account key file
    ServiceAccount,
    /// Workload Identity Federation configuration
    ExternalAccount,
}

/// A resolved GCP credential
#[derive(Clone, PartialEq)]
pub struct GcpCredential {
    /// Project the credential operates in
    pub project_id: String,
    /// Credential file type
    pub kind: GcpCredentialKind,
    /// Service account email (the impersonated account for WIF)
    pub service_account_email: Option<String>,
    raw: Vec<u8>,
}

impl GcpCredential {
    /// The original JSON payload, for handing to a token source
    pub fn raw_json(&self) -> &[u8] {
        &self.raw
    }
}

impl std::fmt::Debug for GcpCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpCredential")
            .field("project_id", &self.project_id)
            .field("kind", &self.kind)
            .field("service_account_email", &self.service_account_email)
            .field("raw", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct KeyFile {
    #[serde(rename = "type")]
    type_: Option<String>,
    project_id: Option<String>,
    client_email: Option<String>,
    private_key: Option<String>,
    audience: Option<String>,
    token_url: Option<String>,
    service_account_impersonation_url: Option<String>,
}

/// Extract the service account email from an impersonation URL
///
/// `https://iamcredentials.googleapis.com/v1/projects/-/serviceAccounts/<email>:generateAccessToken`
pub fn impersonated_email(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("serviceAccounts/")?;
    let email = rest.split_once(':').map(|(e, _)| e).unwrap_or(rest);
    (!email.is_empty()).then(|| email.to_string())
}

/// Project id encoded in a service account email, if it is a
/// user-managed account (`<name>@<project>.iam.gserviceaccount.com`)
pub fn project_from_email(email: &str) -> Option<String> {
    let (_, domain) = email.split_once('@')?;
    let project = domain.strip_suffix(SA_EMAIL_SUFFIX)?;
    (!project.is_empty()).then(|| project.to_string())
}

/// Parse a GCP credential JSON payload.
///
/// For external accounts the project falls back to `projectID` in `config`
/// and then to the environment.
pub fn parse(
    data: &[u8],
    config: &BTreeMap<String, String>,
    env: &dyn ProjectEnv,
) -> Result<GcpCredential, Error> {
    let file: KeyFile = serde_json::from_slice(data)
        .map_err(|e| Error::credential(PROVIDER, format!("credentials are not valid JSON: {}", e)))?;

    let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.is_empty()).cloned();
    let missing = |key: &str, kind: &str| {
        Error::credential(PROVIDER, format!("{} credentials missing {:?}", kind, key))
    };

    match file.type_.as_deref() {
        Some("service_account") => {
            let project_id =
                non_empty(&file.project_id).ok_or_else(|| missing("project_id", "service_account"))?;
            let email = non_empty(&file.client_email)
                .ok_or_else(|| missing("client_email", "service_account"))?;
            non_empty(&file.private_key).ok_or_else(|| missing("private_key", "service_account"))?;
            Ok(GcpCredential {
                project_id,
                kind: GcpCredentialKind::ServiceAccount,
                service_account_email: Some(email),
                raw: data.to_vec(),
            })
        }
        Some("external_account") => {
            non_empty(&file.audience).ok_or_else(|| missing("audience", "external_account"))?;
            non_empty(&file.token_url).ok_or_else(|| missing("token_url", "external_account"))?;
            let email = non_empty(&file.service_account_impersonation_url)
                .and_then(|url| impersonated_email(&url));
            let project_id = email
                .as_deref()
                .and_then(project_from_email)
                .or_else(|| config.get("projectID").filter(|p| !p.is_empty()).cloned())
                .or_else(|| project_from_env(env))
                .ok_or_else(|| {
                    Error::credential(
                        PROVIDER,
                        "could not determine project id for external_account credentials: \
                         set projectID in the location config or GOOGLE_CLOUD_PROJECT",
                    )
                })?;
            Ok(GcpCredential {
                project_id,
                kind: GcpCredentialKind::ExternalAccount,
                service_account_email: email,
                raw: data.to_vec(),
            })
        }
        Some(other) => Err(Error::credential(
            PROVIDER,
            format!(
                "unsupported credential type {:?}: expected service_account or external_account",
                other
            ),
        )),
        None => Err(Error::credential(
            PROVIDER,
            "missing \"type\": expected service_account (project_id, client_email, private_key) \
             or external_account (audience, token_url)",
        )),
    }
}
