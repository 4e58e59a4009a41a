//! OAuth bearer tokens for the Azure and GCS transports
//!
//! Tokens are fetched lazily and cached until shortly before expiry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::{check_response, TransportError};

/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN_SECS: i64 = 60;

/// Lifetime requested for self-signed service account assertions
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// OAuth scope for Google Cloud APIs
pub const GCP_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// OAuth scope for Azure Storage
pub const AZURE_STORAGE_SCOPE: &str = "https://storage.azure.com/.default";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// A bearer token and its expiry
#[derive(Clone, Debug, PartialEq)]
pub struct AccessToken {
    /// Token value
    pub token: String,
    /// When the token stops being valid
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Something that can mint a new bearer token
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch a fresh token from the identity provider
    async fn fetch(&self, http: &reqwest::Client) -> Result<AccessToken, TransportError>;
}

/// Caches the token of a [`TokenSource`]
#[derive(Clone)]
pub struct CachedToken {
    source: Arc<dyn TokenSource>,
    http: reqwest::Client,
    current: Arc<RwLock<Option<AccessToken>>>,
}

impl CachedToken {
    /// Wrap a token source
    pub fn new(source: Arc<dyn TokenSource>, http: reqwest::Client) -> Self {
        Self {
            source,
            http,
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// A valid bearer token, fetching a new one when needed
    pub async fn bearer(&self) -> Result<String, TransportError> {
        if let Some(token) = self.current.read().await.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.token.clone());
            }
        }
        let mut current = self.current.write().await;
        if let Some(token) = current.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.token.clone());
            }
        }
        let token = self.source.fetch(&self.http).await?;
        debug!(expires_at = %token.expires_at, "Fetched access token");
        let value = token.token.clone();
        *current = Some(token);
        Ok(value)
    }
}

/// Encode `application/x-www-form-urlencoded` pairs
pub(crate) fn form_body(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[derive(Deserialize)]
struct OAuthResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

async fn post_form(
    http: &reqwest::Client,
    url: &str,
    pairs: &[(&str, &str)],
) -> Result<AccessToken, TransportError> {
    let response = http
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(form_body(pairs))
        .send()
        .await?;
    let body: OAuthResponse = check_response(response).await?.json().await?;
    Ok(AccessToken {
        token: body.access_token,
        expires_at: Utc::now() + chrono::Duration::seconds(body.expires_in.unwrap_or(3600)),
    })
}

async fn read_token_file(path: &str) -> Result<String, TransportError> {
    let token = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TransportError::other(format!("failed to read token file {}: {}", path, e)))?;
    Ok(token.trim().to_string())
}

// Azure

/// How an Entra ID client proves its identity
#[derive(Clone, PartialEq)]
pub enum AzureClientProof {
    /// Client secret
    Secret(String),
    /// Path to a projected federated token
    FederatedTokenFile(String),
}

/// Entra ID client credentials flow
pub struct AzureTokenSource {
    /// Authority host, e.g. `login.microsoftonline.com`
    pub authority_host: String,
    /// Tenant id
    pub tenant_id: String,
    /// Client id
    pub client_id: String,
    /// Secret or federated token
    pub proof: AzureClientProof,
}

impl AzureTokenSource {
    fn token_url(&self) -> String {
        format!(
            "https://{}/{}/oauth2/v2.0/token",
            self.authority_host, self.tenant_id
        )
    }
}

#[async_trait]
impl TokenSource for AzureTokenSource {
    async fn fetch(&self, http: &reqwest::Client) -> Result<AccessToken, TransportError> {
        let url = self.token_url();
        match &self.proof {
            AzureClientProof::Secret(secret) => {
                post_form(
                    http,
                    &url,
                    &[
                        ("grant_type", "client_credentials"),
                        ("client_id", self.client_id.as_str()),
                        ("client_secret", secret.as_str()),
                        ("scope", AZURE_STORAGE_SCOPE),
                    ],
                )
                .await
            }
            AzureClientProof::FederatedTokenFile(path) => {
                let assertion = read_token_file(path).await?;
                post_form(
                    http,
                    &url,
                    &[
                        ("grant_type", "client_credentials"),
                        ("client_id", self.client_id.as_str()),
                        ("client_assertion_type", CLIENT_ASSERTION_TYPE),
                        ("client_assertion", assertion.as_str()),
                        ("scope", AZURE_STORAGE_SCOPE),
                    ],
                )
                .await
            }
        }
    }
}

// GCP

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct ExternalAccount {
    audience: String,
    subject_token_type: String,
    token_url: String,
    credential_source: CredentialSource,
    #[serde(default)]
    service_account_impersonation_url: Option<String>,
}

#[derive(Deserialize)]
struct CredentialSource {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    format: Option<SourceFormat>,
}

#[derive(Deserialize)]
struct SourceFormat {
    #[serde(rename = "type", default)]
    type_: Option<String>,
    #[serde(default)]
    subject_token_field_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImpersonationResponse {
    access_token: String,
    expire_time: DateTime<Utc>,
}

/// Token source for a GCP credential JSON file
pub enum GcpTokenSource {
    /// Self-signed JWT exchanged at the key's token URI
    ServiceAccount {
        /// Service account email
        client_email: String,
        /// PEM private key
        private_key: String,
        /// OAuth token endpoint
        token_uri: String,
    },
    /// Workload Identity Federation: STS exchange, then optional impersonation
    ExternalAccount {
        /// STS audience
        audience: String,
        /// Subject token type
        subject_token_type: String,
        /// STS endpoint
        token_url: String,
        /// File holding the subject token
        token_file: String,
        /// Field holding the token when the file is JSON
        json_field: Option<String>,
        /// generateAccessToken URL of the impersonated account
        impersonation_url: Option<String>,
    },
}

impl GcpTokenSource {
    /// Build a token source from a credential JSON payload
    pub fn from_json(raw: &[u8]) -> Result<Self, TransportError> {
        let value: serde_json::Value = serde_json::from_slice(raw)
            .map_err(|e| TransportError::other(format!("invalid GCP credential JSON: {}", e)))?;
        let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or_default();
        match kind {
            "service_account" => {
                let key: ServiceAccountKey = serde_json::from_value(value).map_err(|e| {
                    TransportError::other(format!("invalid service account key: {}", e))
                })?;
                Ok(Self::ServiceAccount {
                    client_email: key.client_email,
                    private_key: key.private_key,
                    token_uri: key.token_uri,
                })
            }
            "external_account" => {
                let account: ExternalAccount = serde_json::from_value(value).map_err(|e| {
                    TransportError::other(format!("invalid external account config: {}", e))
                })?;
                let token_file = account.credential_source.file.ok_or_else(|| {
                    TransportError::other("external account credential_source has no file")
                })?;
                let json_field = account
                    .credential_source
                    .format
                    .filter(|f| f.type_.as_deref() == Some("json"))
                    .and_then(|f| f.subject_token_field_name);
                Ok(Self::ExternalAccount {
                    audience: account.audience,
                    subject_token_type: account.subject_token_type,
                    token_url: account.token_url,
                    token_file,
                    json_field,
                    impersonation_url: account.service_account_impersonation_url,
                })
            }
            other => Err(TransportError::other(format!(
                "unsupported GCP credential type {:?}",
                other
            ))),
        }
    }
}

fn sign_assertion(
    client_email: &str,
    private_key: &str,
    token_uri: &str,
    now: DateTime<Utc>,
) -> Result<String, TransportError> {
    let claims = AssertionClaims {
        iss: client_email.to_string(),
        scope: GCP_SCOPE.to_string(),
        aud: token_uri.to_string(),
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
        .map_err(|e| TransportError::other(format!("invalid service account private key: {}", e)))?;
    encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| TransportError::other(format!("failed to sign assertion: {}", e)))
}

fn extract_subject_token(raw: &str, json_field: Option<&str>) -> Result<String, TransportError> {
    let Some(field) = json_field else {
        return Ok(raw.trim().to_string());
    };
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| TransportError::other(format!("subject token file is not JSON: {}", e)))?;
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| TransportError::other(format!("subject token file has no field {:?}", field)))
}

#[async_trait]
impl TokenSource for GcpTokenSource {
    async fn fetch(&self, http: &reqwest::Client) -> Result<AccessToken, TransportError> {
        match self {
            Self::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => {
                let assertion = sign_assertion(client_email, private_key, token_uri, Utc::now())?;
                post_form(
                    http,
                    token_uri,
                    &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
                )
                .await
            }
            Self::ExternalAccount {
                audience,
                subject_token_type,
                token_url,
                token_file,
                json_field,
                impersonation_url,
            } => {
                let raw = tokio::fs::read_to_string(token_file).await.map_err(|e| {
                    TransportError::other(format!("failed to read token file {}: {}", token_file, e))
                })?;
                let subject_token = extract_subject_token(&raw, json_field.as_deref())?;
                let federated = post_form(
                    http,
                    token_url,
                    &[
                        ("grant_type", TOKEN_EXCHANGE_GRANT),
                        ("audience", audience.as_str()),
                        ("scope", GCP_SCOPE),
                        ("requested_token_type", ACCESS_TOKEN_TYPE),
                        ("subject_token", subject_token.as_str()),
                        ("subject_token_type", subject_token_type.as_str()),
                    ],
                )
                .await?;
                let Some(url) = impersonation_url else {
                    return Ok(federated);
                };
                let response = http
                    .post(url)
                    .bearer_auth(&federated.token)
                    .json(&serde_json::json!({
                        "scope": [GCP_SCOPE],
                        "lifetime": format!("{}s", ASSERTION_LIFETIME_SECS),
                    }))
                    .send()
                    .await?;
                let body: ImpersonationResponse = check_response(response).await?.json().await?;
                Ok(AccessToken {
                    token: body.access_token,
                    expires_at: body.expire_time,
                })
            }
        }
    }
}

/// HTTP client shared by the REST transports
pub fn http_client() -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| TransportError::other(format!("failed to create HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        calls: AtomicU32,
        lifetime_secs: i64,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch(&self, _http: &reqwest::Client) -> Result<AccessToken, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken {
                token: format!("token-{n}"),
                expires_at: Utc::now() + chrono::Duration::seconds(self.lifetime_secs),
            })
        }
    }

    #[tokio::test]
    async fn fresh_tokens_are_reused() {
        let source = Arc::new(CountingSource {
            calls: AtomicU32::new(0),
            lifetime_secs: 3600,
        });
        let cached = CachedToken::new(source.clone(), reqwest::Client::new());
        assert_eq!(cached.bearer().await.unwrap(), "token-0");
        assert_eq!(cached.bearer().await.unwrap(), "token-0");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tokens_near_expiry_are_refreshed() {
        let source = Arc::new(CountingSource {
            calls: AtomicU32::new(0),
            lifetime_secs: 30,
        });
        let cached = CachedToken::new(source.clone(), reqwest::Client::new());
        assert_eq!(cached.bearer().await.unwrap(), "token-0");
        assert_eq!(cached.bearer().await.unwrap(), "token-1");
    }

    #[test]
    fn form_body_escapes_values() {
        assert_eq!(
            form_body(&[("scope", AZURE_STORAGE_SCOPE), ("a b", "c&d")]),
            "scope=https%3A%2F%2Fstorage.azure.com%2F.default&a%20b=c%26d"
        );
    }

    #[test]
    fn external_account_json_is_understood() {
        let raw = serde_json::json!({
            "type": "external_account",
            "audience": "//iam.googleapis.com/projects/1/locations/global/workloadIdentityPools/p/providers/k",
            "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
            "token_url": "https://sts.googleapis.com/v1/token",
            "credential_source": {
                "file": "/var/run/secrets/openshift/serviceaccount/token",
                "format": { "type": "json", "subject_token_field_name": "id_token" }
            },
            "service_account_impersonation_url": "https://iamcredentials.googleapis.com/v1/projects/-/serviceAccounts/velero@proj.iam.gserviceaccount.com:generateAccessToken"
        });
        match GcpTokenSource::from_json(raw.to_string().as_bytes()).unwrap() {
            GcpTokenSource::ExternalAccount {
                token_file,
                json_field,
                impersonation_url,
                ..
            } => {
                assert_eq!(token_file, "/var/run/secrets/openshift/serviceaccount/token");
                assert_eq!(json_field.as_deref(), Some("id_token"));
                assert!(impersonation_url.is_some());
            }
            GcpTokenSource::ServiceAccount { .. } => panic!("expected external account"),
        }
    }

    #[test]
    fn subject_token_extraction() {
        assert_eq!(extract_subject_token(" abc\n", None).unwrap(), "abc");
        assert_eq!(
            extract_subject_token(r#"{"id_token":"xyz"}"#, Some("id_token")).unwrap(),
            "xyz"
        );
        assert!(extract_subject_token(r#"{"other":"xyz"}"#, Some("id_token")).is_err());
    }

    #[test]
    fn service_account_key_defaults_token_uri() {
        let raw = serde_json::json!({
            "type": "service_account",
            "client_email": "velero@proj.iam.gserviceaccount.com",
            "private_key": "not-a-key",
        });
        match GcpTokenSource::from_json(raw.to_string().as_bytes()).unwrap() {
            GcpTokenSource::ServiceAccount { token_uri, .. } => {
                assert_eq!(token_uri, "https://oauth2.googleapis.com/token")
            }
            GcpTokenSource::ExternalAccount { .. } => panic!("expected service account"),
        }
        assert!(sign_assertion("a@b", "not-a-key", "https://t", Utc::now()).is_err());
    }

    #[test]
    fn unknown_credential_types_are_rejected() {
        assert!(GcpTokenSource::from_json(br#"{"type":"authorized_user"}"#).is_err());
        assert!(GcpTokenSource::from_json(b"not json").is_err());
    }
}
