//! Azure Blob container REST transport
//!
//! Requests are authorized with the storage account SharedKey scheme or an
//! Entra ID bearer token, depending on the credential.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cairn_common::Error;
use cairn_credentials::{AzureAuth, AzureCredential};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::Sha256;

use super::token::{http_client, AzureClientProof, AzureTokenSource, CachedToken};
use super::{check_response, TransportError};
use crate::azure::BlobContainerApi;
use crate::client::BucketTarget;

/// Blob service REST API version
const API_VERSION: &str = "2021-08-06";

const METADATA_PREFIX: &str = "x-ms-meta-";

/// Authority and storage endpoint suffix for an Azure cloud
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AzureCloud {
    /// Entra ID authority host
    pub authority_host: &'static str,
    /// Storage endpoint suffix
    pub storage_suffix: &'static str,
}

const PUBLIC_CLOUD: AzureCloud = AzureCloud {
    authority_host: "login.microsoftonline.com",
    storage_suffix: "core.windows.net",
};

/// Resolve `AZURE_CLOUD_NAME`; unknown or absent names mean the public cloud
pub fn cloud_for(name: Option<&str>) -> AzureCloud {
    match name.map(|n| n.trim().to_ascii_lowercase()).as_deref() {
        Some("azureusgovernmentcloud") | Some("azureusgovernment") => AzureCloud {
            authority_host: "login.microsoftonline.us",
            storage_suffix: "core.usgovcloudapi.net",
        },
        Some("azurechinacloud") => AzureCloud {
            authority_host: "login.chinacloudapi.cn",
            storage_suffix: "core.chinacloudapi.cn",
        },
        _ => PUBLIC_CLOUD,
    }
}

enum BlobAuth {
    SharedKey(Vec<u8>),
    Bearer(CachedToken),
}

/// Blob service client for one storage account
pub struct AzureBlobTransport {
    http: reqwest::Client,
    account: String,
    endpoint: String,
    auth: BlobAuth,
}

impl std::fmt::Debug for AzureBlobTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureBlobTransport")
            .field("account", &self.account)
            .field("endpoint", &self.endpoint)
            .field("auth", &"<redacted>")
            .finish()
    }
}

impl AzureBlobTransport {
    /// Build a transport from a parsed Azure credential
    ///
    /// The storage account comes from the credential, then the
    /// `storageAccount` location config key.
    pub fn new(credential: &AzureCredential, target: &BucketTarget) -> Result<Self, Error> {
        let account = credential
            .storage_account
            .clone()
            .or_else(|| target.config.get("storageAccount").cloned())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| Error::credential("azure", "no storage account in credential or config"))?;
        let cloud = cloud_for(credential.cloud_name.as_deref());
        let http = http_client().map_err(|e| Error::internal_with_context("azure", e.to_string()))?;

        let token_source = |tenant_id: &str, client_id: &str, proof: AzureClientProof| {
            CachedToken::new(
                Arc::new(AzureTokenSource {
                    authority_host: cloud.authority_host.to_string(),
                    tenant_id: tenant_id.to_string(),
                    client_id: client_id.to_string(),
                    proof,
                }),
                http.clone(),
            )
        };
        let auth = match &credential.auth {
            AzureAuth::SharedKey { access_key } => {
                let key = STANDARD.decode(access_key.trim()).map_err(|e| {
                    Error::credential("azure", format!("storage account key is not base64: {}", e))
                })?;
                BlobAuth::SharedKey(key)
            }
            AzureAuth::ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
            } => BlobAuth::Bearer(token_source(
                tenant_id,
                client_id,
                AzureClientProof::Secret(client_secret.clone()),
            )),
            AzureAuth::WorkloadIdentity {
                tenant_id,
                client_id,
                federated_token_file,
            } => BlobAuth::Bearer(token_source(
                tenant_id,
                client_id,
                AzureClientProof::FederatedTokenFile(federated_token_file.clone()),
            )),
        };

        Ok(Self {
            endpoint: format!("https://{}.blob.{}", account, cloud.storage_suffix),
            http,
            account,
            auth,
        })
    }

    async fn send(
        &self,
        method: Method,
        container: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), TransportError> {
        let mut ms_headers = BTreeMap::from([
            ("x-ms-date".to_string(), http_date()),
            ("x-ms-version".to_string(), API_VERSION.to_string()),
        ]);
        for (name, value) in metadata {
            ms_headers.insert(
                format!("{}{}", METADATA_PREFIX, name.to_ascii_lowercase()),
                value.clone(),
            );
        }

        let url = format!("{}/{}?restype=container", self.endpoint, container);
        let mut request = self.http.request(method.clone(), url);
        request = match &self.auth {
            BlobAuth::SharedKey(key) => {
                let query = BTreeMap::from([("restype".to_string(), "container".to_string())]);
                let to_sign =
                    string_to_sign(method.as_str(), &ms_headers, &self.account, container, &query);
                request.header(
                    reqwest::header::AUTHORIZATION,
                    format!("SharedKey {}:{}", self.account, sign(key, &to_sign)?),
                )
            }
            BlobAuth::Bearer(token) => request.bearer_auth(token.bearer().await?),
        };
        for (name, value) in &ms_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if method == Method::PUT {
            request = request.body("");
        }

        check_response(request.send().await?).await?;
        Ok(())
    }
}

fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// SharedKey string-to-sign for a container request with no standard headers
fn string_to_sign(
    method: &str,
    ms_headers: &BTreeMap<String, String>,
    account: &str,
    container: &str,
    query: &BTreeMap<String, String>,
) -> String {
    let mut out = format!("{}\n", method);
    // Content-Encoding through Range are all empty
    out.push_str(&"\n".repeat(11));
    for (name, value) in ms_headers {
        out.push_str(&format!("{}:{}\n", name, value.trim()));
    }
    out.push_str(&format!("/{}/{}", account, container));
    for (name, value) in query {
        out.push_str(&format!("\n{}:{}", name.to_ascii_lowercase(), value));
    }
    out
}

fn sign(key: &[u8], string_to_sign: &str) -> Result<String, TransportError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| TransportError::other(format!("invalid storage account key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl BlobContainerApi for AzureBlobTransport {
    async fn get_container_properties(&self, container: &str) -> Result<(), TransportError> {
        self.send(Method::HEAD, container, &BTreeMap::new()).await
    }

    async fn create_container(
        &self,
        container: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), TransportError> {
        self.send(Method::PUT, container, metadata).await
    }

    async fn delete_container(&self, container: &str) -> Result<(), TransportError> {
        self.send(Method::DELETE, container, &BTreeMap::new()).await
    }
}
