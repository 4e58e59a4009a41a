//! S3 transport backed by aws-sdk-s3

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_config::provider_config::ProviderConfig;
use aws_config::web_identity_token::{StaticConfiguration, WebIdentityTokenCredentialsProvider};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Tag, Tagging,
};
use aws_sdk_s3::Client;
use cairn_common::kube_utils::parse_bool;
use cairn_credentials::{AwsAuth, AwsCredential};
use tracing::{debug, warn};

use super::TransportError;
use crate::aws::S3Api;
use crate::client::BucketTarget;

/// Region that must not be sent as a location constraint
const US_EAST_1: &str = "us-east-1";

const SESSION_NAME: &str = "cairn-bucket";

/// S3 client configured from a parsed AWS credential
#[derive(Clone, Debug)]
pub struct S3Transport {
    client: Client,
}

impl S3Transport {
    /// Build a client for `target`
    ///
    /// Honors the location config keys `s3Url` (custom endpoint) and
    /// `s3ForcePathStyle`. The region comes from the target, then the
    /// credential profile, then `us-east-1`.
    pub fn new(credential: &AwsCredential, target: &BucketTarget) -> Self {
        let region = target
            .region
            .clone()
            .or_else(|| target.config.get("region").cloned())
            .or_else(|| credential.region.clone())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| US_EAST_1.to_string());
        let region = Region::new(region);

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(region.clone())
            .force_path_style(flag(&target.config, "s3ForcePathStyle"));

        builder = match &credential.auth {
            AwsAuth::StaticKeys {
                access_key_id,
                secret_access_key,
                session_token,
            } => builder.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                session_token.clone(),
                None,
                "cairn",
            )),
            AwsAuth::WebIdentity {
                role_arn,
                web_identity_token_file,
            } => {
                let provider = WebIdentityTokenCredentialsProvider::builder()
                    .static_configuration(StaticConfiguration {
                        web_identity_token_file: web_identity_token_file.into(),
                        role_arn: role_arn.clone(),
                        session_name: SESSION_NAME.to_string(),
                    })
                    .configure(&ProviderConfig::default().with_region(Some(region)))
                    .build();
                builder.credentials_provider(provider)
            }
        };

        if let Some(endpoint) = target.config.get("s3Url").filter(|u| !u.is_empty()) {
            debug!(endpoint = %endpoint, "Using custom S3 endpoint");
            builder = builder.endpoint_url(endpoint);
        }
        if flag(&target.config, "insecureSkipTLSVerify") {
            warn!("insecureSkipTLSVerify is not honored for bucket provisioning");
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

/// Read a boolean config flag the way location resolution does; unset or
/// unparseable values are false
fn flag(config: &BTreeMap<String, String>, key: &str) -> bool {
    let Some(value) = config.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
        return false;
    };
    parse_bool(value).unwrap_or_else(|e| {
        warn!(key, error = %e, "Ignoring unparseable config flag");
        false
    })
}

fn classify<E>(err: SdkError<E, HttpResponse>) -> TransportError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if matches!(err, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)) {
        return TransportError::network(DisplayErrorContext(&err).to_string());
    }
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = DisplayErrorContext(&err).to_string();
    match status {
        Some(status) => TransportError::from_status(status, message),
        None => TransportError::other(message),
    }
}

fn build_error(err: impl std::fmt::Display) -> TransportError {
    TransportError::other(format!("invalid S3 request: {}", err))
}

#[async_trait]
impl S3Api for S3Transport {
    async fn head_bucket(&self, bucket: &str) -> Result<(), TransportError> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        region: Option<String>,
    ) -> Result<(), TransportError> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if let Some(region) = region.filter(|r| !r.is_empty() && r != US_EAST_1) {
            let config = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region.as_str()))
                .build();
            request = request.create_bucket_configuration(config);
        }
        request.send().await.map_err(classify)?;
        Ok(())
    }

    async fn put_bucket_tagging(
        &self,
        bucket: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), TransportError> {
        let tag_set = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(build_error)?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(build_error)?;
        self.client
            .put_bucket_tagging()
            .bucket(bucket)
            .tagging(tagging)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), TransportError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}
