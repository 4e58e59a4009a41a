//! GCS JSON API transport

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cairn_common::Error;
use cairn_credentials::GcpCredential;
use serde::{Deserialize, Serialize};

use super::token::{http_client, CachedToken, GcpTokenSource};
use super::{check_response, TransportError};
use crate::client::BucketTarget;
use crate::gcs::{GcsApi, ObjectPage};

const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";

#[derive(Serialize)]
struct InsertBucket<'a> {
    name: &'a str,
    location: &'a str,
    #[serde(skip_serializing_if = "no_labels")]
    labels: &'a BTreeMap<String, String>,
}

fn no_labels(labels: &&BTreeMap<String, String>) -> bool {
    labels.is_empty()
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ObjectItem {
    name: String,
}

/// GCS client for one project
pub struct GcsTransport {
    http: reqwest::Client,
    token: CachedToken,
    project: String,
    base_url: String,
}

impl GcsTransport {
    /// Build a transport from a parsed GCP credential
    ///
    /// Buckets are created in the credential's project unless the location
    /// config names a `project`.
    pub fn new(credential: &GcpCredential, target: &BucketTarget) -> Result<Self, Error> {
        let source = GcpTokenSource::from_json(credential.raw_json())
            .map_err(|e| Error::credential("gcp", e.message))?;
        let http = http_client().map_err(|e| Error::internal_with_context("gcp", e.to_string()))?;
        let project = target
            .config
            .get("project")
            .filter(|p| !p.is_empty())
            .cloned()
            .unwrap_or_else(|| credential.project_id.clone());
        Ok(Self {
            token: CachedToken::new(Arc::new(source), http.clone()),
            http,
            project,
            base_url: STORAGE_API.to_string(),
        })
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/b/{}", self.base_url, urlencoding::encode(bucket))
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, TransportError> {
        let token = self.token.bearer().await?;
        check_response(request.bearer_auth(token).send().await?).await
    }
}

#[async_trait]
impl GcsApi for GcsTransport {
    async fn get_bucket(&self, bucket: &str) -> Result<(), TransportError> {
        let url = format!("{}?fields=name", self.bucket_url(bucket));
        self.execute(self.http.get(url)).await?;
        Ok(())
    }

    async fn insert_bucket(
        &self,
        bucket: &str,
        location: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), TransportError> {
        let url = format!(
            "{}/b?project={}",
            self.base_url,
            urlencoding::encode(&self.project)
        );
        let body = InsertBucket {
            name: bucket,
            location,
            labels,
        };
        self.execute(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        page_token: Option<String>,
    ) -> Result<ObjectPage, TransportError> {
        let mut url = format!(
            "{}/o?fields=items(name),nextPageToken",
            self.bucket_url(bucket)
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(&token)));
        }
        let list: ObjectList = self.execute(self.http.get(url)).await?.json().await?;
        Ok(ObjectPage {
            names: list.items.into_iter().map(|item| item.name).collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), TransportError> {
        let url = format!("{}/o/{}", self.bucket_url(bucket), urlencoding::encode(object));
        self.execute(self.http.delete(url)).await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), TransportError> {
        self.execute(self.http.delete(self.bucket_url(bucket))).await?;
        Ok(())
    }
}
