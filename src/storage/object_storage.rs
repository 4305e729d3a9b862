//! Yandex Object Storage blob backend
//!
//! Path-style HTTPS access (`{endpoint}/{bucket}/{key}`). Requests carry the
//! IAM token handed to the function by the platform in
//! `X-YaCloud-SubjectToken`; obtaining that token is the platform's job.

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use tracing::debug;

use crate::storage::{BlobStore, StorageError, StorageResult};

const SERVICE: &str = "object-storage";
const TOKEN_HEADER: &str = "X-YaCloud-SubjectToken";

/// Default public endpoint of Yandex Object Storage.
pub const DEFAULT_ENDPOINT: &str = "https://storage.yandexcloud.net";

#[derive(Clone)]
pub struct ObjectStorageBlobStore {
    client: Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl ObjectStorageBlobStore {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            token,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }
}

/// Turns a non-success response into a `StorageError::Status`.
async fn status_error(response: Response) -> StorageError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StorageError::Status {
        service: SERVICE,
        status,
        code: extract_xml_tag(&body, "Code").unwrap_or_else(|| "Unknown".to_string()),
        message: extract_xml_tag(&body, "Message").unwrap_or(body),
    }
}

/// Pulls `<Tag>value</Tag>` out of an S3-style XML error document.
fn extract_xml_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].to_string())
}

#[async_trait]
impl BlobStore for ObjectStorageBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let response = self
            .authorize(self.client.get(self.object_url(key)))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(key, "object not found");
                Ok(None)
            }
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            _ => Err(status_error(response).await),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let response = self
            .authorize(self.client.put(self.object_url(key)))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(value)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let response = self
            .authorize(self.client.delete(self.object_url(key)))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    fn name(&self) -> &'static str {
        SERVICE
    }
}
