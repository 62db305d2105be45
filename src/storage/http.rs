use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::StorageConfig;
use crate::error::{AppError, Result};
use crate::tracker::mime_type_for;

use super::{object_key, ObjectStorage, StorageError, StorageResult, StoredObject};

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key")]
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for a bucket-style storage REST API.
///
/// Objects are written to `{endpoint}/object/{bucket}/{key}` and served from
/// `{endpoint}/object/public/{bucket}/{key}`.
pub struct HttpObjectStorage {
    client: Client,
    endpoint: String,
    bucket: String,
    api_key: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("blog-images/1.0")
            .build()
            .map_err(AppError::Http)?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.trim_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/object/{}/{}", self.endpoint, self.bucket, key)
    }

    fn public_prefix(&self) -> String {
        format!("{}/object/public/{}/", self.endpoint, self.bucket)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn api_error(response: reqwest::Response) -> StorageError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .ok()
            .and_then(|body| body.message.or(body.error))
            .unwrap_or(text);
        StorageError::Api { status, message }
    }
}

#[async_trait::async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload(&self, bytes: Vec<u8>, name: &str, folder: &str) -> StorageResult<StoredObject> {
        let key = object_key(folder, name, chrono::Utc::now().timestamp_millis());
        let size = bytes.len() as i64;
        let content_type = mime_type_for(name).unwrap_or("application/octet-stream");

        let response = self
            .authorize(self.client.post(self.object_url(&key)))
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let uploaded: UploadResponse = response.json().await?;
        // The API echoes "{bucket}/{key}"; the key we sent is authoritative.
        if let Some(echoed) = uploaded.key {
            tracing::debug!("Uploaded {} as {}", name, echoed);
        }

        Ok(StoredObject {
            url: self.public_url(&key),
            id: key,
            size,
        })
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        let response = self
            .authorize(self.client.delete(self.object_url(id)))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(id.to_string())),
            _ => Err(Self::api_error(response).await),
        }
    }

    fn public_url(&self, id: &str) -> String {
        format!("{}{}", self.public_prefix(), id)
    }

    fn object_id_for_url(&self, url: &str) -> Option<String> {
        let prefix = self.public_prefix();
        let rest = url.strip_prefix(prefix.as_str())?;
        let key = rest.split(['?', '#']).next().unwrap_or(rest);
        if key.is_empty() {
            return None;
        }
        urlencoding::decode(key)
            .map(|decoded| decoded.into_owned())
            .ok()
    }
}
