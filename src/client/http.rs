//! Reqwest transport for the agent-service API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::de::DeserializeOwned;

use super::error::ApiError;
use super::{
    AgentApi, CreateFileResponse, CreateTaskRequest, CreateTaskResponse, TaskDetail,
    WebhookRegistration,
};

/// Header carrying the API key, as the service expects it.
const API_KEY_HEADER: &str = "API_KEY";

/// HTTP implementation of [`AgentApi`].
///
/// Performs exactly one attempt per call and classifies failures into
/// [`ApiError`] kinds; retry policy belongs to the caller.
pub struct HttpAgentApi {
    client: Client,
    api_key: String,
    base_url: String,
}

impl HttpAgentApi {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Parse a Retry-After header if present (seconds form only).
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok().map(Duration::from_secs))
    }

    fn transport_error(err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::timeout(format!("request timeout: {}", err))
        } else if err.is_connect() {
            ApiError::network(format!("connection failed: {}", err))
        } else {
            ApiError::network(format!("request failed: {}", err))
        }
    }

    /// Check status and decode the JSON body of a response.
    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), &body, retry_after));
        }

        serde_json::from_str(&body).map_err(|e| {
            ApiError::parse(format!("failed to parse response: {}, body: {}", e, body))
        })
    }

    /// Check status of a response whose body we discard.
    async fn read_empty(response: reqwest::Response) -> Result<(), ApiError> {
        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), &body, retry_after));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentApi for HttpAgentApi {
    async fn create_file(&self, filename: &str) -> Result<CreateFileResponse, ApiError> {
        tracing::debug!("Creating file record for {}", filename);
        let response = self
            .client
            .post(self.url("/files"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&serde_json::json!({ "filename": filename }))
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::read_json(response).await
    }

    async fn upload_file_content(
        &self,
        upload_url: &str,
        content: Bytes,
    ) -> Result<(), ApiError> {
        // Presigned URL: no API key, raw bytes only.
        let response = self
            .client
            .put(upload_url)
            .header("Content-Type", "application/octet-stream")
            .body(content)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::read_empty(response).await
    }

    async fn create_task(
        &self,
        request: &CreateTaskRequest,
    ) -> Result<CreateTaskResponse, ApiError> {
        tracing::debug!("Creating task (profile {})", request.agent_profile);
        let response = self
            .client
            .post(self.url("/tasks"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::read_json(response).await
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskDetail, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/tasks/{}", task_id)))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::read_json(response).await
    }

    async fn register_webhook(&self, url: &str) -> Result<WebhookRegistration, ApiError> {
        tracing::debug!("Registering webhook endpoint {}", url);
        let response = self
            .client
            .post(self.url("/webhooks"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::read_json(response).await
    }

    async fn delete_webhook(&self, webhook_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/webhooks/{}", webhook_id)))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::read_empty(response).await
    }
}
