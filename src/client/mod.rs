//! Remote agent-service API client.
//!
//! This module provides a trait-based abstraction over the fixed remote
//! task/file/webhook protocol, with a reqwest implementation as the
//! primary transport. Everything above it (file uploads, task creation,
//! completion polling) talks to the trait, so tests substitute a fake.

mod error;
mod http;
mod retry;

#[cfg(test)]
pub(crate) mod mock;

pub use error::{classify_http_status, ApiError, ApiErrorKind};
pub use http::HttpAgentApi;
pub use retry::{Retrier, RetryConfig, RetryError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{OutputAttachment, StopReason, TaskStatus};

/// Response to a file-record creation request.
///
/// The presigned `upload_url` is single-use and only valid until
/// `upload_expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileResponse {
    pub id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub upload_url: String,
    pub upload_expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// One attachment in the wire format consumed by task creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachmentSpec {
    /// A file previously uploaded through the files endpoint.
    FileId {
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    /// A publicly reachable URL the service fetches itself.
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    /// Inline base64-encoded content.
    Data {
        file_data: String,
        filename: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// Payload for task creation.
///
/// Carrying an existing `task_id` continues that task's conversation
/// instead of starting a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub prompt: String,
    #[serde(rename = "agentProfile")]
    pub agent_profile: String,
    #[serde(
        rename = "taskMode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub task_mode: Option<String>,
    #[serde(rename = "taskId", default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connectors: Vec<String>,
}

/// Response to task creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,
}

/// Task state as reported by the service, via polling or webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDetail {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<OutputAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

/// A registered webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub webhook_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The four remote calls this system consumes, plus webhook registration.
///
/// Implementations perform exactly one attempt per call; retry policy
/// lives in [`Retrier`], above the transport.
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// `POST /v1/files` - create a file record and obtain a presigned
    /// upload URL.
    async fn create_file(&self, filename: &str) -> Result<CreateFileResponse, ApiError>;

    /// `PUT <upload_url>` - upload raw content to a presigned URL.
    async fn upload_file_content(&self, upload_url: &str, content: Bytes)
        -> Result<(), ApiError>;

    /// `POST /v1/tasks` - create a task (or continue one).
    async fn create_task(
        &self,
        request: &CreateTaskRequest,
    ) -> Result<CreateTaskResponse, ApiError>;

    /// `GET /v1/tasks/{task_id}` - fetch current task state.
    async fn get_task(&self, task_id: &str) -> Result<TaskDetail, ApiError>;

    /// `POST /v1/webhooks` - register a delivery endpoint.
    async fn register_webhook(&self, url: &str) -> Result<WebhookRegistration, ApiError>;

    /// `DELETE /v1/webhooks/{webhook_id}` - remove a delivery endpoint.
    async fn delete_webhook(&self, webhook_id: &str) -> Result<(), ApiError>;
}
