//! Inbound webhook event wire format.

use serde::{Deserialize, Serialize};

use crate::client::TaskDetail;

/// Kind of an inbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    TaskCreated,
    TaskStopped,
}

/// One webhook delivery from the agent service.
///
/// Delivery is at-least-once: the same logical event may arrive several
/// times, with the same `event_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,
    pub event_type: WebhookEventType,
    pub task_detail: TaskDetail,
}

/// Error from delivery validation.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
}

impl WebhookEvent {
    /// Parse and validate a raw delivery body.
    ///
    /// A valid delivery carries an event id, a known event type, and a
    /// task id.
    pub fn from_slice(raw: &[u8]) -> Result<Self, WebhookError> {
        let event: WebhookEvent = serde_json::from_slice(raw)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        if event.event_id.is_empty() {
            return Err(WebhookError::InvalidPayload("empty event_id".to_string()));
        }
        if event.task_detail.task_id.is_empty() {
            return Err(WebhookError::InvalidPayload("empty task_id".to_string()));
        }
        Ok(event)
    }

    pub fn task_id(&self) -> &str {
        &self.task_detail.task_id
    }
}
