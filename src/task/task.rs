//! The task entity and its terminal-state invariant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::TaskDetail;

/// Remote task status as reported by the agent service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Pending,
    Completed,
    Errored,
}

impl TaskStatus {
    /// Completed and Errored are terminal: a task never leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Errored)
    }
}

/// Why a task stopped. Only meaningful alongside Completed or Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// The agent finished the task.
    Finish,
    /// The agent is waiting for user input.
    Ask,
}

/// A file produced by the agent as part of a task result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputAttachment {
    #[serde(alias = "file_name", alias = "fileName")]
    pub filename: String,
    #[serde(default, alias = "fileUrl", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Final output of a stopped task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskResult {
    pub message: Option<String>,
    pub attachments: Vec<OutputAttachment>,
}

/// Error from task creation or lookup.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task prompt must not be empty")]
    EmptyPrompt,
    #[error("failed to create task: {0}")]
    Creation(#[source] crate::client::RetryError),
    #[error("failed to fetch task {task_id}: {source}")]
    Fetch {
        task_id: String,
        #[source]
        source: crate::client::RetryError,
    },
    #[error(transparent)]
    Attachment(#[from] crate::files::FileError),
}

/// Locally tracked state of one remote task.
///
/// Once `status` reaches a terminal value the entity is frozen; later
/// observations are ignored by [`Task::apply_detail`].
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub title: Option<String>,
    pub task_url: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub stop_reason: Option<StopReason>,
    pub result: Option<TaskResult>,
}

impl Task {
    /// A freshly created task, not yet observed in any other state.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            title: None,
            task_url: None,
            status: TaskStatus::Running,
            created_at: Utc::now(),
            stop_reason: None,
            result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a service-reported detail into this entity.
    ///
    /// Returns false (and changes nothing) when the task is already
    /// terminal. The detail wins wholesale otherwise: both feeders carry
    /// the same service-issued truth.
    pub fn apply_detail(&mut self, detail: &TaskDetail) -> bool {
        if self.is_terminal() {
            return false;
        }
        if let Some(status) = detail.status {
            self.status = status;
        }
        if let Some(title) = &detail.task_title {
            self.title = Some(title.clone());
        }
        if let Some(url) = &detail.task_url {
            self.task_url = Some(url.clone());
        }
        if detail.stop_reason.is_some() {
            self.stop_reason = detail.stop_reason;
        }
        if detail.message.is_some() || !detail.attachments.is_empty() {
            self.result = Some(TaskResult {
                message: detail.message.clone(),
                attachments: detail.attachments.clone(),
            });
        }
        true
    }

    /// The assistant's final message text, if the task produced one.
    pub fn output_text(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.message.as_deref())
    }
}
