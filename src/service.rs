//! High-level task operations against the agent service.
//!
//! Composes the transport, retry policy, file manager and completion
//! tracker into the surface callers actually use: creating tasks with
//! attachments and waiting for (or being called back on) completion.

use std::sync::Arc;
use std::time::Duration;

use crate::client::{
    AgentApi, CreateTaskRequest, CreateTaskResponse, Retrier, RetryError, TaskDetail,
    WebhookRegistration,
};
use crate::config::Config;
use crate::files::{AttachmentSource, FileManager};
use crate::task::{Task, TaskError, TaskHandle};
use crate::tracker::{CompletionTracker, TaskResolution, TrackerError};

/// Per-task creation options.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Agent profile override; the configured default applies otherwise.
    pub agent_profile: Option<String>,
    pub task_mode: Option<String>,
    /// Connector ids to enable for the task.
    pub connectors: Vec<String>,
}

/// Client facade for creating and tracking remote tasks.
pub struct TaskService {
    api: Arc<dyn AgentApi>,
    retrier: Retrier,
    files: FileManager,
    tracker: Arc<CompletionTracker>,
    config: Config,
}

impl TaskService {
    pub fn new(api: Arc<dyn AgentApi>, tracker: Arc<CompletionTracker>, config: Config) -> Self {
        Self {
            files: FileManager::new(Arc::clone(&api), &config),
            retrier: Retrier::new(config.retry.clone()),
            api,
            tracker,
            config,
        }
    }

    /// Create a task and register it for completion tracking.
    ///
    /// Attachments are resolved (and local content uploaded) first; they
    /// are not rolled back when creation fails, since the service expires
    /// unused uploads on its own.
    pub async fn create_task(
        &self,
        prompt: &str,
        attachments: &[AttachmentSource],
        options: TaskOptions,
    ) -> Result<TaskHandle, TaskError> {
        if prompt.trim().is_empty() {
            return Err(TaskError::EmptyPrompt);
        }
        let attachments = self.files.resolve_all(attachments)?;

        let request = CreateTaskRequest {
            prompt: prompt.to_string(),
            agent_profile: options
                .agent_profile
                .unwrap_or_else(|| self.config.agent_profile.clone()),
            task_mode: options.task_mode,
            task_id: None,
            attachments,
            connectors: options.connectors,
        };
        let response = self
            .retrier
            .execute("create task", || self.api.create_task(&request))
            .await
            .map_err(TaskError::Creation)?;

        tracing::info!(
            "Created task {}{}",
            response.task_id,
            response
                .task_url
                .as_deref()
                .map(|u| format!(" ({})", u))
                .unwrap_or_default()
        );

        let mut task = Task::new(response.task_id.clone());
        task.title = response.task_title.clone();
        task.task_url = response.task_url.clone();
        let handle = TaskHandle::new(task);
        self.tracker.register(&handle).await;
        Ok(handle)
    }

    /// Continue an existing task's conversation with a follow-up prompt.
    pub async fn send_followup(
        &self,
        task_id: &str,
        prompt: &str,
        attachments: &[AttachmentSource],
    ) -> Result<CreateTaskResponse, TaskError> {
        if prompt.trim().is_empty() {
            return Err(TaskError::EmptyPrompt);
        }
        let attachments = self.files.resolve_all(attachments)?;

        let request = CreateTaskRequest {
            prompt: prompt.to_string(),
            agent_profile: self.config.agent_profile.clone(),
            task_mode: None,
            task_id: Some(task_id.to_string()),
            attachments,
            connectors: Vec::new(),
        };
        self.retrier
            .execute("continue task", || self.api.create_task(&request))
            .await
            .map_err(TaskError::Creation)
    }

    /// Fetch the task's current state, feeding the observation into the
    /// completion tracker.
    pub async fn get_task(&self, task_id: &str) -> Result<TaskDetail, TaskError> {
        let detail = self
            .retrier
            .execute("get task", || self.api.get_task(task_id))
            .await
            .map_err(|source| TaskError::Fetch {
                task_id: task_id.to_string(),
                source,
            })?;
        self.tracker.observe_poll(&detail).await;
        Ok(detail)
    }

    /// Wait for a task to resolve, polling the service until the deadline.
    ///
    /// Completion through the webhook path also ends the wait; the two
    /// detection strategies are interchangeable here.
    pub async fn wait(
        &self,
        task_id: &str,
        max_wait: Option<Duration>,
    ) -> Result<Arc<TaskResolution>, TrackerError> {
        self.tracker
            .wait_with_polling(
                &self.api,
                &self.retrier,
                task_id,
                self.config.poll_interval,
                max_wait.unwrap_or(self.config.max_wait),
            )
            .await
    }

    /// Register a webhook delivery endpoint with the service.
    pub async fn register_webhook(&self, url: &str) -> Result<WebhookRegistration, RetryError> {
        self.retrier
            .execute("register webhook", || self.api.register_webhook(url))
            .await
    }

    /// Remove a previously registered webhook endpoint.
    pub async fn unregister_webhook(&self, webhook_id: &str) -> Result<(), RetryError> {
        self.retrier
            .execute("delete webhook", || self.api.delete_webhook(webhook_id))
            .await
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    pub fn tracker(&self) -> &Arc<CompletionTracker> {
        &self.tracker
    }
}
