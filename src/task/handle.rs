//! Caller-facing handle for one tracked remote task.

use std::sync::Arc;
use tokio::sync::RwLock;

use super::task::{Task, TaskStatus};

/// Shared task state, mutated only through the completion tracker.
pub type SharedTask = Arc<RwLock<Task>>;

/// A handle to a remote task owned by the caller.
///
/// The handle reads the locally tracked entity; writes go through
/// [`crate::tracker::CompletionTracker`] resolution exclusively, so two
/// handles to the same task always agree.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    task_id: String,
    task_url: Option<String>,
    shared: SharedTask,
}

impl TaskHandle {
    pub fn new(task: Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            task_url: task.task_url.clone(),
            shared: Arc::new(RwLock::new(task)),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Web UI link for the task, when the service reported one at creation.
    pub fn task_url(&self) -> Option<&str> {
        self.task_url.as_deref()
    }

    pub async fn status(&self) -> TaskStatus {
        self.shared.read().await.status
    }

    pub async fn is_terminal(&self) -> bool {
        self.shared.read().await.is_terminal()
    }

    /// A point-in-time copy of the tracked entity.
    pub async fn snapshot(&self) -> Task {
        self.shared.read().await.clone()
    }

    /// The shared entity, for the tracker to merge resolutions into.
    pub(crate) fn shared(&self) -> SharedTask {
        Arc::clone(&self.shared)
    }
}
