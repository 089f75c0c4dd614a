//! Webhook delivery dispatch.
//!
//! The HTTP-facing handler must acknowledge quickly no matter what, so
//! [`WebhookDispatcher::handle_delivery`] only validates the payload shape
//! and enqueues it; a single worker task drains the queue and feeds the
//! completion tracker.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::event::{WebhookEvent, WebhookEventType};
use crate::client::TaskDetail;
use crate::tracker::CompletionTracker;

/// Queued deliveries waiting for the worker; excess deliveries are dropped
/// with a warning rather than blocking the receiver.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Observer invoked once per fresh task-created event.
pub type TaskCreatedHook = Arc<dyn Fn(&TaskDetail) + Send + Sync>;

/// Internal outcome of accepting one delivery.
///
/// The HTTP response is a success either way; rejecting with an error
/// status would only make the sender redeliver a permanently malformed
/// payload forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Validated and queued for processing.
    Accepted,
    /// Discarded (malformed payload or queue overflow).
    Rejected,
}

/// Validates inbound webhook deliveries and routes them to the tracker.
pub struct WebhookDispatcher {
    tracker: Arc<CompletionTracker>,
    queue: mpsc::Sender<WebhookEvent>,
}

impl WebhookDispatcher {
    pub fn new(tracker: Arc<CompletionTracker>) -> Self {
        Self::with_created_hook_inner(tracker, None)
    }

    /// Build a dispatcher with an observer for task-created events.
    pub fn with_created_hook(tracker: Arc<CompletionTracker>, hook: TaskCreatedHook) -> Self {
        Self::with_created_hook_inner(tracker, Some(hook))
    }

    fn with_created_hook_inner(
        tracker: Arc<CompletionTracker>,
        hook: Option<TaskCreatedHook>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<WebhookEvent>(DEFAULT_QUEUE_CAPACITY);
        let worker_tracker = Arc::clone(&tracker);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatch(&worker_tracker, hook.as_ref(), event).await;
            }
            tracing::debug!("Webhook dispatch worker stopped");
        });
        Self { tracker, queue: tx }
    }

    /// Validate a raw delivery and queue it for processing.
    ///
    /// Cheap enough to run inline in the HTTP handler; all tracker work
    /// happens on the worker.
    pub fn handle_delivery(&self, raw: &[u8]) -> AckStatus {
        let event = match WebhookEvent::from_slice(raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!("Rejecting webhook delivery: {}", err);
                return AckStatus::Rejected;
            }
        };

        let (event_type, event_id) = (event.event_type, event.event_id.clone());
        match self.queue.try_send(event) {
            Ok(()) => {
                tracing::debug!("Queued {:?} event {}", event_type, event_id);
                AckStatus::Accepted
            }
            Err(err) => {
                tracing::warn!("Webhook queue full, dropping delivery: {}", err);
                AckStatus::Rejected
            }
        }
    }

    /// The tracker this dispatcher feeds.
    pub fn tracker(&self) -> &Arc<CompletionTracker> {
        &self.tracker
    }
}

async fn dispatch(
    tracker: &Arc<CompletionTracker>,
    hook: Option<&TaskCreatedHook>,
    event: WebhookEvent,
) {
    match event.event_type {
        WebhookEventType::TaskCreated => {
            // Bookkeeping only; never triggers resolution.
            let fresh = tracker
                .consume_event(event.task_id(), &event.event_id)
                .await;
            if !fresh {
                tracing::debug!(
                    "Duplicate task-created event {} for {}",
                    event.event_id,
                    event.task_id()
                );
                return;
            }
            if let Some(hook) = hook {
                hook(&event.task_detail);
            }
        }
        WebhookEventType::TaskStopped => {
            let outcome = tracker
                .observe_webhook(&event.event_id, &event.task_detail)
                .await;
            tracing::debug!(
                "Task-stopped event {} for {}: {:?}",
                event.event_id,
                event.task_id(),
                outcome
            );
        }
    }
}
