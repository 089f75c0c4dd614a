//! Completion tracking - reconciling poll and webhook observations into a
//! single terminal resolution per task.
//!
//! Two independent feeders report observations: the polling loop and the
//! webhook dispatcher. Both may see the same terminal state, in any order,
//! any number of times. The tracker collapses them into exactly one
//! resolution per task: the first terminal observation wins, everything
//! after it is a logged no-op. Duplicate webhook deliveries are absorbed
//! by per-task event-id bookkeeping, and events for tasks this process has
//! never seen are cached for a bounded time in case the task is registered
//! later (for example after a restart).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{oneshot, Mutex};
use tokio::time::MissedTickBehavior;

use crate::client::{AgentApi, Retrier, TaskDetail};
use crate::task::{SharedTask, StopReason, TaskHandle, TaskStatus};

/// Cap on cached deliveries for unregistered tasks.
const MAX_PENDING_DELIVERIES: usize = 1024;

/// Which feeder produced a terminal observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationSource {
    Poll,
    Webhook,
}

/// The terminal detail delivered to callers, exactly once per task.
#[derive(Debug, Clone)]
pub struct TaskResolution {
    pub task_id: String,
    pub status: TaskStatus,
    pub stop_reason: Option<StopReason>,
    pub message: Option<String>,
    pub attachments: Vec<crate::task::OutputAttachment>,
    /// The feeder whose observation won.
    pub source: ObservationSource,
}

impl TaskResolution {
    fn from_detail(detail: &TaskDetail, source: ObservationSource) -> Self {
        let status = detail.status.unwrap_or(match detail.stop_reason {
            Some(StopReason::Ask) => TaskStatus::Pending,
            _ => TaskStatus::Completed,
        });
        Self {
            task_id: detail.task_id.clone(),
            status,
            stop_reason: detail.stop_reason,
            message: detail.message.clone(),
            attachments: detail.attachments.clone(),
            source,
        }
    }

    /// The resolution as a detail payload, for merging into a task entity
    /// that was registered after the resolution arrived.
    fn as_detail(&self) -> TaskDetail {
        TaskDetail {
            task_id: self.task_id.clone(),
            status: Some(self.status),
            task_title: None,
            task_url: None,
            message: self.message.clone(),
            attachments: self.attachments.clone(),
            stop_reason: self.stop_reason,
        }
    }
}

/// Outcome of feeding one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// This observation resolved the task.
    Resolved,
    /// The task was already resolved; the observation was discarded.
    AlreadyResolved,
    /// The observation was not terminal.
    NotTerminal,
    /// The event id had already been consumed for this task.
    DuplicateEvent,
    /// No record exists for this task id; cached or discarded.
    Unknown,
}

/// Error surfaced to waiting callers. Protocol races are never errors.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("task {task_id} did not complete within {waited:?}")]
    CompletionTimeout { task_id: String, waited: Duration },
    #[error("task {0} is not tracked")]
    UnknownTask(String),
}

/// Callback invoked with the resolution, at most once per registration.
pub type ResolvedCallback = Box<dyn FnOnce(&TaskResolution) + Send>;

/// Tracker tuning knobs.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// How long deliveries for unregistered tasks are kept.
    pub pending_delivery_ttl: Duration,
    /// How long resolved records linger to absorb duplicate deliveries.
    pub resolved_retention: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            pending_delivery_ttl: Duration::from_secs(60 * 60),
            resolved_retention: Duration::from_secs(15 * 60),
        }
    }
}

enum RecordState {
    Pending,
    Resolved {
        resolution: Arc<TaskResolution>,
        resolved_at: DateTime<Utc>,
    },
}

/// Per-task tracking state. One per registered task id.
struct CompletionRecord {
    state: RecordState,
    seen_events: HashSet<String>,
    callbacks: Vec<ResolvedCallback>,
    waiters: Vec<oneshot::Sender<Arc<TaskResolution>>>,
    task: Option<SharedTask>,
}

impl CompletionRecord {
    fn new(task: Option<SharedTask>) -> Self {
        Self {
            state: RecordState::Pending,
            seen_events: HashSet::new(),
            callbacks: Vec::new(),
            waiters: Vec::new(),
            task,
        }
    }
}

/// A delivery addressed to a task id this process has not registered.
struct PendingDelivery {
    detail: Option<TaskDetail>,
    event_ids: HashSet<String>,
    cached_at: DateTime<Utc>,
}

#[derive(Default)]
struct TrackerState {
    records: HashMap<String, CompletionRecord>,
    pending: HashMap<String, PendingDelivery>,
}

/// Work to perform after the state lock is released.
struct ResolveActions {
    resolution: Arc<TaskResolution>,
    callbacks: Vec<ResolvedCallback>,
    waiters: Vec<oneshot::Sender<Arc<TaskResolution>>>,
}

impl ResolveActions {
    fn fire(self) {
        for waiter in self.waiters {
            let _ = waiter.send(Arc::clone(&self.resolution));
        }
        for callback in self.callbacks {
            callback(&self.resolution);
        }
    }
}

/// Reconciles polling and webhook completion signals.
///
/// Explicitly constructed, process-scoped state; resolution for a given
/// task id is serialized by the state lock.
pub struct CompletionTracker {
    state: Mutex<TrackerState>,
    config: TrackerConfig,
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl CompletionTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            config,
        }
    }

    /// Register a task handle for completion tracking.
    ///
    /// If a delivery for this task id was cached before registration (and
    /// is still within its TTL), the task resolves immediately.
    pub async fn register(&self, handle: &TaskHandle) {
        let actions = {
            let mut state = self.state.lock().await;
            self.prune_locked(&mut state, Utc::now());
            self.admit_locked(&mut state, handle.task_id(), Some(handle.shared()))
                .await
        };
        if let Some(actions) = actions {
            tracing::info!(
                "Task {} resolved from a delivery cached before registration",
                handle.task_id()
            );
            actions.fire();
        }
    }

    /// Register interest in a task id and a callback for its resolution.
    ///
    /// Creates the tracking record if the task id is not yet known, so a
    /// process can resume tracking tasks created in an earlier lifetime.
    /// The callback fires immediately when the task is already resolved.
    pub async fn track_completion(
        &self,
        task_id: &str,
        on_resolved: impl FnOnce(&TaskResolution) + Send + 'static,
    ) {
        let (actions, fire_now) = {
            let mut state = self.state.lock().await;
            let actions = self.admit_locked(&mut state, task_id, None).await;
            let record = state
                .records
                .get_mut(task_id)
                .expect("record exists after admit");
            match &record.state {
                RecordState::Resolved { resolution, .. } => {
                    (actions, Some(Arc::clone(resolution)))
                }
                RecordState::Pending => {
                    record.callbacks.push(Box::new(on_resolved));
                    return;
                }
            }
        };
        if let Some(actions) = actions {
            actions.fire();
        }
        if let Some(resolution) = fire_now {
            on_resolved(&resolution);
        }
    }

    /// Subscribe to a task's resolution as a one-shot channel.
    ///
    /// Dropping the receiver abandons the wait without affecting tracking.
    pub async fn subscribe(
        &self,
        task_id: &str,
    ) -> Result<oneshot::Receiver<Arc<TaskResolution>>, TrackerError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .get_mut(task_id)
            .ok_or_else(|| TrackerError::UnknownTask(task_id.to_string()))?;
        let (tx, rx) = oneshot::channel();
        match &record.state {
            RecordState::Resolved { resolution, .. } => {
                let _ = tx.send(Arc::clone(resolution));
            }
            RecordState::Pending => record.waiters.push(tx),
        }
        Ok(rx)
    }

    /// Feed one poll response into the tracker.
    pub async fn observe_poll(&self, detail: &TaskDetail) -> ObserveOutcome {
        let actions;
        {
            let mut state = self.state.lock().await;
            let Some(record) = state.records.get_mut(&detail.task_id) else {
                tracing::warn!(
                    "Discarding poll observation for unknown task {}",
                    detail.task_id
                );
                return ObserveOutcome::Unknown;
            };

            // Progress details (title, url, status) are merged even before
            // a terminal state; the entity freezes itself once terminal.
            if let Some(task) = &record.task {
                task.write().await.apply_detail(detail);
            }

            if !poll_is_terminal(detail) {
                return ObserveOutcome::NotTerminal;
            }
            match Self::resolve_locked(record, detail, ObservationSource::Poll) {
                Some(a) => actions = a,
                None => {
                    tracing::debug!(
                        "Ignoring late poll observation for resolved task {}",
                        detail.task_id
                    );
                    return ObserveOutcome::AlreadyResolved;
                }
            }
        }
        actions.fire();
        ObserveOutcome::Resolved
    }

    /// Feed one validated task-stopped delivery into the tracker.
    ///
    /// A stopped event is terminal by definition. The event id is consumed
    /// first: a redelivery is discarded whether or not the task has
    /// resolved in the meantime.
    pub async fn observe_webhook(&self, event_id: &str, detail: &TaskDetail) -> ObserveOutcome {
        // Stopped payloads may omit an explicit status; infer it so the
        // entity and the resolution agree.
        let detail = &webhook_terminal_detail(detail);
        let actions;
        {
            let mut state = self.state.lock().await;
            match state.records.get_mut(&detail.task_id) {
                Some(record) => {
                    if !record.seen_events.insert(event_id.to_string()) {
                        tracing::debug!(
                            "Discarding duplicate event {} for task {}",
                            event_id,
                            detail.task_id
                        );
                        return ObserveOutcome::DuplicateEvent;
                    }
                    if let Some(task) = &record.task {
                        task.write().await.apply_detail(detail);
                    }
                    match Self::resolve_locked(record, detail, ObservationSource::Webhook) {
                        Some(a) => actions = a,
                        None => {
                            tracing::debug!(
                                "Ignoring event {} for resolved task {}",
                                event_id,
                                detail.task_id
                            );
                            return ObserveOutcome::AlreadyResolved;
                        }
                    }
                }
                None => {
                    return self.cache_pending_locked(
                        &mut state,
                        &detail.task_id,
                        event_id,
                        Some(detail),
                    );
                }
            }
        }
        actions.fire();
        ObserveOutcome::Resolved
    }

    /// Consume an event id for a task without attempting resolution.
    ///
    /// Used for deliveries that carry no terminal state (task-created
    /// events). Returns false when the id was already consumed.
    pub async fn consume_event(&self, task_id: &str, event_id: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.records.get_mut(task_id) {
            Some(record) => record.seen_events.insert(event_id.to_string()),
            None => {
                self.cache_pending_locked(&mut state, task_id, event_id, None)
                    != ObserveOutcome::DuplicateEvent
            }
        }
    }

    /// Wait for resolution, actively polling the service in the meantime.
    ///
    /// The webhook path stays live while this runs; whichever feeder
    /// observes the terminal state first wins. On deadline the wait fails
    /// with [`TrackerError::CompletionTimeout`] but the record stays
    /// registered, so a late delivery still resolves the task.
    pub async fn wait_with_polling(
        &self,
        api: &Arc<dyn AgentApi>,
        retrier: &Retrier,
        task_id: &str,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Result<Arc<TaskResolution>, TrackerError> {
        let mut rx = self.subscribe(task_id).await?;

        let wait = async {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    resolved = &mut rx => return resolved.ok(),
                    _ = ticker.tick() => {
                        match retrier
                            .execute("poll task", || api.get_task(task_id))
                            .await
                        {
                            Ok(detail) => {
                                self.observe_poll(&detail).await;
                            }
                            Err(err) => {
                                tracing::warn!("Poll for task {} failed: {}", task_id, err);
                            }
                        }
                    }
                }
            }
        };

        match tokio::time::timeout(max_wait, wait).await {
            Ok(Some(resolution)) => Ok(resolution),
            Ok(None) => Err(TrackerError::UnknownTask(task_id.to_string())),
            Err(_) => Err(TrackerError::CompletionTimeout {
                task_id: task_id.to_string(),
                waited: max_wait,
            }),
        }
    }

    /// Drop resolved records past their retention window and cached
    /// deliveries past their TTL.
    pub async fn prune(&self) {
        let mut state = self.state.lock().await;
        self.prune_locked(&mut state, Utc::now());
    }

    /// Number of tracked (unresolved and recently resolved) tasks.
    pub async fn tracked_count(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Create the record for a task id if needed, consuming any cached
    /// delivery. Returns resolution actions when the cached delivery
    /// resolves the task on the spot.
    async fn admit_locked(
        &self,
        state: &mut TrackerState,
        task_id: &str,
        task: Option<SharedTask>,
    ) -> Option<ResolveActions> {
        if let Some(record) = state.records.get_mut(task_id) {
            if record.task.is_none() {
                if let Some(task) = task {
                    // Late handle registration: bring the entity up to date
                    // when the task resolved before the handle existed.
                    if let RecordState::Resolved { resolution, .. } = &record.state {
                        task.write().await.apply_detail(&resolution.as_detail());
                    }
                    record.task = Some(task);
                }
            }
            return None;
        }

        let mut record = CompletionRecord::new(task);
        let pending = state.pending.remove(task_id);
        let mut actions = None;

        if let Some(pending) = pending {
            record.seen_events = pending.event_ids;
            let fresh = Utc::now() - pending.cached_at
                < ChronoDuration::from_std(self.config.pending_delivery_ttl)
                    .unwrap_or_else(|_| ChronoDuration::hours(1));
            if let (true, Some(detail)) = (fresh, pending.detail) {
                if let Some(task) = &record.task {
                    task.write().await.apply_detail(&detail);
                }
                actions = Self::resolve_locked(&mut record, &detail, ObservationSource::Webhook);
            }
        }

        state.records.insert(task_id.to_string(), record);
        actions
    }

    /// Transition a record to Resolved. Returns None when it already was.
    fn resolve_locked(
        record: &mut CompletionRecord,
        detail: &TaskDetail,
        source: ObservationSource,
    ) -> Option<ResolveActions> {
        if matches!(record.state, RecordState::Resolved { .. }) {
            return None;
        }
        let resolution = Arc::new(TaskResolution::from_detail(detail, source));
        record.state = RecordState::Resolved {
            resolution: Arc::clone(&resolution),
            resolved_at: Utc::now(),
        };
        Some(ResolveActions {
            resolution,
            callbacks: std::mem::take(&mut record.callbacks),
            waiters: std::mem::take(&mut record.waiters),
        })
    }

    /// Cache a delivery for an unregistered task, deduplicating by event id.
    fn cache_pending_locked(
        &self,
        state: &mut TrackerState,
        task_id: &str,
        event_id: &str,
        detail: Option<&TaskDetail>,
    ) -> ObserveOutcome {
        if let Some(entry) = state.pending.get_mut(task_id) {
            if !entry.event_ids.insert(event_id.to_string()) {
                return ObserveOutcome::DuplicateEvent;
            }
            if entry.detail.is_none() {
                entry.detail = detail.cloned();
            }
            return ObserveOutcome::Unknown;
        }

        if state.pending.len() >= MAX_PENDING_DELIVERIES {
            if let Some(oldest) = state
                .pending
                .iter()
                .min_by_key(|(_, p)| p.cached_at)
                .map(|(id, _)| id.clone())
            {
                tracing::warn!("Pending delivery cache full, evicting task {}", oldest);
                state.pending.remove(&oldest);
            }
        }

        tracing::info!(
            "Caching delivery for unregistered task {} (event {})",
            task_id,
            event_id
        );
        state.pending.insert(
            task_id.to_string(),
            PendingDelivery {
                detail: detail.cloned(),
                event_ids: HashSet::from([event_id.to_string()]),
                cached_at: Utc::now(),
            },
        );
        ObserveOutcome::Unknown
    }

    fn prune_locked(&self, state: &mut TrackerState, now: DateTime<Utc>) {
        let retention = ChronoDuration::from_std(self.config.resolved_retention)
            .unwrap_or_else(|_| ChronoDuration::minutes(15));
        state.records.retain(|_, record| match &record.state {
            RecordState::Resolved { resolved_at, .. } => now - *resolved_at < retention,
            RecordState::Pending => true,
        });

        let ttl = ChronoDuration::from_std(self.config.pending_delivery_ttl)
            .unwrap_or_else(|_| ChronoDuration::hours(1));
        state
            .pending
            .retain(|_, delivery| now - delivery.cached_at < ttl);
    }
}

/// A stopped-event detail with the terminal status made explicit.
fn webhook_terminal_detail(detail: &TaskDetail) -> TaskDetail {
    let mut detail = detail.clone();
    if detail.status.is_none() {
        detail.status = Some(match detail.stop_reason {
            Some(StopReason::Ask) => TaskStatus::Pending,
            _ => TaskStatus::Completed,
        });
    }
    detail
}

/// Whether a polled status is terminal from the tracker's perspective.
///
/// Pending with stop_reason ask counts: the task will not progress without
/// external action.
fn poll_is_terminal(detail: &TaskDetail) -> bool {
    match detail.status {
        Some(TaskStatus::Completed) | Some(TaskStatus::Errored) => true,
        Some(TaskStatus::Pending) => matches!(detail.stop_reason, Some(StopReason::Ask)),
        Some(TaskStatus::Running) | None => false,
    }
}
