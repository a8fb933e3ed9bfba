//! Concurrent task registry: the single source of truth for task state.
//!
//! Tasks live in a sharded `DashMap`, so updates to different ids never
//! block each other. Each entry stores an `Arc<Task>`; readers get cheap
//! clones of a committed record and never see a half-applied update.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::events::{EventPublisher, TaskEventStream};
use crate::persist::StoreWriter;
use crate::task::{
    FailureKind, Task, TaskError, TaskId, TaskPhase, TaskState, TaskSummary,
};
use crate::telemetry::TaskgateMetrics;

// ============================================================================
// Task Registry
// ============================================================================

/// Internal task entry.
#[derive(Debug)]
struct TaskEntry {
    /// Latest committed record
    task: Arc<Task>,
    /// Notifier for waiters on this task
    notify: Arc<Notify>,
}

/// Result of loading records from a durable store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Records loaded into the registry
    pub restored: usize,
    /// Of those, records that were still running and are now failed
    pub interrupted: usize,
    /// Records skipped because the id was already present
    pub skipped: usize,
}

/// Concurrent `id → Task` map with atomic per-id updates.
pub struct TaskRegistry {
    tasks: DashMap<TaskId, TaskEntry>,
    config: RegistryConfig,
    /// Non-terminal task count, reserved atomically in `create`
    active_count: AtomicUsize,
    events: Arc<EventPublisher>,
    store: Option<StoreWriter>,
    metrics: Option<Arc<TaskgateMetrics>>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks_count", &self.tasks.len())
            .field("active_count", &self.active_count.load(Ordering::Acquire))
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .field("has_metrics", &self.metrics.is_some())
            .finish()
    }
}

impl TaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: RegistryConfig, events: Arc<EventPublisher>) -> Self {
        Self {
            tasks: DashMap::new(),
            config,
            active_count: AtomicUsize::new(0),
            events,
            store: None,
            metrics: None,
        }
    }

    /// Forwards every committed record to a durable store.
    #[must_use]
    pub fn with_store(mut self, writer: StoreWriter) -> Self {
        self.store = Some(writer);
        self
    }

    /// Keeps the active-task gauge and finish counters up to date.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<TaskgateMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventPublisher> {
        &self.events
    }

    /// Number of non-terminal tasks.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    /// Number of tasks, terminal ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn publish_active_gauge(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.set_tasks_active(self.active_count());
        }
    }

    /// Creates and inserts a new `pending` task.
    ///
    /// The capacity slot is reserved with a compare-exchange loop before
    /// insertion, so the limit holds under concurrent `create` calls.
    pub fn create(&self, operation: &str, params: Value) -> Result<Arc<Task>, TaskError> {
        let limit = self.config.max_active_tasks;
        loop {
            let current = self.active_count.load(Ordering::Acquire);
            if current >= limit {
                return Err(TaskError::CapacityExceeded { limit });
            }
            if self
                .active_count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        let mut task = Task::new(TaskId::new(), operation, params);
        task.version = 1;
        let task = Arc::new(task);

        self.tasks.insert(
            task.id.clone(),
            TaskEntry {
                task: task.clone(),
                notify: Arc::new(Notify::new()),
            },
        );
        if let Some(ref store) = self.store {
            store.put(&task);
        }
        self.publish_active_gauge();

        Ok(task)
    }

    /// Gets the committed record for `id`.
    pub fn get(&self, id: &TaskId) -> Result<Arc<Task>, TaskError> {
        self.tasks
            .get(id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| TaskError::NotFound { task_id: id.clone() })
    }

    /// Applies `mutate` to task `id` atomically.
    ///
    /// The mutator works on a private draft. Only when it returns `Ok` is the
    /// draft committed: version bumped, subscribers notified, waiters woken,
    /// and the record forwarded to the durable store, all before the
    /// per-id lock is released. An `Err` leaves the stored task untouched.
    pub fn update<F>(&self, id: &TaskId, mutate: F) -> Result<Arc<Task>, TaskError>
    where
        F: FnOnce(&mut Task) -> Result<(), TaskError>,
    {
        let mut entry = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound { task_id: id.clone() })?;

        let mut draft = Task::clone(&entry.task);
        mutate(&mut draft)?;

        let was_terminal = entry.task.is_terminal();
        draft.version = entry.task.version + 1;
        draft.updated_at = Utc::now();
        let task = Arc::new(draft);
        entry.task = task.clone();

        self.events.publish(&task);
        if let Some(ref store) = self.store {
            store.put(&task);
        }
        if !was_terminal && task.is_terminal() {
            self.active_count.fetch_sub(1, Ordering::AcqRel);
            if let Some(ref metrics) = self.metrics {
                metrics.record_task_finished(task.state().as_str());
            }
            self.publish_active_gauge();
        }
        entry.notify.notify_waiters();
        drop(entry);

        Ok(task)
    }

    /// Attaches an event subscriber to `id`.
    ///
    /// The state check and the attachment happen under the entry lock, so
    /// the subscriber sees every commit after this call and nothing before.
    /// A task that is already terminal has no future events: the returned
    /// stream is empty.
    pub fn subscribe(&self, id: &TaskId) -> Result<TaskEventStream, TaskError> {
        let entry = self
            .tasks
            .get(id)
            .ok_or_else(|| TaskError::NotFound { task_id: id.clone() })?;

        if entry.task.is_terminal() {
            return Ok(TaskEventStream::empty());
        }
        Ok(self.events.attach(id))
    }

    /// Lists tasks, newest first, optionally filtered by state.
    pub fn list(&self, state: Option<TaskState>, limit: usize) -> Vec<TaskSummary> {
        let mut tasks: Vec<Arc<Task>> = self
            .tasks
            .iter()
            .filter(|entry| state.is_none_or(|s| entry.task.state() == s))
            .map(|entry| entry.task.clone())
            .collect();

        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks.into_iter().take(limit).map(|t| t.summary()).collect()
    }

    /// Waits until `predicate` holds for task `id`.
    ///
    /// The `Notify::notified()` future is created before the state is
    /// checked, so a commit between the check and the wait is not missed.
    pub async fn wait_until<P>(
        &self,
        id: &TaskId,
        predicate: P,
        timeout: Duration,
    ) -> Result<Arc<Task>, TaskError>
    where
        P: Fn(&Task) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notify = {
                let entry = self
                    .tasks
                    .get(id)
                    .ok_or_else(|| TaskError::NotFound { task_id: id.clone() })?;
                entry.notify.clone()
            };

            let notified = notify.notified();

            let task = self.get(id)?;
            if predicate(&task) {
                return Ok(task);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(TaskError::WaitTimeout {
                    task_id: id.clone(),
                    waited: timeout,
                    state: task.state(),
                });
            }

            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                // One final check before giving up
                let task = self.get(id)?;
                if predicate(&task) {
                    return Ok(task);
                }
                return Err(TaskError::WaitTimeout {
                    task_id: id.clone(),
                    waited: timeout,
                    state: task.state(),
                });
            }
        }
    }

    /// Removes terminal tasks that have outlived the retention window.
    ///
    /// Returns the ids removed.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let retention =
            chrono::Duration::from_std(self.config.retention).unwrap_or(chrono::Duration::MAX);

        let candidates: Vec<TaskId> = self
            .tasks
            .iter()
            .filter_map(|entry| match entry.task.terminal_at {
                Some(terminal_at) if now - terminal_at > retention => Some(entry.task.id.clone()),
                _ => None,
            })
            .collect();

        let mut removed = Vec::with_capacity(candidates.len());
        for id in candidates {
            let evicted = self.tasks.remove_if(&id, |_, entry| {
                entry
                    .task
                    .terminal_at
                    .is_some_and(|terminal_at| now - terminal_at > retention)
            });
            if let Some((_, entry)) = evicted {
                // Wake waiters so they observe NotFound instead of sleeping out their timeout
                entry.notify.notify_waiters();
                self.events.close(&id);
                if let Some(ref store) = self.store {
                    store.delete(&id);
                }
                debug!(task_id = %id, "Evicted expired task");
                removed.push(id);
            }
        }

        removed
    }

    /// Marks every non-terminal task as failed.
    ///
    /// Returns the number of tasks failed.
    pub fn fail_active(&self, kind: FailureKind, reason: &str) -> usize {
        let active: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|entry| !entry.task.is_terminal())
            .map(|entry| entry.task.id.clone())
            .collect();

        let mut failed = 0;
        for id in active {
            match self.update(&id, |task| {
                task.transition(TaskPhase::failed(kind, reason), Some(reason.to_string()))
            }) {
                Ok(_) => failed += 1,
                // Finished concurrently
                Err(TaskError::AlreadyTerminal { .. } | TaskError::NotFound { .. }) => {}
                Err(e) => warn!(task_id = %id, error = %e, "Failed to fail active task"),
            }
        }

        if failed > 0 {
            info!(count = failed, kind = kind.as_str(), "Failed active tasks");
        }
        failed
    }

    /// Loads records from a durable store.
    ///
    /// Records that were not terminal lost their executor with the previous
    /// process. They are loaded as `failed` with kind `interrupted`.
    pub fn restore(&self, records: Vec<Task>) -> RestoreSummary {
        let mut summary = RestoreSummary::default();

        for mut task in records {
            if self.tasks.contains_key(&task.id) {
                summary.skipped += 1;
                continue;
            }

            if !task.is_terminal() {
                let reason = "Process restarted while the task was running";
                match task.transition(
                    TaskPhase::failed(FailureKind::Interrupted, reason),
                    Some(reason.to_string()),
                ) {
                    Ok(()) => {
                        task.version += 1;
                        task.updated_at = Utc::now();
                        summary.interrupted += 1;
                        if let Some(ref store) = self.store {
                            store.put(&task);
                        }
                    }
                    Err(e) => {
                        warn!(task_id = %task.id, error = %e, "Skipping unrecoverable task record");
                        summary.skipped += 1;
                        continue;
                    }
                }
            }

            self.tasks.insert(
                task.id.clone(),
                TaskEntry {
                    task: Arc::new(task),
                    notify: Arc::new(Notify::new()),
                },
            );
            summary.restored += 1;
        }

        summary
    }
}
