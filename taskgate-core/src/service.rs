//! Task service: the facade behind every client-facing operation.
//!
//! Owns the registry, broker, coordinator, reporter, and executor, plus the
//! join handles of running executors. Hosts call into this type only.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{DeliveryError, InputBroker};
use crate::cancel::{CancelOutcome, CancellationCoordinator};
use crate::config::{Config, ExecutorConfig};
use crate::events::{EventPublisher, TaskEventStream};
use crate::executor::{Executor, OperationCatalog};
use crate::persist::{DurableStore, StoreError, StoreWriter, open_store};
use crate::registry::{RestoreSummary, TaskRegistry};
use crate::reporter::{StatusReporter, WaitCondition};
use crate::task::{
    FailureKind, TaskError, TaskId, TaskPhase, TaskSnapshot, TaskState, TaskSummary,
};
use crate::telemetry::TaskgateMetrics;

/// Counts reported by the admin health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub active_tasks: usize,
    pub total_tasks: usize,
    pub running_executors: usize,
}

/// Entry point for starting, observing, and controlling tasks.
pub struct TaskService {
    executor_config: ExecutorConfig,
    catalog: OperationCatalog,
    registry: Arc<TaskRegistry>,
    broker: Arc<InputBroker>,
    coordinator: Arc<CancellationCoordinator>,
    reporter: StatusReporter,
    executor: Executor,
    executors: DashMap<TaskId, JoinHandle<()>>,
    store: Option<StoreWriter>,
    shutdown: CancellationToken,
    metrics: Option<Arc<TaskgateMetrics>>,
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService")
            .field("registry", &self.registry)
            .field("catalog", &self.catalog)
            .field("executors", &self.executors.len())
            .field("shutting_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl TaskService {
    /// Creates a service without a durable store.
    #[must_use]
    pub fn new(
        config: &Config,
        catalog: OperationCatalog,
        metrics: Option<Arc<TaskgateMetrics>>,
    ) -> Arc<Self> {
        Arc::new(Self::build(config, catalog, metrics, None))
    }

    /// Creates a service backed by `store`.
    ///
    /// Expired records are purged first; the rest are restored, with tasks
    /// that were running when the previous process stopped marked failed.
    pub async fn with_store(
        config: &Config,
        catalog: OperationCatalog,
        metrics: Option<Arc<TaskgateMetrics>>,
        store: Arc<dyn DurableStore>,
    ) -> Result<(Arc<Self>, RestoreSummary), StoreError> {
        let purged = store
            .purge_expired(config.registry.retention, Utc::now())
            .await?;
        let records = store.load_all().await?;

        let (writer, _writer_task) = StoreWriter::spawn(store);
        let service = Self::build(config, catalog, metrics, Some(writer));
        let summary = service.registry.restore(records);

        info!(
            purged,
            restored = summary.restored,
            interrupted = summary.interrupted,
            "Restored tasks from durable store"
        );
        Ok((Arc::new(service), summary))
    }

    /// Creates a service with the store selected by `config.persistence`.
    pub async fn from_config(
        config: &Config,
        catalog: OperationCatalog,
        metrics: Option<Arc<TaskgateMetrics>>,
    ) -> Result<(Arc<Self>, RestoreSummary), StoreError> {
        match open_store(&config.persistence).await? {
            Some(store) => Self::with_store(config, catalog, metrics, store).await,
            None => Ok((Self::new(config, catalog, metrics), RestoreSummary::default())),
        }
    }

    fn build(
        config: &Config,
        catalog: OperationCatalog,
        metrics: Option<Arc<TaskgateMetrics>>,
        store: Option<StoreWriter>,
    ) -> Self {
        let mut registry =
            TaskRegistry::new(config.registry.clone(), Arc::new(EventPublisher::new()));
        if let Some(ref writer) = store {
            registry = registry.with_store(writer.clone());
        }
        if let Some(ref metrics) = metrics {
            registry = registry.with_metrics(metrics.clone());
        }
        let registry = Arc::new(registry);

        let broker = Arc::new(InputBroker::new());
        let coordinator = Arc::new(CancellationCoordinator::new(
            registry.clone(),
            broker.clone(),
            metrics.clone(),
        ));
        let executor = Executor::new(
            registry.clone(),
            broker.clone(),
            coordinator.clone(),
            config.executor.input_timeout,
            metrics.clone(),
        );

        Self {
            executor_config: config.executor.clone(),
            catalog,
            reporter: StatusReporter::new(registry.clone()),
            registry,
            broker,
            coordinator,
            executor,
            executors: DashMap::new(),
            store,
            shutdown: CancellationToken::new(),
            metrics,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn catalog(&self) -> &OperationCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            active_tasks: self.registry.active_count(),
            total_tasks: self.registry.len(),
            // handles linger until the watchdog sweep
            running_executors: self
                .executors
                .iter()
                .filter(|entry| !entry.value().is_finished())
                .count(),
        }
    }

    // ------------------------------------------------------------------------
    // Client operations
    // ------------------------------------------------------------------------

    /// Starts `operation` and returns the `pending` snapshot.
    pub fn start(&self, operation: &str, params: Value) -> Result<TaskSnapshot, TaskError> {
        let snapshot = self.create(operation, &params)?;
        self.launch(&snapshot.task_id, operation, params)?;
        Ok(snapshot)
    }

    /// Starts `operation` with a subscription attached before the executor
    /// is spawned, so the stream carries every transition from `working` on.
    pub fn start_subscribed(
        &self,
        operation: &str,
        params: Value,
    ) -> Result<(TaskSnapshot, TaskEventStream), TaskError> {
        let snapshot = self.create(operation, &params)?;
        let stream = self.registry.subscribe(&snapshot.task_id)?;
        self.launch(&snapshot.task_id, operation, params)?;
        Ok((snapshot, stream))
    }

    fn create(&self, operation: &str, params: &Value) -> Result<TaskSnapshot, TaskError> {
        if self.is_shutting_down() {
            return Err(TaskError::Internal {
                details: "service is shutting down".to_string(),
            });
        }
        if !self.catalog.contains(operation) {
            return Err(TaskError::UnknownOperation {
                operation: operation.to_string(),
            });
        }
        let task = self.registry.create(operation, params.clone())?;
        Ok(task.snapshot())
    }

    fn launch(&self, id: &TaskId, operation: &str, params: Value) -> Result<(), TaskError> {
        let body = self
            .catalog
            .get(operation)
            .ok_or_else(|| TaskError::UnknownOperation {
                operation: operation.to_string(),
            })?;

        let token = self.coordinator.register(id);
        let handle = self.executor.spawn(id.clone(), body, params, token);
        self.executors.insert(id.clone(), handle);

        if let Some(ref metrics) = self.metrics {
            metrics.record_task_started(operation);
        }
        info!(task_id = %id, operation, "Task accepted");
        Ok(())
    }

    /// Current snapshot of task `id`.
    pub fn get_status(&self, id: &TaskId) -> Result<TaskSnapshot, TaskError> {
        self.reporter.poll(id)
    }

    /// Delivers a client answer to a task in `input_required`.
    ///
    /// Returns once the executor has resumed (or the acknowledgement
    /// timeout elapsed), with the snapshot as it is then. A value the
    /// executor never consumed is reported as `NotWaiting`.
    pub async fn provide_input(
        &self,
        id: &TaskId,
        value: Value,
    ) -> Result<TaskSnapshot, TaskError> {
        let task = self.registry.get(id)?;
        if task.state() != TaskState::InputRequired {
            return Err(TaskError::NotWaiting {
                task_id: id.clone(),
                state: task.state(),
            });
        }

        let ack = match self.broker.provide(id, value) {
            Ok(ack) => ack,
            Err(DeliveryError::NotWaiting) => {
                return Err(TaskError::NotWaiting {
                    task_id: id.clone(),
                    state: self.registry.get(id)?.state(),
                });
            }
            Err(DeliveryError::InvalidInput(reason)) => {
                return Err(TaskError::InvalidInput {
                    task_id: id.clone(),
                    reason,
                });
            }
        };

        match tokio::time::timeout(self.executor_config.input_ack_timeout, ack).await {
            Ok(Ok(())) => debug!(task_id = %id, "Input delivered"),
            // Executor stopped (cancel or shutdown) before resuming
            Ok(Err(_)) => {
                debug!(task_id = %id, "Input delivery dropped by executor");
                return Err(TaskError::NotWaiting {
                    task_id: id.clone(),
                    state: self.registry.get(id)?.state(),
                });
            }
            Err(_) => warn!(
                task_id = %id,
                timeout = ?self.executor_config.input_ack_timeout,
                "Executor did not acknowledge input in time"
            ),
        }

        self.reporter.poll(id)
    }

    /// Cancels task `id`. Cancelling a finished task is a no-op.
    pub fn cancel(&self, id: &TaskId) -> Result<CancelOutcome, TaskError> {
        self.coordinator.request_cancel(id)
    }

    pub fn list(&self, state: Option<TaskState>, limit: usize) -> Vec<TaskSummary> {
        self.reporter.list(state, limit)
    }

    pub fn subscribe(&self, id: &TaskId) -> Result<TaskEventStream, TaskError> {
        self.reporter.subscribe(id)
    }

    pub async fn wait(
        &self,
        id: &TaskId,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<TaskSnapshot, TaskError> {
        self.reporter.wait(id, condition, timeout).await
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Evicts expired terminal tasks. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let removed = self.registry.remove_expired(Utc::now()).len();
        if removed > 0 {
            debug!(removed, "Evicted expired tasks");
        }
        removed
    }

    /// Reaps finished executors.
    ///
    /// An executor always commits a final state before its handle
    /// finishes. A finished handle whose task is still live means the
    /// supervisor itself died; that task is failed with `executor_crashed`.
    pub fn sweep_executors(&self) -> usize {
        let finished: Vec<TaskId> = self
            .executors
            .iter()
            .filter(|entry| entry.value().is_finished())
            .map(|entry| entry.key().clone())
            .collect();

        let mut crashed = 0;
        for id in finished {
            self.executors.remove(&id);
            self.broker.discard(&id);
            self.coordinator.release(&id);

            if let Ok(task) = self.registry.get(&id)
                && !task.is_terminal()
            {
                let message = "Executor exited without finishing the task";
                warn!(task_id = %id, state = %task.state(), "{message}");
                let failed = self.registry.update(&id, |task| {
                    task.transition(
                        TaskPhase::failed(FailureKind::ExecutorCrashed, message),
                        Some("watchdog".to_string()),
                    )
                });
                if failed.is_ok() {
                    crashed += 1;
                }
            }
        }
        crashed
    }

    /// Spawns the cleanup and watchdog loop. Stops on shutdown.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let cleanup_every = self.registry.config().cleanup_interval;
        let watchdog_every = self.executor_config.watchdog_interval;

        tokio::spawn(async move {
            let mut cleanup = tokio::time::interval(cleanup_every);
            let mut watchdog = tokio::time::interval(watchdog_every);
            cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);
            watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the immediate first ticks
            cleanup.tick().await;
            watchdog.tick().await;

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("Maintenance loop stopping due to shutdown");
                        break;
                    }
                    _ = cleanup.tick() => {
                        service.cleanup_expired();
                    }
                    _ = watchdog.tick() => {
                        let crashed = service.sweep_executors();
                        if crashed > 0 {
                            warn!(crashed, "Watchdog failed tasks with dead executors");
                        }
                    }
                }
            }
        })
    }

    /// Stops the service.
    ///
    /// Live tasks are failed with `service_shutdown`, executors are signalled
    /// and given `shutdown_timeout` to exit, and the durable store is flushed.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        info!("Task service shutting down");

        let failed = self
            .registry
            .fail_active(FailureKind::ServiceShutdown, "Service shutting down");
        self.coordinator.cancel_all();

        let ids: Vec<TaskId> = self.executors.iter().map(|e| e.key().clone()).collect();
        let handles: Vec<JoinHandle<()>> = ids
            .iter()
            .filter_map(|id| self.executors.remove(id).map(|(_, handle)| handle))
            .collect();
        let timeout = self.executor_config.shutdown_timeout;
        if tokio::time::timeout(timeout, futures_util::future::join_all(handles))
            .await
            .is_err()
        {
            warn!(timeout = ?timeout, "Executors did not stop in time");
        }

        if let Some(ref store) = self.store {
            store.flush().await;
        }
        info!(failed, "Task service stopped");
    }
}
