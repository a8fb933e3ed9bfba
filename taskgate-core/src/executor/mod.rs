//! Task executor: drives one operation through the task state machine.
//!
//! ## Module Organization
//!
//! - `mod.rs` - `Executor`, the per-task supervisor
//! - `operation.rs` - `Operation` trait, errors, and the catalog
//! - `context.rs` - `TaskContext` handed to operations
//!
//! Each task runs in two tokio tasks. The operation body runs in an inner
//! task; the supervisor awaits its `JoinHandle` and commits the final
//! state. A panic in the body surfaces as a `JoinError`, so a crashed
//! executor still leaves its task `failed` rather than stuck.

pub mod context;
pub mod operation;

pub use context::TaskContext;
pub use operation::{Operation, OperationCatalog, OperationError, StepError};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::broker::InputBroker;
use crate::cancel::CancellationCoordinator;
use crate::registry::TaskRegistry;
use crate::task::{FailureKind, TaskError, TaskId, TaskPhase};
use crate::telemetry::TaskgateMetrics;

/// Spawns and supervises task executors.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<TaskRegistry>,
    broker: Arc<InputBroker>,
    coordinator: Arc<CancellationCoordinator>,
    input_timeout: Duration,
    metrics: Option<Arc<TaskgateMetrics>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("input_timeout", &self.input_timeout)
            .finish_non_exhaustive()
    }
}

impl Executor {
    #[must_use]
    pub fn new(
        registry: Arc<TaskRegistry>,
        broker: Arc<InputBroker>,
        coordinator: Arc<CancellationCoordinator>,
        input_timeout: Duration,
        metrics: Option<Arc<TaskgateMetrics>>,
    ) -> Self {
        Self {
            registry,
            broker,
            coordinator,
            input_timeout,
            metrics,
        }
    }

    /// Starts the executor for task `id`.
    ///
    /// The handle resolves once the final state has been committed (or the
    /// task was found already finished).
    pub fn spawn(
        &self,
        id: TaskId,
        operation: Arc<dyn Operation>,
        params: Value,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let this = self.clone();
        let span = info_span!("task_executor", task_id = %id);
        tokio::spawn(
            async move {
                this.supervise(&id, operation, params, token).await;
                this.broker.discard(&id);
                this.coordinator.release(&id);
            }
            .instrument(span),
        )
    }

    async fn supervise(
        &self,
        id: &TaskId,
        operation: Arc<dyn Operation>,
        params: Value,
        token: CancellationToken,
    ) {
        match self.registry.update(id, |task| {
            task.transition(TaskPhase::Working, Some("Scheduled".to_string()))
        }) {
            Ok(_) => debug!("Task started"),
            Err(TaskError::AlreadyTerminal { state, .. }) => {
                debug!(%state, "Task finished before its executor started");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to start task");
                self.fail(id, FailureKind::ExecutorCrashed, e.to_string());
                return;
            }
        }

        let mut ctx = TaskContext::new(
            id.clone(),
            self.registry.clone(),
            self.broker.clone(),
            token,
            self.input_timeout,
            self.metrics.clone(),
        );
        let body = tokio::spawn(
            async move { operation.run(params, &mut ctx).await }.in_current_span(),
        );

        match body.await {
            Ok(outcome) => self.finish(id, outcome),
            Err(join_error) => self.crashed(id, join_error),
        }
    }

    fn finish(&self, id: &TaskId, outcome: Result<Value, OperationError>) {
        match outcome {
            Ok(result) => {
                match self.registry.update(id, |task| {
                    task.transition(TaskPhase::Completed { result }, Some("Completed".to_string()))
                }) {
                    Ok(_) => info!("Task completed"),
                    // Lost the race against cancel or shutdown; that commit stands
                    Err(TaskError::AlreadyTerminal { state, .. }) => {
                        debug!(%state, "Discarding result of finished task");
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to commit result");
                        self.fail(id, FailureKind::ExecutionFailure, e.to_string());
                    }
                }
            }
            Err(OperationError::Step(StepError::Cancelled)) => {
                match self.registry.update(id, |task| {
                    task.transition(
                        TaskPhase::Cancelled,
                        Some("Cancelled by operation".to_string()),
                    )
                }) {
                    Ok(_) => info!("Operation cancelled its task"),
                    Err(_) => debug!("Executor stopped after cancellation"),
                }
            }
            Err(OperationError::Step(StepError::InputTimeout { waited })) => {
                warn!(waited = ?waited, "Input wait timed out");
                self.fail(
                    id,
                    FailureKind::InputTimeout,
                    format!(
                        "No input received within {}",
                        humantime::format_duration(waited)
                    ),
                );
            }
            Err(OperationError::Step(StepError::Registry(e))) => {
                warn!(error = %e, "Operation step rejected");
                self.fail(id, FailureKind::ExecutionFailure, e.to_string());
            }
            Err(OperationError::Failed { message }) => {
                info!(error = %message, "Operation failed");
                self.fail(id, FailureKind::ExecutionFailure, message);
            }
        }
    }

    fn crashed(&self, id: &TaskId, join_error: JoinError) {
        let message = if join_error.is_panic() {
            let payload = join_error.into_panic();
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            format!("Executor panicked: {detail}")
        } else {
            "Executor was aborted".to_string()
        };
        error!(error = %message, "Executor crashed");
        self.fail(id, FailureKind::ExecutorCrashed, message);
    }

    /// Commits `failed`. A task that already finished is left alone.
    fn fail(&self, id: &TaskId, kind: FailureKind, message: String) {
        let reason = kind.as_str().to_string();
        match self.registry.update(id, |task| {
            task.transition(TaskPhase::failed(kind, message), Some(reason))
        }) {
            Ok(_) => {}
            Err(TaskError::AlreadyTerminal { state, .. }) => {
                debug!(%state, kind = kind.as_str(), "Task already finished, failure not recorded");
            }
            Err(e) => error!(error = %e, "Failed to record task failure"),
        }
    }
}

