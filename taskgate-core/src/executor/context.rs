//! Handle an operation uses to talk to its task.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::operation::StepError;
use crate::broker::InputBroker;
use crate::registry::TaskRegistry;
use crate::task::{InputRequest, TaskError, TaskId, TaskPhase};
use crate::telemetry::TaskgateMetrics;

/// Per-task context handed to `Operation::run`.
///
/// Every method observes cancellation: once the task is cancelled (by a
/// client or by shutdown) the next call returns `StepError::Cancelled`.
pub struct TaskContext {
    id: TaskId,
    registry: Arc<TaskRegistry>,
    broker: Arc<InputBroker>,
    token: CancellationToken,
    input_timeout: Duration,
    metrics: Option<Arc<TaskgateMetrics>>,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("cancelled", &self.token.is_cancelled())
            .field("input_timeout", &self.input_timeout)
            .finish()
    }
}

impl TaskContext {
    pub(crate) fn new(
        id: TaskId,
        registry: Arc<TaskRegistry>,
        broker: Arc<InputBroker>,
        token: CancellationToken,
        input_timeout: Duration,
        metrics: Option<Arc<TaskgateMetrics>>,
    ) -> Self {
        Self {
            id,
            registry,
            broker,
            token,
            input_timeout,
            metrics,
        }
    }

    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancellation point. Yields to the scheduler, then fails if the task
    /// was cancelled.
    pub async fn checkpoint(&self) -> Result<(), StepError> {
        tokio::task::yield_now().await;
        if self.token.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        Ok(())
    }

    /// Reports progress.
    ///
    /// `fraction` is clamped into `[0.0, 1.0]` and never moves backwards.
    pub fn progress(&self, fraction: f64, message: impl Into<String>) -> Result<(), StepError> {
        let message = message.into();
        self.registry
            .update(&self.id, |task| task.record_progress(fraction, message))
            .map(|_| ())
            .map_err(step_error)
    }

    /// Sleeps unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), StepError> {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(StepError::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Pauses the task until a client answers `request`.
    ///
    /// The input slot is opened before `input_required` is committed, so a
    /// client that sees the new state can always deliver. The wait is
    /// bounded by the configured input timeout. The returned value has
    /// already been validated against the request.
    pub async fn ask(&mut self, request: InputRequest) -> Result<Value, StepError> {
        self.checkpoint().await?;

        let mut waiter = self
            .broker
            .register(&self.id, request.clone())
            .map_err(|e| StepError::Registry(TaskError::Internal { details: e.to_string() }))?;

        let message = request.message.clone();
        self.registry
            .update(&self.id, |task| {
                task.transition(
                    TaskPhase::InputRequired { request },
                    Some("Awaiting input".to_string()),
                )?;
                task.message = message;
                Ok(())
            })
            .map_err(step_error)?;

        let started = Instant::now();
        let delivery = tokio::select! {
            biased;
            () = self.token.cancelled() => return Err(StepError::Cancelled),
            received = tokio::time::timeout(self.input_timeout, waiter.recv()) => match received {
                Err(_) => {
                    return Err(StepError::InputTimeout {
                        waited: self.input_timeout,
                    });
                }
                // Slot discarded from outside: the task is being torn down
                Ok(None) => return Err(StepError::Cancelled),
                Ok(Some(delivery)) => delivery,
            },
        };

        // Resume before acknowledging: the client's call returns only once
        // the task has left input_required.
        self.registry
            .update(&self.id, |task| {
                task.transition(TaskPhase::Working, Some("Input received".to_string()))
            })
            .map_err(step_error)?;

        if let Some(ref metrics) = self.metrics {
            metrics.record_input_wait(started.elapsed().as_secs_f64());
        }
        debug!(task_id = %self.id, "Input accepted");
        Ok(delivery.accept())
    }
}

/// A terminal task means someone else (cancel or shutdown) finished it.
fn step_error(e: TaskError) -> StepError {
    match e {
        TaskError::AlreadyTerminal { .. } => StepError::Cancelled,
        other => StepError::Registry(other),
    }
}
