//! Cancellation coordinator.
//!
//! A cancel request commits `cancelled` through the registry first and only
//! then signals the executor. The commit is what makes the cancellation
//! authoritative: once it lands, any later completion attempt from the
//! executor fails with `AlreadyTerminal` and is discarded. The task's input
//! slot is closed right after the commit, so no later answer is accepted.

use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::InputBroker;
use crate::registry::TaskRegistry;
use crate::task::{Task, TaskError, TaskId, TaskPhase};
use crate::telemetry::TaskgateMetrics;

/// Result of a cancel request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The task was live and is now `cancelled`
    Acknowledged(Arc<Task>),
    /// The task had already finished; its final state is unchanged
    AlreadyTerminal(Arc<Task>),
}

impl CancelOutcome {
    /// The task as it is after the request.
    #[must_use]
    pub fn task(&self) -> &Arc<Task> {
        match self {
            Self::Acknowledged(task) | Self::AlreadyTerminal(task) => task,
        }
    }

    /// Wire/metric name of the outcome.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acknowledged(_) => "acknowledged",
            Self::AlreadyTerminal(_) => "already_terminal",
        }
    }
}

/// Owns one cancellation token per running task.
pub struct CancellationCoordinator {
    registry: Arc<TaskRegistry>,
    broker: Arc<InputBroker>,
    tokens: DashMap<TaskId, CancellationToken>,
    /// Parent of every task token; cancelled on shutdown
    root: CancellationToken,
    metrics: Option<Arc<TaskgateMetrics>>,
}

impl std::fmt::Debug for CancellationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationCoordinator")
            .field("tokens", &self.tokens.len())
            .field("root_cancelled", &self.root.is_cancelled())
            .finish()
    }
}

impl CancellationCoordinator {
    #[must_use]
    pub fn new(
        registry: Arc<TaskRegistry>,
        broker: Arc<InputBroker>,
        metrics: Option<Arc<TaskgateMetrics>>,
    ) -> Self {
        Self {
            registry,
            broker,
            tokens: DashMap::new(),
            root: CancellationToken::new(),
            metrics,
        }
    }

    /// Creates the token the executor for `id` observes.
    pub fn register(&self, id: &TaskId) -> CancellationToken {
        let token = self.root.child_token();
        self.tokens.insert(id.clone(), token.clone());
        token
    }

    /// Cancels task `id`.
    ///
    /// Cancelling a finished task is not an error: the caller gets
    /// `AlreadyTerminal` with the unchanged final record.
    pub fn request_cancel(&self, id: &TaskId) -> Result<CancelOutcome, TaskError> {
        let result = self.registry.update(id, |task| {
            task.transition(TaskPhase::Cancelled, Some("Cancelled by client".to_string()))
        });

        let outcome = match result {
            Ok(task) => {
                self.broker.discard(id);
                if let Some(token) = self.tokens.get(id) {
                    token.cancel();
                }
                info!(task_id = %id, "Task cancelled");
                CancelOutcome::Acknowledged(task)
            }
            Err(TaskError::AlreadyTerminal { .. }) => {
                debug!(task_id = %id, "Cancel request for finished task");
                CancelOutcome::AlreadyTerminal(self.registry.get(id)?)
            }
            Err(e) => {
                if matches!(e, TaskError::NotFound { .. }) {
                    self.record("not_found");
                }
                return Err(e);
            }
        };

        self.record(outcome.as_str());
        Ok(outcome)
    }

    /// Forgets the token of a finished executor.
    pub fn release(&self, id: &TaskId) {
        self.tokens.remove(id);
    }

    /// Signals every executor to stop.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// Number of tokens held for running executors.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.tokens.len()
    }

    fn record(&self, outcome: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_cancel_request(outcome);
        }
    }
}
