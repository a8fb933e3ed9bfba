//! Read-only status surface over the registry.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::events::TaskEventStream;
use crate::registry::TaskRegistry;
use crate::task::{Task, TaskError, TaskId, TaskSnapshot, TaskState, TaskSummary};

/// What a client is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    /// The task reached a terminal state
    Terminal,
    /// The task needs input or is done
    InputRequiredOrTerminal,
    /// Any commit after the given version
    ChangedSince(u64),
}

impl WaitCondition {
    #[must_use]
    pub fn is_met(&self, task: &Task) -> bool {
        match *self {
            Self::Terminal => task.is_terminal(),
            Self::InputRequiredOrTerminal => {
                task.is_terminal() || task.state() == TaskState::InputRequired
            }
            Self::ChangedSince(version) => task.version > version,
        }
    }
}

/// Polls, lists, waits on, and subscribes to tasks. Never mutates.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    registry: Arc<TaskRegistry>,
}

impl StatusReporter {
    #[must_use]
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    /// Current snapshot of task `id`.
    pub fn poll(&self, id: &TaskId) -> Result<TaskSnapshot, TaskError> {
        self.registry.get(id).map(|task| task.snapshot())
    }

    pub fn list(&self, state: Option<TaskState>, limit: usize) -> Vec<TaskSummary> {
        self.registry.list(state, limit)
    }

    /// Snapshots of every future commit of `id`.
    pub fn subscribe(&self, id: &TaskId) -> Result<TaskEventStream, TaskError> {
        self.registry.subscribe(id)
    }

    /// Waits until `condition` holds, bounded by `timeout`.
    pub async fn wait(
        &self,
        id: &TaskId,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<TaskSnapshot, TaskError> {
        self.registry
            .wait_until(id, |task| condition.is_met(task), timeout)
            .await
            .map(|task| task.snapshot())
    }
}
