//! Request and response types for `tasks/*` methods.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::cancel::CancelOutcome;
use crate::reporter::WaitCondition;
use crate::task::{TaskId, TaskSnapshot, TaskState, TaskSummary};

pub const METHOD_START: &str = "tasks/start";
pub const METHOD_GET: &str = "tasks/get";
pub const METHOD_INPUT: &str = "tasks/input";
pub const METHOD_CANCEL: &str = "tasks/cancel";
pub const METHOD_LIST: &str = "tasks/list";
pub const METHOD_SUBSCRIBE: &str = "tasks/subscribe";
pub const METHOD_WAIT: &str = "tasks/wait";
pub const METHOD_PING: &str = "ping";

/// Notification carrying one snapshot of a subscribed task.
pub const NOTIFICATION_STATUS: &str = "notifications/tasks/status";

/// Limit applied to `tasks/list` when none is given.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Wait applied to `tasks/wait` when none is given.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a single `tasks/wait`.
pub const MAX_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// tasks/start
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    /// Catalog name of the operation to run
    pub operation: String,
    /// Passed to the operation unchanged
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResult {
    pub task_id: TaskId,
    pub state: TaskState,
}

impl From<&TaskSnapshot> for StartResult {
    fn from(snapshot: &TaskSnapshot) -> Self {
        Self {
            task_id: snapshot.task_id.clone(),
            state: snapshot.state,
        }
    }
}

// ============================================================================
// tasks/get, tasks/subscribe
// ============================================================================

/// Params of every method that only names a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
    pub task_id: TaskId,
}

/// First response of `tasks/subscribe`; later snapshots arrive as
/// notifications tagged with `subscription`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResult {
    pub subscription: String,
    pub snapshot: TaskSnapshot,
}

/// Params of `notifications/tasks/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotification {
    pub subscription: String,
    pub snapshot: TaskSnapshot,
}

// ============================================================================
// tasks/input
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputParams {
    pub task_id: TaskId,
    pub value: Value,
}

// ============================================================================
// tasks/cancel
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResult {
    pub task_id: TaskId,
    pub state: TaskState,
    /// `acknowledged` or `already_terminal`
    pub outcome: String,
}

impl From<&CancelOutcome> for CancelResult {
    fn from(outcome: &CancelOutcome) -> Self {
        Self {
            task_id: outcome.task().id.clone(),
            state: outcome.task().state(),
            outcome: outcome.as_str().to_string(),
        }
    }
}

// ============================================================================
// tasks/list
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(default)]
    pub state: Option<TaskState>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListParams {
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult {
    pub tasks: Vec<TaskSummary>,
}

// ============================================================================
// tasks/wait
// ============================================================================

/// Condition names accepted by `tasks/wait`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    #[default]
    Terminal,
    InputRequired,
    Changed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitParams {
    pub task_id: TaskId,
    #[serde(default)]
    pub until: WaitUntil,
    /// Baseline for `changed`; defaults to 0 (any commit)
    #[serde(default)]
    pub since_version: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl WaitParams {
    #[must_use]
    pub fn condition(&self) -> WaitCondition {
        match self.until {
            WaitUntil::Terminal => WaitCondition::Terminal,
            WaitUntil::InputRequired => WaitCondition::InputRequiredOrTerminal,
            WaitUntil::Changed => WaitCondition::ChangedSince(self.since_version.unwrap_or(0)),
        }
    }

    /// Requested timeout, capped at [`MAX_WAIT_TIMEOUT`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_WAIT_TIMEOUT)
            .min(MAX_WAIT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_params_default_params() {
        let params: StartParams = serde_json::from_value(json!({"operation": "export"})).unwrap();
        assert_eq!(params.operation, "export");
        assert!(params.params.is_null());
    }

    #[test]
    fn test_input_params_camel_case() {
        let params: InputParams =
            serde_json::from_value(json!({"taskId": "tk_abc", "value": "continue"})).unwrap();
        assert_eq!(params.task_id.as_str(), "tk_abc");
        assert_eq!(params.value, json!("continue"));
    }

    #[test]
    fn test_list_params() {
        let params: ListParams =
            serde_json::from_value(json!({"state": "input_required"})).unwrap();
        assert_eq!(params.state, Some(TaskState::InputRequired));
        assert_eq!(params.limit(), DEFAULT_LIST_LIMIT);

        assert!(serde_json::from_value::<ListParams>(json!({"state": "paused"})).is_err());
    }

    #[test]
    fn test_wait_params() {
        let params: WaitParams = serde_json::from_value(json!({
            "taskId": "tk_abc",
            "until": "changed",
            "sinceVersion": 4,
            "timeoutMs": 3_600_000
        }))
        .unwrap();
        assert_eq!(params.condition(), WaitCondition::ChangedSince(4));
        assert_eq!(params.timeout(), MAX_WAIT_TIMEOUT);

        let params: WaitParams = serde_json::from_value(json!({"taskId": "tk_abc"})).unwrap();
        assert_eq!(params.condition(), WaitCondition::Terminal);
        assert_eq!(params.timeout(), DEFAULT_WAIT_TIMEOUT);
    }

    #[test]
    fn test_cancel_result_wire_format() {
        let result = CancelResult {
            task_id: TaskId::from_raw("tk_abc"),
            state: TaskState::Cancelled,
            outcome: "acknowledged".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"taskId": "tk_abc", "state": "cancelled", "outcome": "acknowledged"})
        );
    }
}
