//! Task lifecycle state and the legal-transition table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Task State
// ============================================================================

/// Lifecycle state of a task.
///
/// State machine transitions:
/// - Pending → Working (executor scheduled)
/// - Pending → Cancelled (cancelled before the executor ran)
/// - Pending → Failed (shutdown or restart before scheduling)
/// - Working → Working (progress update)
/// - Working → InputRequired (operation needs disambiguation)
/// - Working → Completed | Failed | Cancelled
/// - InputRequired → Working (value delivered)
/// - InputRequired → Cancelled (cancel observed while waiting)
/// - InputRequired → Failed (input timeout, executor crash, shutdown)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, executor not yet scheduled
    Pending,
    /// Executor is advancing the operation
    Working,
    /// Executor is paused waiting for client input
    InputRequired,
    /// Operation finished with a result
    Completed,
    /// Operation finished with an error
    Failed,
    /// Client cancelled the task
    Cancelled,
}

impl TaskState {
    /// All states, in lifecycle order.
    pub const ALL: [TaskState; 6] = [
        Self::Pending,
        Self::Working,
        Self::InputRequired,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Returns true if this is a terminal state.
    ///
    /// Terminal states are immutable: no transition leaves them.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Checks if a transition from this state to another is legal.
    ///
    /// `Working → Working` is the progress-update self-transition.
    #[must_use]
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        matches!(
            (self, to),
            // From Pending
            (TaskState::Pending, TaskState::Working)
                | (TaskState::Pending, TaskState::Cancelled)
                | (TaskState::Pending, TaskState::Failed)
                // From Working
                | (TaskState::Working, TaskState::Working)
                | (TaskState::Working, TaskState::InputRequired)
                | (TaskState::Working, TaskState::Completed)
                | (TaskState::Working, TaskState::Failed)
                | (TaskState::Working, TaskState::Cancelled)
                // From InputRequired
                | (TaskState::InputRequired, TaskState::Working)
                | (TaskState::InputRequired, TaskState::Cancelled)
                | (TaskState::InputRequired, TaskState::Failed)
        )
    }

    /// Returns the wire-format string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Working => "working",
            Self::InputRequired => "input_required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "working" => Ok(Self::Working),
            "input_required" => Ok(Self::InputRequired),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ParseStateError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid state string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid task state: '{0}'")]
pub struct ParseStateError(String);
