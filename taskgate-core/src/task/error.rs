//! Task operation errors.

use std::time::Duration;
use thiserror::Error;

use super::id::TaskId;
use super::status::TaskState;

// ============================================================================
// Task Errors
// ============================================================================

/// Errors returned by registry, broker, coordinator and service operations.
///
/// None of these is a server fault: every variant is reported to the caller
/// through the normal response channel.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    /// Task with the given ID was not found (expired, evicted, or never created).
    #[error("Task '{task_id}' not found")]
    NotFound {
        /// The task ID that was not found
        task_id: TaskId,
    },

    /// Input was delivered to a task that is not waiting for any.
    #[error("Task '{task_id}' is not waiting for input (state '{state}')")]
    NotWaiting {
        /// The task ID
        task_id: TaskId,
        /// State observed when the delivery was attempted
        state: TaskState,
    },

    /// Task is already in a terminal state.
    #[error("Task '{task_id}' is already in terminal state '{state}'")]
    AlreadyTerminal {
        /// The task ID
        task_id: TaskId,
        /// The current terminal state
        state: TaskState,
    },

    /// Transition not permitted by the state machine.
    #[error("Invalid transition for task '{task_id}': {from} -> {to}")]
    InvalidTransition {
        /// The task ID
        task_id: TaskId,
        /// Current state
        from: TaskState,
        /// Attempted new state
        to: TaskState,
    },

    /// Delivered value does not satisfy the pending input request.
    #[error("Invalid input for task '{task_id}': {reason}")]
    InvalidInput {
        /// The task ID
        task_id: TaskId,
        /// Why the value was rejected
        reason: String,
    },

    /// Progress value is not a number.
    #[error("Invalid progress value for task '{task_id}'")]
    InvalidProgress {
        /// The task ID
        task_id: TaskId,
    },

    /// `start` named an operation that is not in the catalog.
    #[error("Unknown operation '{operation}'")]
    UnknownOperation {
        /// The requested operation name
        operation: String,
    },

    /// Maximum number of active tasks reached.
    #[error("Active task capacity of {limit} exceeded")]
    CapacityExceeded {
        /// Configured limit
        limit: usize,
    },

    /// A bounded client wait elapsed before the condition held.
    #[error("Timed out after {waited:?} waiting on task '{task_id}' (state '{state}')")]
    WaitTimeout {
        /// The task ID
        task_id: TaskId,
        /// How long the caller waited
        waited: Duration,
        /// State at the time of the timeout
        state: TaskState,
    },

    /// Internal error.
    #[error("Internal error: {details}")]
    Internal {
        /// Error details
        details: String,
    },
}

impl TaskError {
    /// Machine-readable error type name (for logs, metrics, and wire errors).
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "task_not_found",
            Self::NotWaiting { .. } => "not_waiting",
            Self::AlreadyTerminal { .. } => "already_terminal",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidInput { .. } => "invalid_input",
            Self::InvalidProgress { .. } => "invalid_progress",
            Self::UnknownOperation { .. } => "unknown_operation",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::WaitTimeout { .. } => "wait_timeout",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// The task this error refers to, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::NotFound { task_id }
            | Self::NotWaiting { task_id, .. }
            | Self::AlreadyTerminal { task_id, .. }
            | Self::InvalidTransition { task_id, .. }
            | Self::InvalidInput { task_id, .. }
            | Self::InvalidProgress { task_id }
            | Self::WaitTimeout { task_id, .. } => Some(task_id),
            Self::UnknownOperation { .. } | Self::CapacityExceeded { .. } | Self::Internal { .. } => {
                None
            }
        }
    }
}
