//! Task domain types: input requests, failures, the phase enum, and the Task record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::TaskError;
use super::id::TaskId;
use super::status::TaskState;

// ============================================================================
// Input Requests
// ============================================================================

/// Shape of the answer an operation is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Yes/no question. Accepts a boolean or one of the options.
    Confirmation,
    /// Pick one of `options`.
    Choice,
    /// Free-form text.
    Text,
}

/// A question published to the client while a task is `input_required`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRequest {
    /// What kind of answer is expected
    pub kind: InputKind,
    /// Human-readable prompt
    pub message: String,
    /// Allowed answers, if restricted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl InputRequest {
    /// A yes/no question.
    #[must_use]
    pub fn confirmation(message: impl Into<String>) -> Self {
        Self {
            kind: InputKind::Confirmation,
            message: message.into(),
            options: None,
        }
    }

    /// A question with a fixed set of answers.
    #[must_use]
    pub fn choice<I, S>(message: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: InputKind::Choice,
            message: message.into(),
            options: Some(options.into_iter().map(Into::into).collect()),
        }
    }

    /// A free-form text question.
    #[must_use]
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            kind: InputKind::Text,
            message: message.into(),
            options: None,
        }
    }

    /// Checks that `value` is an acceptable answer.
    ///
    /// Returns the rejection reason on failure.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        if let Some(options) = &self.options {
            return match value.as_str() {
                Some(s) if options.iter().any(|o| o == s) => Ok(()),
                Some(s) => Err(format!("'{s}' is not one of {options:?}")),
                None if self.kind == InputKind::Confirmation && value.is_boolean() => Ok(()),
                None => Err(format!("expected one of {options:?}")),
            };
        }

        match self.kind {
            InputKind::Confirmation if value.is_boolean() || value.is_string() => Ok(()),
            InputKind::Confirmation => Err("expected a boolean".to_string()),
            InputKind::Text if value.is_string() => Ok(()),
            InputKind::Text => Err("expected a string".to_string()),
            // Choice without options accepts any string
            InputKind::Choice if value.is_string() => Ok(()),
            InputKind::Choice => Err("expected a string".to_string()),
        }
    }
}

// ============================================================================
// Failure Types
// ============================================================================

/// Why a task ended `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operation returned an unrecoverable error
    ExecutionFailure,
    /// The client did not answer an input request in time
    InputTimeout,
    /// The operation panicked or its executor vanished
    ExecutorCrashed,
    /// The process restarted while the task was running
    Interrupted,
    /// The service shut down while the task was running
    ServiceShutdown,
}

impl FailureKind {
    /// Wire name, also used as a metric label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutionFailure => "execution_failure",
            Self::InputTimeout => "input_timeout",
            Self::ExecutorCrashed => "executor_crashed",
            Self::Interrupted => "interrupted",
            Self::ServiceShutdown => "service_shutdown",
        }
    }
}

/// Information about why a task failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Failure category
    pub kind: FailureKind,
    /// Human-readable reason, verbatim from the failing step where applicable
    pub message: String,
    /// Whether starting the operation again may succeed
    pub retriable: bool,
}

impl TaskFailure {
    /// Creates a failure of the given kind.
    ///
    /// Everything except `execution_failure` is retriable: those failures
    /// come from the environment, not from the operation's own logic.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retriable: kind != FailureKind::ExecutionFailure,
        }
    }
}

// ============================================================================
// Task Phase
// ============================================================================

/// The state tag together with exactly the payload that state carries.
///
/// `result` exists only alongside `Completed`, `error` only alongside
/// `Failed`, and `input_request` only alongside `InputRequired`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskPhase {
    Pending,
    Working,
    InputRequired { request: InputRequest },
    Completed { result: Value },
    Failed { error: TaskFailure },
    Cancelled,
}

impl TaskPhase {
    /// The bare state of this phase.
    #[must_use]
    pub fn state(&self) -> TaskState {
        match self {
            Self::Pending => TaskState::Pending,
            Self::Working => TaskState::Working,
            Self::InputRequired { .. } => TaskState::InputRequired,
            Self::Completed { .. } => TaskState::Completed,
            Self::Failed { .. } => TaskState::Failed,
            Self::Cancelled => TaskState::Cancelled,
        }
    }

    /// Shorthand for a failed phase.
    #[must_use]
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed {
            error: TaskFailure::new(kind, message),
        }
    }
}

// ============================================================================
// Task Transition
// ============================================================================

/// Record of a task state change for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTransition {
    /// Previous state
    pub from: TaskState,
    /// New state
    pub to: TaskState,
    /// When the transition was committed
    pub at: DateTime<Utc>,
    /// Optional reason for the transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ============================================================================
// Task
// ============================================================================

/// One tracked long-running operation.
///
/// Mutated only through [`crate::registry::TaskRegistry::update`], which
/// applies changes to a private copy and commits it atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,
    /// Catalog name of the operation
    pub operation: String,
    /// Parameters passed to the operation
    #[serde(default)]
    pub params: Value,
    /// Current state and its payload
    pub phase: TaskPhase,
    /// Completion fraction in `[0.0, 1.0]`
    pub progress: f64,
    /// Latest status message
    pub message: String,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When the last mutation was committed
    pub updated_at: DateTime<Utc>,
    /// When the task reached a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_at: Option<DateTime<Utc>>,
    /// Incremented on every committed mutation
    pub version: u64,
    /// Audit trail of state changes
    #[serde(default)]
    pub transitions: Vec<TaskTransition>,
}

impl Task {
    /// Creates a new task in `pending`.
    #[must_use]
    pub fn new(id: TaskId, operation: impl Into<String>, params: Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            operation: operation.into(),
            params,
            phase: TaskPhase::Pending,
            progress: 0.0,
            message: String::new(),
            created_at: now,
            updated_at: now,
            terminal_at: None,
            version: 0,
            transitions: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.phase.state()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Moves the task into `phase`.
    ///
    /// Rejects the change with `AlreadyTerminal` from a terminal state and
    /// with `InvalidTransition` when the state machine forbids it. On error
    /// the task is left untouched.
    pub fn transition(&mut self, phase: TaskPhase, reason: Option<String>) -> Result<(), TaskError> {
        let from = self.state();
        let to = phase.state();

        if from.is_terminal() {
            return Err(TaskError::AlreadyTerminal {
                task_id: self.id.clone(),
                state: from,
            });
        }
        if !from.can_transition_to(to) {
            return Err(TaskError::InvalidTransition {
                task_id: self.id.clone(),
                from,
                to,
            });
        }

        let now = Utc::now();
        if from != to {
            self.transitions.push(TaskTransition {
                from,
                to,
                at: now,
                reason,
            });
        }
        if to == TaskState::Completed {
            self.progress = 1.0;
        }
        if to.is_terminal() {
            self.terminal_at = Some(now);
        }
        self.phase = phase;
        Ok(())
    }

    /// Records a progress update while `working`.
    ///
    /// The fraction is clamped into `[0.0, 1.0]` and never moves backwards;
    /// the message is always overwritten.
    pub fn record_progress(&mut self, fraction: f64, message: impl Into<String>) -> Result<(), TaskError> {
        if fraction.is_nan() {
            return Err(TaskError::InvalidProgress {
                task_id: self.id.clone(),
            });
        }
        let from = self.state();
        if from.is_terminal() {
            return Err(TaskError::AlreadyTerminal {
                task_id: self.id.clone(),
                state: from,
            });
        }
        // progress never schedules or resumes a task
        if from != TaskState::Working {
            return Err(TaskError::InvalidTransition {
                task_id: self.id.clone(),
                from,
                to: TaskState::Working,
            });
        }
        self.progress = self.progress.max(fraction.clamp(0.0, 1.0));
        self.message = message.into();
        Ok(())
    }

    /// Current input request, if the task is waiting for one.
    #[must_use]
    pub fn input_request(&self) -> Option<&InputRequest> {
        match &self.phase {
            TaskPhase::InputRequired { request } => Some(request),
            _ => None,
        }
    }

    /// Status view sent to clients.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        let (result, error, input_request) = match &self.phase {
            TaskPhase::Completed { result } => (Some(result.clone()), None, None),
            TaskPhase::Failed { error } => (None, Some(error.clone()), None),
            TaskPhase::InputRequired { request } => (None, None, Some(request.clone())),
            TaskPhase::Pending | TaskPhase::Working | TaskPhase::Cancelled => (None, None, None),
        };

        TaskSnapshot {
            task_id: self.id.clone(),
            operation: self.operation.clone(),
            state: self.state(),
            progress: self.progress,
            message: self.message.clone(),
            result,
            error,
            input_request,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Compact view used by `list`.
    #[must_use]
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.id.clone(),
            operation: self.operation.clone(),
            state: self.state(),
            progress: self.progress,
            message: self.message.clone(),
        }
    }
}

// ============================================================================
// Client Views
// ============================================================================

/// Point-in-time status of a task.
///
/// Built from the stored record only, so repeated snapshots of an unchanged
/// task serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub operation: String,
    pub state: TaskState,
    pub progress: f64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_request: Option<InputRequest>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of `list` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub operation: String,
    pub state: TaskState,
    pub progress: f64,
    pub message: String,
}
