//! Task model for long-running operations.
//!
//! This module provides:
//! - `TaskState` state machine with legal transitions
//! - `TaskPhase`, which ties each state to exactly the payload it carries
//! - The `Task` record and the snapshot/summary views sent to clients
//! - `TaskError`, the error type shared by every task operation
//!
//! Tasks are never mutated in place by callers. All changes go through the
//! registry's atomic `update`.

pub mod error;
pub mod id;
pub mod status;
pub mod types;

pub use error::TaskError;
pub use id::TaskId;
pub use status::{ParseStateError, TaskState};
pub use types::{
    FailureKind, InputKind, InputRequest, Task, TaskFailure, TaskPhase, TaskSnapshot, TaskSummary,
    TaskTransition,
};

// ============================================================================
// Tests
// ============================================================================
