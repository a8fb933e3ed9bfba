//! Operation trait and catalog.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::context::TaskContext;
use crate::task::TaskError;

/// Why a step inside an operation could not continue.
///
/// Operations propagate these with `?`; the executor maps each to the
/// task's final state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StepError {
    /// The task was cancelled (by a client or by shutdown)
    #[error("Task was cancelled")]
    Cancelled,

    /// No input arrived within the configured timeout
    #[error("No input received within {waited:?}")]
    InputTimeout {
        /// How long the executor waited
        waited: Duration,
    },

    /// A registry commit was rejected
    #[error(transparent)]
    Registry(TaskError),
}

/// Error returned by an operation body.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OperationError {
    /// A context step failed
    #[error(transparent)]
    Step(#[from] StepError),

    /// The operation itself failed; `message` becomes the task error
    #[error("{message}")]
    Failed {
        /// Human-readable failure
        message: String,
    },
}

impl OperationError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// A named long-running operation.
///
/// `run` receives the `start` params and a context for reporting progress,
/// asking for input, and observing cancellation. The returned value becomes
/// the task result.
#[async_trait]
pub trait Operation: Send + Sync {
    async fn run(&self, params: Value, ctx: &mut TaskContext) -> Result<Value, OperationError>;
}

/// Registered operations, looked up by name at `start`.
#[derive(Clone, Default)]
pub struct OperationCatalog {
    operations: HashMap<String, Arc<dyn Operation>>,
}

impl std::fmt::Debug for OperationCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationCatalog")
            .field("operations", &self.names())
            .finish()
    }
}

impl OperationCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in `export` and `echo` operations.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register("export", crate::operations::ExportOperation);
        catalog.register("echo", crate::operations::EchoOperation);
        catalog
    }

    /// Adds or replaces an operation.
    pub fn register(&mut self, name: impl Into<String>, operation: impl Operation + 'static) {
        self.operations.insert(name.into(), Arc::new(operation));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let catalog = OperationCatalog::with_builtins();
        assert_eq!(catalog.names(), vec!["echo", "export"]);
        assert!(catalog.get("export").is_some());
        assert!(catalog.get("import").is_none());
    }

    #[test]
    fn test_operation_error_display() {
        assert_eq!(
            OperationError::failed("disk full").to_string(),
            "disk full"
        );
        assert_eq!(
            OperationError::from(StepError::Cancelled).to_string(),
            "Task was cancelled"
        );
    }
}
