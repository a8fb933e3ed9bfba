//! Protocol-level errors and their JSON-RPC 2.0 representation.
//!
//! `RpcError` is what a host reports to a caller. Task errors are wrapped
//! unchanged so every host maps them to the same code and `error_type`.

pub mod jsonrpc;

pub use jsonrpc::{ErrorData, JsonRpcError};
use serde_json::json;
use thiserror::Error;

use crate::task::TaskError;

/// Errors reported to a JSON-RPC caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RpcError {
    /// Request line was not valid JSON.
    #[error("Parse error: {details}")]
    ParseError { details: String },

    /// JSON was valid but not a JSON-RPC request.
    #[error("Invalid request: {details}")]
    InvalidRequest { details: String },

    /// Method name is not served.
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    /// Params did not match the method's shape.
    #[error("Invalid params: {details}")]
    InvalidParams { details: String },

    /// A task operation failed.
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl RpcError {
    /// Maps the error to a JSON-RPC 2.0 error code.
    ///
    /// Standard codes (-32700 to -32603) cover protocol errors; -32000 to
    /// -32009 are task errors.
    pub fn to_jsonrpc_code(&self) -> i32 {
        match self {
            Self::ParseError { .. } => -32700,
            Self::InvalidRequest { .. } => -32600,
            Self::MethodNotFound { .. } => -32601,
            Self::InvalidParams { .. } => -32602,
            Self::Task(err) => match err {
                TaskError::Internal { .. } => -32603,
                TaskError::UnknownOperation { .. } => -32000,
                TaskError::CapacityExceeded { .. } => -32001,
                TaskError::NotWaiting { .. } => -32002,
                TaskError::InvalidTransition { .. } => -32003,
                TaskError::NotFound { .. } => -32004,
                TaskError::AlreadyTerminal { .. } => -32005,
                TaskError::InvalidInput { .. } => -32006,
                TaskError::InvalidProgress { .. } => -32007,
                TaskError::WaitTimeout { .. } => -32008,
            },
        }
    }

    /// Returns the error type name for metrics and logging.
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "parse_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::InvalidParams { .. } => "invalid_params",
            Self::Task(err) => err.error_type(),
        }
    }

    /// Returns safe, structured details for the client.
    pub fn safe_details(&self) -> Option<serde_json::Value> {
        match self {
            Self::MethodNotFound { method } => Some(json!({ "method": method })),
            Self::Task(err) => match err {
                TaskError::NotWaiting { task_id, state }
                | TaskError::AlreadyTerminal { task_id, state } => {
                    Some(json!({ "task_id": task_id, "state": state }))
                }
                TaskError::InvalidTransition { task_id, from, to } => {
                    Some(json!({ "task_id": task_id, "from": from, "to": to }))
                }
                TaskError::WaitTimeout {
                    task_id,
                    waited,
                    state,
                } => Some(json!({
                    "task_id": task_id,
                    "state": state,
                    "waited_ms": u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                })),
                TaskError::UnknownOperation { operation } => {
                    Some(json!({ "operation": operation }))
                }
                TaskError::CapacityExceeded { limit } => Some(json!({ "limit": limit })),
                // Internal details stay in the server log
                TaskError::Internal { .. } => None,
                other => other.task_id().map(|id| json!({ "task_id": id })),
            },
            _ => None,
        }
    }

    /// Converts the error to a JSON-RPC error object.
    pub fn to_jsonrpc_error(&self, correlation_id: &str) -> JsonRpcError {
        let message = match self {
            Self::Task(TaskError::Internal { .. }) => "Internal error".to_string(),
            other => other.to_string(),
        };
        JsonRpcError {
            code: self.to_jsonrpc_code(),
            message,
            data: Some(ErrorData {
                correlation_id: correlation_id.to_string(),
                error_type: self.error_type_name().to_string(),
                details: self.safe_details(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskId, TaskState};
    use std::time::Duration;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            RpcError::ParseError {
                details: "x".into()
            }
            .to_jsonrpc_code(),
            -32700
        );
        assert_eq!(
            RpcError::MethodNotFound {
                method: "x".into()
            }
            .to_jsonrpc_code(),
            -32601
        );
        assert_eq!(
            RpcError::from(TaskError::NotFound {
                task_id: TaskId::from_raw("unknown-id")
            })
            .to_jsonrpc_code(),
            -32004
        );
        assert_eq!(
            RpcError::from(TaskError::Internal {
                details: "boom".into()
            })
            .to_jsonrpc_code(),
            -32603
        );
    }

    #[test]
    fn test_task_error_types_pass_through() {
        let err = RpcError::from(TaskError::NotWaiting {
            task_id: TaskId::from_raw("tk_5"),
            state: TaskState::Working,
        });
        let rpc = err.to_jsonrpc_error("corr-1");
        let data = rpc.data.unwrap();
        assert_eq!(data.error_type, "not_waiting");
        assert_eq!(data.details.unwrap()["state"], "working");
    }

    #[test]
    fn test_wait_timeout_details() {
        let err = RpcError::from(TaskError::WaitTimeout {
            task_id: TaskId::from_raw("tk_1"),
            waited: Duration::from_millis(1500),
            state: TaskState::Working,
        });
        let details = err.safe_details().unwrap();
        assert_eq!(details["waited_ms"], 1500);
    }

    #[test]
    fn test_internal_details_not_exposed() {
        let err = RpcError::from(TaskError::Internal {
            details: "store path /secret".into(),
        });
        let rpc = err.to_jsonrpc_error("corr-2");
        assert_eq!(rpc.message, "Internal error");
        assert!(rpc.data.unwrap().details.is_none());
    }
}
