//! JSON-RPC 2.0 error response structures.

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 error object.
///
/// Embedded in JSON-RPC error responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (standard or taskgate-specific)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

/// Structured error context for clients and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ErrorData {
    /// Identifier that also appears in the server log line for this error
    pub correlation_id: String,

    /// Machine-readable error type name
    pub error_type: String,

    /// Type-specific details (task id, current state, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonrpc_error_serialization() {
        let error = JsonRpcError {
            code: -32004,
            message: "Task 'tk_x' not found".to_string(),
            data: Some(ErrorData {
                correlation_id: "c0ffee".to_string(),
                error_type: "task_not_found".to_string(),
                details: Some(serde_json::json!({"task_id": "tk_x"})),
            }),
        };

        let json = serde_json::to_value(&error).unwrap();

        assert_eq!(json["code"], -32004);
        assert_eq!(json["data"]["correlation_id"], "c0ffee");
        assert_eq!(json["data"]["error_type"], "task_not_found");
        assert_eq!(json["data"]["details"]["task_id"], "tk_x");
    }

    #[test]
    fn test_optional_fields_omitted() {
        let error = JsonRpcError {
            code: -32700,
            message: "Parse error".to_string(),
            data: None,
        };
        assert!(!serde_json::to_string(&error).unwrap().contains("\"data\""));

        let error = JsonRpcError {
            code: -32603,
            message: "Internal error".to_string(),
            data: Some(ErrorData {
                correlation_id: "id".to_string(),
                error_type: "internal_error".to_string(),
                details: None,
            }),
        };
        assert!(!serde_json::to_string(&error).unwrap().contains("\"details\""));
    }
}
