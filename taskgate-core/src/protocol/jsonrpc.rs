//! Transport-agnostic JSON-RPC 2.0 envelopes.
//!
//! Classification works on an already-parsed `serde_json::Value`, so any
//! framing (NDJSON, HTTP bodies) can share it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JsonRpcError;

/// JSON-RPC request id: string, integer, or null.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
    Null,
}

impl std::fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// Message kind, determined by the presence of `id` and `method`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonRpcMessageKind {
    /// Has both `id` and `method`
    Request { id: JsonRpcId, method: String },
    /// Has `id` but no `method`
    Response { id: JsonRpcId },
    /// Has `method` but no `id`
    Notification { method: String },
}

/// Errors from [`classify_jsonrpc`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JsonRpcClassifyError {
    #[error("missing or invalid jsonrpc version field")]
    InvalidVersion,
    #[error("invalid id field")]
    InvalidId,
    #[error("message has neither id nor method")]
    Unclassifiable,
}

/// Classifies a parsed JSON-RPC message without taking ownership.
pub fn classify_jsonrpc(value: &Value) -> Result<JsonRpcMessageKind, JsonRpcClassifyError> {
    if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcClassifyError::InvalidVersion);
    }

    let id = match value.get("id") {
        Some(raw) => Some(parse_id(raw).ok_or(JsonRpcClassifyError::InvalidId)?),
        None => None,
    };
    let method = value
        .get("method")
        .and_then(Value::as_str)
        .map(String::from);

    match (id, method) {
        (Some(id), Some(method)) => Ok(JsonRpcMessageKind::Request { id, method }),
        (Some(id), None) => Ok(JsonRpcMessageKind::Response { id }),
        (None, Some(method)) => Ok(JsonRpcMessageKind::Notification { method }),
        (None, None) => Err(JsonRpcClassifyError::Unclassifiable),
    }
}

/// Floats, booleans, arrays, and objects are not valid ids.
fn parse_id(value: &Value) -> Option<JsonRpcId> {
    match value {
        Value::Number(n) => n.as_i64().map(JsonRpcId::Number),
        Value::String(s) => Some(JsonRpcId::String(s.clone())),
        Value::Null => Some(JsonRpcId::Null),
        _ => None,
    }
}

/// Outgoing response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: JsonRpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(id: JsonRpcId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn error(id: JsonRpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Outgoing notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcNotification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}
