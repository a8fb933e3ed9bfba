//! Error types for the stdio host.
//!
//! `FramingError` covers one NDJSON line that could not become a JSON-RPC
//! message. `ServeError` covers failures that stop the host.

use std::net::SocketAddr;

use taskgate_core::config::ConfigError;
use taskgate_core::error::RpcError;
use taskgate_core::persist::StoreError;

/// Errors that can occur when parsing an NDJSON-framed JSON-RPC message.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// A single line exceeds the maximum size.
    ///
    /// Checked before JSON parsing.
    #[error("Message exceeds maximum size of {max_bytes} bytes")]
    MessageTooLarge {
        /// The configured maximum message size in bytes.
        max_bytes: usize,
    },

    /// The line is not valid UTF-8.
    #[error("Message is not valid UTF-8")]
    InvalidUtf8,

    /// The line is not valid JSON, or its structure is invalid for JSON-RPC.
    #[error("Malformed JSON: {reason}")]
    MalformedJson {
        /// Human-readable description of the parse failure.
        reason: String,
    },

    /// The `jsonrpc` field is absent.
    #[error("Missing required jsonrpc field")]
    MissingVersion,

    /// The `jsonrpc` field is present but not `"2.0"`.
    #[error("Unsupported JSON-RPC version: {version}")]
    UnsupportedVersion {
        /// The version string found in the message.
        version: String,
    },

    /// The message is a JSON array (batch request).
    #[error("JSON-RPC batch requests (arrays) are not supported")]
    UnsupportedBatch,

    /// An underlying IO error occurred while reading.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FramingError {
    /// Label used in logs.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::InvalidUtf8 => "invalid_utf8",
            Self::MalformedJson { .. } => "malformed_json",
            Self::MissingVersion => "missing_version",
            Self::UnsupportedVersion { .. } => "unsupported_version",
            Self::UnsupportedBatch => "unsupported_batch",
            Self::Io(_) => "io_error",
        }
    }

    /// The JSON-RPC error reported to the client for this line.
    #[must_use]
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::MessageTooLarge { .. } | Self::InvalidUtf8 | Self::MalformedJson { .. } => {
                RpcError::ParseError {
                    details: self.to_string(),
                }
            }
            Self::MissingVersion
            | Self::UnsupportedVersion { .. }
            | Self::UnsupportedBatch
            | Self::Io(_) => RpcError::InvalidRequest {
                details: self.to_string(),
            },
        }
    }
}

/// Failures that stop `taskgate serve` or `taskgate check`.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Durable store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to bind admin server on {addr}: {source}")]
    AdminBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid admin bind address '{bind}'")]
    AdminAddress { bind: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
