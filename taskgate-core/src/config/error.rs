//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Value validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Schema version not supported.
    #[error("unsupported schema version {version}, expected 1")]
    UnsupportedSchemaVersion { version: u32 },

    /// A limit that must be positive is zero.
    #[error("'{field}' must be greater than zero")]
    ZeroValue { field: &'static str },

    /// A duration that must be positive is zero.
    #[error("'{field}' must be a non-zero duration")]
    ZeroDuration { field: &'static str },

    /// The file backend was selected without a directory.
    #[error("persistence backend 'file' requires 'persistence.path'")]
    MissingPersistencePath,

    /// Admin bind address does not parse.
    #[error("invalid admin bind address '{bind}'")]
    InvalidBindAddress { bind: String },

    /// Required environment variable not set.
    #[error("environment variable '{var}' not set (required for field '{field}')")]
    MissingEnvVar { var: String, field: String },

    // ─────────────────────────────────────────────────────────────────────────
    // I/O and parsing errors
    // ─────────────────────────────────────────────────────────────────────────
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    ParseError(#[from] serde_saphyr::Error),

    /// I/O error reading config file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Explicitly requested config file does not exist.
    #[error("configuration file not found (searched: {searched:?})")]
    ConfigFileNotFound { searched: Vec<PathBuf> },

    /// Empty configuration file.
    #[error("configuration file is empty")]
    EmptyConfigFile,
}

/// Validation warnings (non-fatal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// `persistence.path` is set but the backend does not use it.
    PersistencePathIgnored { backend: String },

    /// The ack wait is longer than the input wait it acknowledges.
    AckTimeoutExceedsInputTimeout,

    /// Terminal tasks are evicted before a client is likely to poll them.
    RetentionShorterThanCleanup,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PersistencePathIgnored { backend } => {
                write!(f, "persistence.path is ignored by backend '{backend}'")
            }
            Self::AckTimeoutExceedsInputTimeout => {
                write!(f, "executor.input_ack_timeout exceeds executor.input_timeout")
            }
            Self::RetentionShorterThanCleanup => {
                write!(f, "registry.retention is shorter than registry.cleanup_interval")
            }
        }
    }
}

/// Result of configuration validation.
#[derive(Debug)]
pub struct ValidationResult {
    /// Non-fatal warnings encountered during validation.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Create a new validation result with no warnings.
    pub fn ok() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    /// Create a new validation result with warnings.
    pub fn with_warnings(warnings: Vec<ValidationWarning>) -> Self {
        Self { warnings }
    }

    /// Check if validation passed with no warnings.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
