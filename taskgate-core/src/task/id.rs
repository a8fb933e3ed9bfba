//! Task identifiers.
//!
//! Task IDs use the format `tk_<nanoid>`:
//! - Prefix: "tk_" (3 characters)
//! - Body: 21-character nanoid
//! - Example: "tk_V1StGXR8_Z5jdHi6B-myT"
//!
//! IDs are opaque to clients. Strings without the prefix are accepted as
//! lookup keys so that a stale or foreign handle yields `NotFound` rather
//! than a parse error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix for generated task IDs.
pub const TASK_ID_PREFIX: &str = "tk_";

/// Length of the nanoid body (excluding prefix).
pub const TASK_ID_BODY_LENGTH: usize = 21;

/// Opaque unique task identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a new random task ID with the `tk_` prefix.
    ///
    /// 21 nanoid characters give ~1 billion IDs before a 1% collision
    /// probability.
    #[must_use]
    pub fn new() -> Self {
        let body = nanoid::nanoid!(TASK_ID_BODY_LENGTH);
        Self(format!("{TASK_ID_PREFIX}{body}"))
    }

    /// Wraps a raw string without validation.
    #[must_use]
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns true if this ID was generated by taskgate.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.0.starts_with(TASK_ID_PREFIX)
    }

    /// Returns the raw string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl Serialize for TaskId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_format() {
        let id = TaskId::new();
        let s = id.as_str();

        assert!(s.starts_with(TASK_ID_PREFIX), "ID should start with 'tk_': {s}");
        assert_eq!(s.len(), TASK_ID_PREFIX.len() + TASK_ID_BODY_LENGTH);
        assert!(id.is_generated());
    }

    #[test]
    fn test_task_ids_are_unique() {
        let ids: std::collections::HashSet<TaskId> = (0..1000).map(|_| TaskId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_raw_id_is_not_generated() {
        let id = TaskId::from_raw("unknown-id");
        assert!(!id.is_generated());
        assert_eq!(id.to_string(), "unknown-id");
    }

    #[test]
    fn test_task_id_serializes_as_plain_string() {
        let id = TaskId::from_raw("tk_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"tk_abc\"");
        let back: TaskId = serde_json::from_str("\"tk_abc\"").unwrap();
        assert_eq!(back, id);
    }
}
