//! Configuration schema type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::TaskgateDefaults;
use super::duration_format;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-Level Schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Root configuration structure.
///
/// Every section is optional. Missing fields take their value from
/// [`TaskgateDefaults::from_env`], so `TASKGATE_*` variables override the
/// built-in defaults but never a value written in the file.
///
/// # Example
/// ```yaml
/// schema: 1
///
/// registry:
///   max_active_tasks: 1000
///   retention: 1h
///
/// executor:
///   input_timeout: 10m
///
/// persistence:
///   backend: file
///   path: ./taskgate-data
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Schema version (must be 1).
    #[serde(default = "default_schema")]
    pub schema: u32,

    /// Task registry limits and retention.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Executor policies.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Durable store selection.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Admin HTTP server.
    #[serde(default)]
    pub admin: AdminConfig,
}

fn default_schema() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            registry: RegistryConfig::default(),
            executor: ExecutorConfig::default(),
            persistence: PersistenceConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Task registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Maximum number of non-terminal tasks.
    #[serde(default = "default_max_active_tasks")]
    pub max_active_tasks: usize,

    /// How long terminal tasks are kept.
    #[serde(default = "default_retention", with = "duration_format")]
    pub retention: Duration,

    /// Interval between eviction sweeps.
    #[serde(default = "default_cleanup_interval", with = "duration_format")]
    pub cleanup_interval: Duration,
}

fn default_max_active_tasks() -> usize {
    TaskgateDefaults::from_env().max_active_tasks
}

fn default_retention() -> Duration {
    TaskgateDefaults::from_env().retention
}

fn default_cleanup_interval() -> Duration {
    TaskgateDefaults::from_env().cleanup_interval
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let defaults = TaskgateDefaults::from_env();
        Self {
            max_active_tasks: defaults.max_active_tasks,
            retention: defaults.retention,
            cleanup_interval: defaults.cleanup_interval,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executor policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// How long a paused executor waits for input before failing the task.
    #[serde(default = "default_input_timeout", with = "duration_format")]
    pub input_timeout: Duration,

    /// How long `provideInput` waits for the executor to resume.
    #[serde(default = "default_input_ack_timeout", with = "duration_format")]
    pub input_ack_timeout: Duration,

    /// Interval between watchdog sweeps for vanished executors.
    #[serde(default = "default_watchdog_interval", with = "duration_format")]
    pub watchdog_interval: Duration,

    /// How long shutdown waits for executors to wind down.
    #[serde(default = "default_shutdown_timeout", with = "duration_format")]
    pub shutdown_timeout: Duration,
}

fn default_input_timeout() -> Duration {
    TaskgateDefaults::from_env().input_timeout
}

fn default_input_ack_timeout() -> Duration {
    TaskgateDefaults::from_env().input_ack_timeout
}

fn default_watchdog_interval() -> Duration {
    TaskgateDefaults::from_env().watchdog_interval
}

fn default_shutdown_timeout() -> Duration {
    TaskgateDefaults::from_env().shutdown_timeout
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let defaults = TaskgateDefaults::from_env();
        Self {
            input_timeout: defaults.input_timeout,
            input_ack_timeout: defaults.input_ack_timeout,
            watchdog_interval: defaults.watchdog_interval,
            shutdown_timeout: defaults.shutdown_timeout,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which durable store backs the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    /// Registry only; tasks are lost on restart.
    #[default]
    None,
    /// In-process store (mainly for tests).
    Memory,
    /// One JSON file per task in `path`.
    File,
}

impl PersistenceBackend {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Memory => "memory",
            Self::File => "file",
        }
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub backend: PersistenceBackend,

    /// Directory for the file backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Admin HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AdminConfig {
    /// Port for `/health` and `/metrics`. The server is disabled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Address to bind.
    #[serde(default = "default_admin_bind")]
    pub bind: String,
}

fn default_admin_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            port: None,
            bind: default_admin_bind(),
        }
    }
}
