//! Centralized default values for taskgate configuration.

use std::time::Duration;
use tracing::warn;

/// Default values used when the configuration file leaves a field out.
///
/// All timing-related values should reference this struct so that the
/// schema, the service, and the tests agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskgateDefaults {
    /// Maximum number of non-terminal tasks.
    pub max_active_tasks: usize,

    /// How long terminal tasks stay in the registry and durable store.
    pub retention: Duration,

    /// Interval between eviction sweeps.
    pub cleanup_interval: Duration,

    /// How long an executor waits for client input before failing the task.
    pub input_timeout: Duration,

    /// How long `provideInput` waits for the executor to resume.
    pub input_ack_timeout: Duration,

    /// Interval between watchdog sweeps for vanished executors.
    pub watchdog_interval: Duration,

    /// Maximum time for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for TaskgateDefaults {
    fn default() -> Self {
        Self {
            max_active_tasks: 1000,
            retention: Duration::from_secs(3600),       // 1 hour
            cleanup_interval: Duration::from_secs(60),  // 1 minute
            input_timeout: Duration::from_secs(600),    // 10 minutes
            input_ack_timeout: Duration::from_secs(2),
            watchdog_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl TaskgateDefaults {
    /// Create defaults from environment variables.
    ///
    /// # Environment Variables
    /// - `TASKGATE_MAX_ACTIVE_TASKS`
    /// - `TASKGATE_RETENTION_SECS`
    /// - `TASKGATE_CLEANUP_INTERVAL_SECS`
    /// - `TASKGATE_INPUT_TIMEOUT_SECS`
    /// - `TASKGATE_WATCHDOG_INTERVAL_SECS`
    /// - `TASKGATE_SHUTDOWN_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_active_tasks: parse_env_warn("TASKGATE_MAX_ACTIVE_TASKS", default.max_active_tasks),

            retention: Duration::from_secs(parse_env_warn(
                "TASKGATE_RETENTION_SECS",
                default.retention.as_secs(),
            )),

            cleanup_interval: Duration::from_secs(parse_env_warn(
                "TASKGATE_CLEANUP_INTERVAL_SECS",
                default.cleanup_interval.as_secs(),
            )),

            input_timeout: Duration::from_secs(parse_env_warn(
                "TASKGATE_INPUT_TIMEOUT_SECS",
                default.input_timeout.as_secs(),
            )),

            watchdog_interval: Duration::from_secs(parse_env_warn(
                "TASKGATE_WATCHDOG_INTERVAL_SECS",
                default.watchdog_interval.as_secs(),
            )),

            shutdown_timeout: Duration::from_secs(parse_env_warn(
                "TASKGATE_SHUTDOWN_TIMEOUT_SECS",
                default.shutdown_timeout.as_secs(),
            )),

            // Sub-second; not overridden via env var
            input_ack_timeout: default.input_ack_timeout,
        }
    }
}

/// Parse an environment variable with a warning on invalid values.
fn parse_env_warn<T: std::str::FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(val) => match val.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    env_var = name,
                    value = %val,
                    default = %default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}
