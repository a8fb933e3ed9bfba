//! Prometheus metrics using the prometheus-client crate.
//!
//! `TaskgateMetrics` registers every task lifecycle metric with a shared
//! `Registry`. The host encodes that registry on its admin `/metrics`
//! endpoint using the OpenMetrics text format.
//!
//! Counter names are registered without the `_total` suffix; the encoder
//! appends it.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

// ─────────────────────────────────────────────────────────────────────────────
// Label Sets
// ─────────────────────────────────────────────────────────────────────────────

/// Labels for task start counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    /// Catalog operation name (already validated, so bounded)
    pub operation: String,
}

/// Labels for outcome counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    /// Terminal state or cancel outcome (e.g. "completed", "acknowledged")
    pub outcome: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Histogram Bucket Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Input wait duration buckets in seconds.
const INPUT_WAIT_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0];

// ─────────────────────────────────────────────────────────────────────────────
// TaskgateMetrics
// ─────────────────────────────────────────────────────────────────────────────

/// Prometheus metrics for the task subsystem.
///
/// All metric names use the `taskgate_` prefix.
#[derive(Debug)]
pub struct TaskgateMetrics {
    /// Tasks accepted by `start`, by operation.
    pub tasks_started_total: Family<OperationLabels, Counter>,

    /// Tasks that reached a terminal state, by terminal state.
    pub tasks_finished_total: Family<OutcomeLabels, Counter>,

    /// Cancel requests, by outcome (`acknowledged`, `already_terminal`, `not_found`).
    pub cancel_requests_total: Family<OutcomeLabels, Counter>,

    /// Non-terminal tasks currently in the registry.
    pub tasks_active: Gauge,

    /// Time executors spent paused in `input_required`, in seconds.
    pub input_wait_seconds: Histogram,
}

impl TaskgateMetrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let tasks_started_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "taskgate_tasks_started",
            "Tasks accepted by start",
            tasks_started_total.clone(),
        );

        let tasks_finished_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "taskgate_tasks_finished",
            "Tasks that reached a terminal state",
            tasks_finished_total.clone(),
        );

        let cancel_requests_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "taskgate_cancel_requests",
            "Cancel requests by outcome",
            cancel_requests_total.clone(),
        );

        let tasks_active = Gauge::default();
        registry.register(
            "taskgate_tasks_active",
            "Non-terminal tasks currently tracked",
            tasks_active.clone(),
        );

        let input_wait_seconds = Histogram::new(INPUT_WAIT_BUCKETS.iter().copied());
        registry.register(
            "taskgate_input_wait_seconds",
            "Time executors spent waiting for client input",
            input_wait_seconds.clone(),
        );

        Self {
            tasks_started_total,
            tasks_finished_total,
            cancel_requests_total,
            tasks_active,
            input_wait_seconds,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Convenience Methods
    // ─────────────────────────────────────────────────────────────────────────

    pub fn record_task_started(&self, operation: &str) {
        self.tasks_started_total
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
            })
            .inc();
    }

    pub fn record_task_finished(&self, outcome: &str) {
        self.tasks_finished_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_cancel_request(&self, outcome: &str) {
        self.cancel_requests_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Sets the active task gauge.
    pub fn set_tasks_active(&self, count: usize) {
        self.tasks_active
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Record how long an executor waited for input.
    pub fn record_input_wait(&self, duration_secs: f64) {
        self.input_wait_seconds.observe(duration_secs);
    }
}
