//! Recording helpers over the raw Prometheus metrics.
//!
//! Every method is a no-op when `init_metrics()` has not been called, so the
//! queue can record unconditionally.

use super::prometheus::{
    CLAIM_ERRORS, DELETE_ERRORS, HANDLER_DURATION, TASKS_CLAIMED, TASKS_ENQUEUED, TASKS_HANDLED,
    TASKS_IN_FLIGHT,
};
use crate::queue::ExecutionOutcome;

/// Metrics collector for delay queue events.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn record_enqueued(&self, queue: &str) {
        if let Some(counter) = TASKS_ENQUEUED.get() {
            counter.with_label_values(&[queue]).inc();
        }
    }

    pub fn record_claimed(&self, queue: &str) {
        if let Some(counter) = TASKS_CLAIMED.get() {
            counter.with_label_values(&[queue]).inc();
        }
    }

    pub fn record_claim_error(&self, queue: &str) {
        if let Some(counter) = CLAIM_ERRORS.get() {
            counter.with_label_values(&[queue]).inc();
        }
    }

    pub fn record_delete_error(&self, queue: &str) {
        if let Some(counter) = DELETE_ERRORS.get() {
            counter.with_label_values(&[queue]).inc();
        }
    }

    /// Record a finished execution, labeled by how it ended.
    pub fn record_outcome(&self, queue: &str, outcome: ExecutionOutcome) {
        if let Some(counter) = TASKS_HANDLED.get() {
            counter.with_label_values(&[queue, outcome.as_str()]).inc();
        }

        tracing::trace!(queue = queue, outcome = outcome.as_str(), "Recorded execution metric");
    }

    /// Record how long one handler call ran, timeouts included.
    ///
    /// # Arguments
    ///
    /// * `queue` - Queue name
    /// * `duration_secs` - Time spent inside the handler, in seconds
    pub fn record_handler_duration(&self, queue: &str, duration_secs: f64) {
        if let Some(histogram) = HANDLER_DURATION.get() {
            histogram.with_label_values(&[queue]).observe(duration_secs);
        }
    }

    pub fn set_in_flight(&self, queue: &str, in_flight: usize) {
        if let Some(gauge) = TASKS_IN_FLIGHT.get() {
            gauge.with_label_values(&[queue]).set(in_flight as f64);
        }
    }
}
