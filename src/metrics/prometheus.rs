//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by delayq and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{CounterVec, Encoder, GaugeVec, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all delayq metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Tasks accepted by `add`, labeled by queue.
pub static TASKS_ENQUEUED: OnceLock<CounterVec> = OnceLock::new();

/// Tasks claimed from the schedule index, labeled by queue.
pub static TASKS_CLAIMED: OnceLock<CounterVec> = OnceLock::new();

/// Claim attempts that failed with a store error, labeled by queue.
pub static CLAIM_ERRORS: OnceLock<CounterVec> = OnceLock::new();

/// Finished executions, labeled by queue and outcome.
pub static TASKS_HANDLED: OnceLock<CounterVec> = OnceLock::new();

/// Handler execution time in seconds, labeled by queue.
pub static HANDLER_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Payload deletes that failed after a successful handler run, labeled by queue.
pub static DELETE_ERRORS: OnceLock<CounterVec> = OnceLock::new();

/// Executions currently running, labeled by queue.
pub static TASKS_IN_FLIGHT: OnceLock<GaugeVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Recording helpers in
/// [`MetricsCollector`](super::MetricsCollector) are no-ops until this runs.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let tasks_enqueued = CounterVec::new(
        Opts::new("delayq_tasks_enqueued_total", "Total number of tasks enqueued"),
        &["queue"],
    )?;

    let tasks_claimed = CounterVec::new(
        Opts::new("delayq_tasks_claimed_total", "Total number of due tasks claimed"),
        &["queue"],
    )?;

    let claim_errors = CounterVec::new(
        Opts::new(
            "delayq_claim_errors_total",
            "Claim attempts that failed with a store error",
        ),
        &["queue"],
    )?;

    let tasks_handled = CounterVec::new(
        Opts::new(
            "delayq_tasks_handled_total",
            "Finished task executions by outcome",
        ),
        &["queue", "outcome"],
    )?;

    let handler_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "delayq_handler_duration_seconds",
            "Time spent inside the task handler in seconds",
        )
        .buckets(vec![0.005, 0.025, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        &["queue"],
    )?;

    let delete_errors = CounterVec::new(
        Opts::new(
            "delayq_payload_delete_errors_total",
            "Payload deletes that failed after a successful handler run",
        ),
        &["queue"],
    )?;

    let tasks_in_flight = GaugeVec::new(
        Opts::new("delayq_tasks_in_flight", "Executions currently running"),
        &["queue"],
    )?;

    registry.register(Box::new(tasks_enqueued.clone()))?;
    registry.register(Box::new(tasks_claimed.clone()))?;
    registry.register(Box::new(claim_errors.clone()))?;
    registry.register(Box::new(tasks_handled.clone()))?;
    registry.register(Box::new(handler_duration.clone()))?;
    registry.register(Box::new(delete_errors.clone()))?;
    registry.register(Box::new(tasks_in_flight.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = TASKS_ENQUEUED.set(tasks_enqueued);
    let _ = TASKS_CLAIMED.set(tasks_claimed);
    let _ = CLAIM_ERRORS.set(claim_errors);
    let _ = TASKS_HANDLED.set(tasks_handled);
    let _ = HANDLER_DURATION.set(handler_duration);
    let _ = DELETE_ERRORS.set(delete_errors);
    let _ = TASKS_IN_FLIGHT.set(tasks_in_flight);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, the returned
/// string is a comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
