//! Metrics module for Prometheus-based monitoring.
//!
//! # Example
//!
//! ```ignore
//! use delayq::metrics::{init_metrics, export_metrics};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! // ... run queues ...
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    CLAIM_ERRORS, DELETE_ERRORS, HANDLER_DURATION, REGISTRY, TASKS_CLAIMED, TASKS_ENQUEUED,
    TASKS_HANDLED, TASKS_IN_FLIGHT,
};
