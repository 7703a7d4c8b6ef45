//! Delay queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Configuration for a [`DelayQueue`](super::DelayQueue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayQueueConfig {
    /// Key prefix for the queue's schedule index and payload table.
    pub queue_name: String,
    /// How often the poller looks for due tasks.
    pub poll_interval: Duration,
    /// Deadline for a single handler invocation. `None` means unbounded.
    pub handler_timeout: Option<Duration>,
    /// Maximum number of handler executions in flight at once.
    pub concurrency: usize,
}

impl Default for DelayQueueConfig {
    fn default() -> Self {
        Self {
            queue_name: "delayq".to_string(),
            poll_interval: Duration::from_secs(1),
            handler_timeout: None,
            concurrency: 10,
        }
    }
}

impl DelayQueueConfig {
    /// Creates a configuration for the named queue with default settings.
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the handler timeout.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Sets the concurrency ceiling.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Checks the configuration before a queue is built from it.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.queue_name.trim().is_empty() {
            return Err(QueueError::InvalidConfig(
                "queue_name must not be empty".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(QueueError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(QueueError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        if self.handler_timeout.is_some_and(|t| t.is_zero()) {
            return Err(QueueError::InvalidConfig(
                "handler_timeout must be non-zero when set".to_string(),
            ));
        }
        Ok(())
    }
}
