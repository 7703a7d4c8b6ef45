//! Error types for delay queue operations.
//!
//! - `StoreError`: the backing store could not complete an operation
//! - `QueueError`: what callers of the queue API see (enqueue, lifecycle, recovery)
//! - `HandlerError`: what a task handler reports back to the executor

use std::time::Duration;

use thiserror::Error;

use crate::queue::TaskId;

/// Errors raised by a task store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis connection failed: {0}")]
    Connection(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced synchronously by the queue API.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("Queue is already running")]
    AlreadyRunning,

    #[error("Queue is not running")]
    NotRunning,

    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
}

/// Failure reported by (or imposed on) a task handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler timed out after {0:?}")]
    TimedOut(Duration),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Failed(format!("payload decode failed: {}", err))
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(format!("{:#}", err))
    }
}
