//! delayq: a Redis-backed delay queue.
//!
//! Schedule serializable payloads to run after a delay, then dispatch them to
//! a handler under a bounded concurrency ceiling. Several processes can poll
//! the same queue; each due task is claimed by exactly one of them.

pub mod cli;
pub mod error;
pub mod metrics;
pub mod queue;

pub use error::{HandlerError, QueueError, StoreError};
pub use queue::{
    handler_fn, DelayQueue, DelayQueueConfig, TaskContext, TaskHandler, TaskId, TaskStore,
};
