//! Redis-backed delay queue.
//!
//! Payloads are scheduled for a future time and dispatched to a handler once
//! due, with a per-instance concurrency ceiling:
//!
//! - **DelayQueue**: enqueue API, poller and start/stop lifecycle
//! - **TaskStore**: schedule index + payload table port, with Redis and in-memory adapters
//! - **TaskHandler**: user processing, invoked once per claimed task
//!
//! # Architecture
//!
//! ```text
//!   add(payload, delay)
//!          │ ZADD <queue>:delayed + HSET <queue>:tasks (MULTI/EXEC)
//!   ┌──────▼───────┐
//!   │    Redis     │◄──────────────────────┐
//!   └──────┬───────┘                       │
//!          │ claim script                  │ HGET, then HDEL on success
//!   ┌──────▼───────┐  permit + task id ┌───┴────────┐
//!   │    Poller    ├──────────────────►│  Executor  ├──► handler(ctx, bytes)
//!   └──────────────┘  (one spawn each) └────────────┘
//! ```
//!
//! Any number of processes may poll the same queue; the claim script hands
//! each due id to exactly one of them.
//!
//! # Failure policy
//!
//! There is no retry and no dead-letter queue. A task whose handler fails or
//! times out has already left the schedule index, and its payload stays in
//! the payload table. [`DelayQueue::orphaned_ids`] lists such payloads and
//! [`DelayQueue::requeue`] puts one back on the schedule.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use delayq::queue::{handler_fn, DelayQueue, DelayQueueConfig};
//!
//! let config = DelayQueueConfig::new("emails")
//!     .with_concurrency(5)
//!     .with_handler_timeout(Duration::from_secs(30));
//! let mut queue = DelayQueue::connect("redis://localhost:6379", config).await?;
//!
//! queue.start(Arc::new(handler_fn(|ctx, payload| async move {
//!     tracing::info!(task_id = %ctx.task_id(), bytes = payload.len(), "sending");
//!     Ok(())
//! })))?;
//!
//! queue.add(&serde_json::json!({"to": "a@example.com"}), Duration::from_secs(60)).await?;
//!
//! queue.stop().await?;
//! ```

pub mod config;
pub mod delay_queue;
mod executor;
pub mod handler;
pub mod memory_store;
pub mod redis_store;
pub mod stats;
pub mod store;
pub mod task;

pub use config::DelayQueueConfig;
pub use delay_queue::DelayQueue;
pub use handler::{handler_fn, FnHandler, TaskContext, TaskHandler};
pub use memory_store::{InMemoryTaskStore, StoreOp};
pub use redis_store::RedisTaskStore;
pub use stats::{ExecutionOutcome, QueueStats};
pub use store::TaskStore;
pub use task::{QueueKeys, Task, TaskId};
