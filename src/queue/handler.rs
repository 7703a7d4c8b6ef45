//! Handler contract for due tasks.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::HandlerError;

use super::task::TaskId;

/// Execution context handed to a handler alongside the payload.
///
/// When a handler timeout is configured the handler's future is dropped at
/// the deadline; `deadline()` and `remaining()` let handlers budget their own
/// downstream calls against it.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    queue_name: String,
    deadline: Option<Instant>,
}

impl TaskContext {
    pub fn new(task_id: TaskId, queue_name: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            task_id,
            queue_name: queue_name.into(),
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// User-supplied processing for due tasks.
///
/// Invoked at most once per claimed task. Returning `Ok` deletes the task's
/// payload; returning `Err` leaves it in the payload table.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: TaskContext, payload: Vec<u8>) -> Result<(), HandlerError>;
}

/// Adapter that turns an async closure into a [`TaskHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wraps `f` as a handler.
///
/// ```ignore
/// let handler = handler_fn(|ctx, payload| async move {
///     tracing::info!(task_id = %ctx.task_id(), bytes = payload.len(), "got task");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(TaskContext, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: TaskContext, payload: Vec<u8>) -> Result<(), HandlerError> {
        (self.f)(ctx, payload).await
    }
}
