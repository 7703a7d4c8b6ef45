//! Execution of a single claimed task.
//!
//! A claimed task goes `claimed -> executing -> {completed | orphaned}`:
//!
//! 1. read the payload (missing or unreadable: stop here)
//! 2. run the handler, bounded by the handler timeout when one is set
//! 3. on success delete the payload; on failure or timeout leave it
//!
//! Nothing here puts a task back in the schedule index. All errors end the
//! task's execution and are only logged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error, warn};

use crate::error::HandlerError;
use crate::metrics::MetricsCollector;

use super::handler::{TaskContext, TaskHandler};
use super::stats::{ExecutionOutcome, SharedQueueStats};
use super::store::TaskStore;
use super::task::TaskId;

/// Runs claimed tasks against the store and the user handler.
pub(crate) struct Executor {
    queue_name: String,
    store: Arc<dyn TaskStore>,
    handler: Arc<dyn TaskHandler>,
    handler_timeout: Option<Duration>,
    stats: Arc<SharedQueueStats>,
    metrics: MetricsCollector,
}

impl Executor {
    pub(crate) fn new(
        queue_name: String,
        store: Arc<dyn TaskStore>,
        handler: Arc<dyn TaskHandler>,
        handler_timeout: Option<Duration>,
        stats: Arc<SharedQueueStats>,
    ) -> Self {
        Self {
            queue_name,
            store,
            handler,
            handler_timeout,
            stats,
            metrics: MetricsCollector::new(),
        }
    }

    /// Spawns the execution of `task_id` as its own tokio task.
    ///
    /// `permit` is the concurrency unit reserved by the poller; it is released
    /// when the spawned task ends, however it ends.
    pub(crate) fn spawn(self: &Arc<Self>, task_id: TaskId, permit: OwnedSemaphorePermit) {
        let executor = Arc::clone(self);
        let guard = InFlightGuard::enter(Arc::clone(&self.stats), &self.queue_name, permit);

        tokio::spawn(async move {
            let _guard = guard;
            executor.run(task_id).await;
        });
    }

    /// Executes one claimed task to completion.
    pub(crate) async fn run(&self, task_id: TaskId) -> ExecutionOutcome {
        let started = Instant::now();
        let outcome = self.execute(&task_id).await;

        self.stats.record_outcome(outcome);
        self.metrics.record_outcome(&self.queue_name, outcome);

        let duration_ms = started.elapsed().as_millis() as u64;
        if outcome.orphans_payload() {
            warn!(
                queue = %self.queue_name,
                task_id = %task_id,
                outcome = %outcome,
                duration_ms,
                "Task payload left for manual recovery"
            );
        } else {
            debug!(
                queue = %self.queue_name,
                task_id = %task_id,
                outcome = %outcome,
                duration_ms,
                "Task execution finished"
            );
        }

        outcome
    }

    async fn execute(&self, task_id: &TaskId) -> ExecutionOutcome {
        let payload = match self.store.read_payload(task_id).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                warn!(
                    queue = %self.queue_name,
                    task_id = %task_id,
                    "Task payload not found, skipping"
                );
                return ExecutionOutcome::PayloadMissing;
            }
            Err(e) => {
                error!(
                    queue = %self.queue_name,
                    task_id = %task_id,
                    error = %e,
                    "Failed to read task payload"
                );
                return ExecutionOutcome::FetchFailed;
            }
        };

        if let Err(e) = self.invoke_handler(task_id, payload).await {
            error!(
                queue = %self.queue_name,
                task_id = %task_id,
                error = %e,
                "Task handler failed"
            );
            return match e {
                HandlerError::TimedOut(_) => ExecutionOutcome::TimedOut,
                HandlerError::Failed(_) => ExecutionOutcome::Failed,
            };
        }

        if let Err(e) = self.store.delete_payload(task_id).await {
            self.stats.record_delete_error();
            self.metrics.record_delete_error(&self.queue_name);
            error!(
                queue = %self.queue_name,
                task_id = %task_id,
                error = %e,
                "Failed to delete task payload"
            );
        }

        ExecutionOutcome::Completed
    }

    async fn invoke_handler(&self, task_id: &TaskId, payload: Vec<u8>) -> Result<(), HandlerError> {
        let ctx = TaskContext::new(task_id.clone(), self.queue_name.as_str(), self.handler_timeout);
        let call = self.handler.handle(ctx, payload);
        let started = Instant::now();

        let result = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(HandlerError::TimedOut(limit)),
            },
            None => call.await,
        };

        self.metrics.record_handler_duration(&self.queue_name, started.elapsed().as_secs_f64());
        result
    }
}

/// Holds a concurrency permit and the in-flight count for one execution.
struct InFlightGuard {
    stats: Arc<SharedQueueStats>,
    queue_name: String,
    metrics: MetricsCollector,
    _permit: OwnedSemaphorePermit,
}

impl InFlightGuard {
    fn enter(stats: Arc<SharedQueueStats>, queue_name: &str, permit: OwnedSemaphorePermit) -> Self {
        let metrics = MetricsCollector::new();
        metrics.set_in_flight(queue_name, stats.begin_execution());
        Self {
            stats,
            queue_name: queue_name.to_string(),
            metrics,
            _permit: permit,
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        // Runs before `_permit` is dropped, so in_flight never exceeds the permits.
        let in_flight = self.stats.end_execution();
        self.metrics.set_in_flight(&self.queue_name, in_flight);
    }
}
