//! Delay queue: enqueue path, poller, dispatcher and lifecycle.
//!
//! One long-lived poller task wakes every `poll_interval`. On each tick it
//! reserves a concurrency permit without waiting, claims one due task for it,
//! and hands the pair to the executor, repeating until nothing is due, a
//! claim fails, or no permit is free. Tasks it cannot take stay in the
//! schedule index for a later tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::QueueError;
use crate::metrics::MetricsCollector;

use super::config::DelayQueueConfig;
use super::executor::Executor;
use super::handler::TaskHandler;
use super::redis_store::RedisTaskStore;
use super::stats::{QueueStats, SharedQueueStats};
use super::store::TaskStore;
use super::task::{self, Task, TaskId};

/// Handle to a running poller.
struct Poller {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// A delay queue bound to one backing store and queue name.
///
/// The concurrency semaphore lives as long as the queue, so executions left
/// running by `stop()` still hold their permits after a later `start()`.
pub struct DelayQueue {
    config: DelayQueueConfig,
    store: Arc<dyn TaskStore>,
    semaphore: Arc<Semaphore>,
    stats: Arc<SharedQueueStats>,
    metrics: MetricsCollector,
    poller: Option<Poller>,
}

impl DelayQueue {
    /// Creates a queue over an existing store.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidConfig` if the configuration is rejected.
    pub fn new(store: Arc<dyn TaskStore>, config: DelayQueueConfig) -> Result<Self, QueueError> {
        config.validate()?;

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            config,
            store,
            stats: Arc::new(SharedQueueStats::new()),
            metrics: MetricsCollector::new(),
            poller: None,
        })
    }

    /// Connects to Redis and creates a queue over `config.queue_name`'s keys.
    pub async fn connect(redis_url: &str, config: DelayQueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        let store = RedisTaskStore::connect(redis_url, &config.queue_name).await?;
        Self::new(Arc::new(store), config)
    }

    /// Schedules `payload` to run after `delay`.
    ///
    /// The payload is serialized to JSON. On success the task is durably
    /// recorded and will not be claimed before `delay` has elapsed; on error
    /// nothing is recorded.
    ///
    /// # Errors
    ///
    /// - `QueueError::Serialization` if the payload cannot be represented as JSON
    /// - `QueueError::Store` if the store transaction fails
    pub async fn add<T>(&self, payload: &T, delay: Duration) -> Result<TaskId, QueueError>
    where
        T: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(payload)?;
        let task = Task::new(bytes, task::due_at(Utc::now(), delay));

        self.store
            .schedule(&task.id, task.due_at, &task.payload)
            .await?;

        self.metrics.record_enqueued(&self.config.queue_name);
        debug!(
            queue = %self.config.queue_name,
            task_id = %task.id,
            due_at = task.due_at,
            "Task scheduled"
        );

        Ok(task.id)
    }

    /// Starts the poller in the background and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::AlreadyRunning` if the poller is already started.
    pub fn start(&mut self, handler: Arc<dyn TaskHandler>) -> Result<(), QueueError> {
        if self.is_running() {
            return Err(QueueError::AlreadyRunning);
        }

        let executor = Arc::new(Executor::new(
            self.config.queue_name.clone(),
            Arc::clone(&self.store),
            handler,
            self.config.handler_timeout,
            Arc::clone(&self.stats),
        ));

        let loop_state = PollLoop {
            queue_name: self.config.queue_name.clone(),
            poll_interval: self.config.poll_interval,
            store: Arc::clone(&self.store),
            semaphore: Arc::clone(&self.semaphore),
            executor,
            stats: Arc::clone(&self.stats),
            metrics: self.metrics.clone(),
        };

        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(loop_state.run(shutdown_rx));

        self.poller = Some(Poller {
            shutdown_tx,
            handle,
        });

        info!(
            queue = %self.config.queue_name,
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Delay queue started"
        );

        Ok(())
    }

    /// Stops the poller and waits for its loop to exit.
    ///
    /// Executions already dispatched keep running; only their own handler
    /// timeout bounds them.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::NotRunning` if the queue was never started.
    pub async fn stop(&mut self) -> Result<(), QueueError> {
        let Some(poller) = self.poller.take() else {
            return Err(QueueError::NotRunning);
        };

        // Ignore send error - the loop may have already exited
        let _ = poller.shutdown_tx.send(());

        if let Err(e) = poller.handle.await {
            error!(queue = %self.config.queue_name, error = %e, "Poller task panicked");
        }

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.poller.is_some()
    }

    /// Returns current queue statistics.
    pub fn stats(&self) -> QueueStats {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &DelayQueueConfig {
        &self.config
    }

    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    /// Number of tasks waiting in the schedule index.
    pub async fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(self.store.pending_count().await?)
    }

    /// Number of payloads stored, scheduled or not.
    pub async fn payload_count(&self) -> Result<usize, QueueError> {
        Ok(self.store.payload_count().await?)
    }

    /// Payloads with no schedule entry: failed or timed-out tasks, plus any
    /// execution in progress at the time of the call.
    pub async fn orphaned_ids(&self) -> Result<Vec<TaskId>, QueueError> {
        Ok(self.store.unscheduled_ids().await?)
    }

    /// Manually puts an orphaned task back in the schedule index.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::NotFound` if no payload exists for `id`.
    pub async fn requeue(&self, id: &TaskId, delay: Duration) -> Result<(), QueueError> {
        let due_at = task::due_at(Utc::now(), delay);
        if !self.store.reschedule(id, due_at).await? {
            return Err(QueueError::NotFound(id.clone()));
        }

        info!(queue = %self.config.queue_name, task_id = %id, due_at, "Task requeued");
        Ok(())
    }
}

/// State owned by the poller task.
struct PollLoop {
    queue_name: String,
    poll_interval: Duration,
    store: Arc<dyn TaskStore>,
    semaphore: Arc<Semaphore>,
    executor: Arc<Executor>,
    stats: Arc<SharedQueueStats>,
    metrics: MetricsCollector,
}

impl PollLoop {
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                // Err(Closed) means the queue handle was dropped
                _ = shutdown_rx.recv() => {
                    info!(queue = %self.queue_name, "Delay queue poller stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.stats.record_tick();
                    self.drain_due().await;
                }
            }
        }
    }

    /// Claims due tasks until nothing is due, a claim fails, or the
    /// concurrency ceiling is reached.
    async fn drain_due(&self) {
        let now = task::unix_now();

        loop {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                debug!(queue = %self.queue_name, "Concurrency ceiling reached, deferring claims");
                return;
            };

            match self.store.claim_due(now).await {
                Ok(Some(task_id)) => {
                    self.stats.record_claim();
                    self.metrics.record_claimed(&self.queue_name);
                    debug!(queue = %self.queue_name, task_id = %task_id, "Task claimed");
                    self.executor.spawn(task_id, permit);
                }
                Ok(None) => return,
                Err(e) => {
                    self.stats.record_claim_error();
                    self.metrics.record_claim_error(&self.queue_name);
                    error!(queue = %self.queue_name, error = %e, "Failed to claim due task");
                    return;
                }
            }
        }
    }
}
