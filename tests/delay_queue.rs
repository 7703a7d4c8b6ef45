//! End-to-end queue scenarios against the in-memory store.
//!
//! These run the real poller, dispatcher and executor; only the backing
//! store is swapped out. Timing assertions leave a generous margin because
//! due times are whole seconds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use delayq::queue::{InMemoryTaskStore, StoreOp};
use delayq::{
    handler_fn, DelayQueue, DelayQueueConfig, HandlerError, TaskContext, TaskHandler, TaskId,
    TaskStore,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Records every invocation and the highest number of handlers seen running at once.
#[derive(Default)]
struct Recorder {
    work: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
    seen: Mutex<HashMap<TaskId, (usize, Instant)>>,
}

impl Recorder {
    fn with_work(work: Duration) -> Self {
        Self {
            work,
            ..Default::default()
        }
    }

    fn handled(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn invocations(&self, id: &TaskId) -> usize {
        self.seen.lock().unwrap().get(id).map_or(0, |(n, _)| *n)
    }

    fn first_handled_at(&self, id: &TaskId) -> Option<Instant> {
        self.seen.lock().unwrap().get(id).map(|(_, at)| *at)
    }
}

#[async_trait]
impl TaskHandler for Recorder {
    async fn handle(&self, ctx: TaskContext, _payload: Vec<u8>) -> Result<(), HandlerError> {
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        self.seen
            .lock()
            .unwrap()
            .entry(ctx.task_id().clone())
            .and_modify(|(n, _)| *n += 1)
            .or_insert((1, Instant::now()));

        tokio::time::sleep(self.work).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Polls `check` every 20ms until it holds or `limit` elapses.
async fn wait_for(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

fn new_queue(store: &Arc<InMemoryTaskStore>, config: DelayQueueConfig) -> DelayQueue {
    let store: Arc<dyn TaskStore> = store.clone();
    DelayQueue::new(store, config).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delayed_tasks_handled_once_after_delay() {
    let store = Arc::new(InMemoryTaskStore::new());
    let config = DelayQueueConfig::new("scenario")
        .with_concurrency(5)
        .with_poll_interval(Duration::from_millis(500));
    let mut queue = new_queue(&store, config);
    let recorder = Arc::new(Recorder::with_work(Duration::from_millis(100)));
    queue.start(recorder.clone()).unwrap();

    let enqueued_at = Instant::now();
    let mut ids = Vec::new();
    for i in 0..10 {
        ids.push(
            queue
                .add(&serde_json::json!({ "n": i }), Duration::from_secs(2))
                .await
                .unwrap(),
        );
    }

    let done = wait_for(Duration::from_secs(6), || recorder.handled() == 10).await;
    assert!(done, "only {} of 10 tasks handled", recorder.handled());

    for id in &ids {
        assert_eq!(recorder.invocations(id), 1);
        // Due times are truncated to the second, so the earliest claim is
        // more than one second after enqueue.
        let handled_at = recorder.first_handled_at(id).unwrap();
        assert!(handled_at.duration_since(enqueued_at) > Duration::from_secs(1));
        assert!(handled_at.duration_since(enqueued_at) < Duration::from_secs(5));
    }
    assert!(recorder.max_running.load(Ordering::SeqCst) <= 5);

    assert!(wait_for(Duration::from_secs(1), || queue.stats().completed == 10).await);
    queue.stop().await.unwrap();
    assert!(ids.iter().all(|id| !store.has_payload(id)));
}

#[tokio::test]
async fn test_task_not_handled_before_delay() {
    let store = Arc::new(InMemoryTaskStore::new());
    let mut queue = new_queue(
        &store,
        DelayQueueConfig::new("early").with_poll_interval(Duration::from_millis(50)),
    );
    let recorder = Arc::new(Recorder::default());
    queue.start(recorder.clone()).unwrap();

    let id = queue.add("later", Duration::from_secs(3)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(recorder.invocations(&id), 0);
    assert!(store.is_scheduled(&id));

    queue.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backlog_respects_concurrency_ceiling() {
    let store = Arc::new(InMemoryTaskStore::new());
    for i in 0..200 {
        store
            .schedule(&TaskId::from(format!("backlog-{:03}", i)), 0, b"{}")
            .await
            .unwrap();
    }

    let mut queue = new_queue(
        &store,
        DelayQueueConfig::new("backlog")
            .with_concurrency(5)
            .with_poll_interval(Duration::from_millis(20)),
    );
    let recorder = Arc::new(Recorder::with_work(Duration::from_millis(5)));
    queue.start(recorder.clone()).unwrap();

    let done = wait_for(Duration::from_secs(15), || queue.stats().completed == 200).await;
    queue.stop().await.unwrap();

    assert!(done, "completed {} of 200", queue.stats().completed);
    assert_eq!(recorder.handled(), 200);
    assert!(recorder.max_running.load(Ordering::SeqCst) <= 5);
    assert!(queue.stats().peak_in_flight <= 5);
    assert_eq!(queue.stats().claimed, 200);
}

#[tokio::test]
async fn test_failed_task_keeps_payload_and_successful_task_removes_it() {
    let store = Arc::new(InMemoryTaskStore::new());
    let mut queue = new_queue(
        &store,
        DelayQueueConfig::new("outcomes").with_poll_interval(Duration::from_millis(50)),
    );

    queue
        .start(Arc::new(handler_fn(
            |_ctx: TaskContext, payload: Vec<u8>| async move {
                let value: String = serde_json::from_slice(&payload)?;
                if value == "fail" {
                    return Err(HandlerError::failed("refusing"));
                }
                Ok::<(), HandlerError>(())
            },
        )))
        .unwrap();

    let failing = queue.add("fail", Duration::ZERO).await.unwrap();
    let succeeding = queue.add("ok", Duration::ZERO).await.unwrap();

    let done = wait_for(Duration::from_secs(4), || queue.stats().finished() == 2).await;
    queue.stop().await.unwrap();
    assert!(done);

    let stats = queue.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);

    assert!(store.has_payload(&failing));
    assert!(!store.is_scheduled(&failing));
    assert!(!store.has_payload(&succeeding));
    assert_eq!(queue.orphaned_ids().await.unwrap(), vec![failing]);
}

#[tokio::test]
async fn test_handler_timeout_orphans_payload() {
    let store = Arc::new(InMemoryTaskStore::new());
    let mut queue = new_queue(
        &store,
        DelayQueueConfig::new("timeouts")
            .with_poll_interval(Duration::from_millis(50))
            .with_handler_timeout(Duration::from_millis(200)),
    );
    queue
        .start(Arc::new(Recorder::with_work(Duration::from_secs(30))))
        .unwrap();

    let id = queue.add("slow", Duration::ZERO).await.unwrap();

    let done = wait_for(Duration::from_secs(4), || {
        let stats = queue.stats();
        stats.timed_out == 1 && stats.in_flight == 0
    })
    .await;
    queue.stop().await.unwrap();
    assert!(done);

    let stats = queue.stats();
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.in_flight, 0);
    assert!(store.has_payload(&id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_keeps_concurrency_ceiling() {
    let store = Arc::new(InMemoryTaskStore::new());
    let mut queue = new_queue(
        &store,
        DelayQueueConfig::new("restart")
            .with_concurrency(1)
            .with_poll_interval(Duration::from_millis(50)),
    );
    let recorder = Arc::new(Recorder::with_work(Duration::from_secs(3)));

    let first = queue.add("a", Duration::ZERO).await.unwrap();
    queue.start(recorder.clone()).unwrap();
    assert!(wait_for(Duration::from_secs(2), || recorder.invocations(&first) == 1).await);
    queue.stop().await.unwrap();

    let second = queue.add("b", Duration::ZERO).await.unwrap();
    queue.start(recorder.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(recorder.invocations(&second), 0);
    assert_eq!(recorder.max_running.load(Ordering::SeqCst), 1);
    assert!(queue.stats().peak_in_flight <= 1);

    // Once the first execution finishes its permit goes to the second task
    assert!(wait_for(Duration::from_secs(5), || recorder.invocations(&second) == 1).await);
    queue.stop().await.unwrap();
    assert_eq!(recorder.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_zero_delay_task_handled_promptly() {
    let store = Arc::new(InMemoryTaskStore::new());
    let mut queue = new_queue(
        &store,
        DelayQueueConfig::new("prompt").with_poll_interval(Duration::from_millis(50)),
    );
    let recorder = Arc::new(Recorder::default());
    queue.start(recorder.clone()).unwrap();

    let id = queue.add("now", Duration::ZERO).await.unwrap();
    let done = wait_for(Duration::from_millis(500), || recorder.invocations(&id) == 1).await;
    queue.stop().await.unwrap();
    assert!(done);
}

#[tokio::test]
async fn test_stop_halts_claiming() {
    let store = Arc::new(InMemoryTaskStore::new());
    let mut queue = new_queue(
        &store,
        DelayQueueConfig::new("quiesce").with_poll_interval(Duration::from_millis(20)),
    );
    let recorder = Arc::new(Recorder::default());
    queue.start(recorder.clone()).unwrap();

    assert!(wait_for(Duration::from_secs(2), || store.call_count(StoreOp::ClaimDue) >= 3).await);
    queue.stop().await.unwrap();

    let calls = store.call_count(StoreOp::ClaimDue);
    let id = queue.add("after stop", Duration::ZERO).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(store.call_count(StoreOp::ClaimDue), calls);
    assert_eq!(recorder.invocations(&id), 0);
    assert!(store.is_scheduled(&id));
}

#[tokio::test]
async fn test_poller_survives_claim_errors() {
    let store = Arc::new(InMemoryTaskStore::new());
    store.set_failing(StoreOp::ClaimDue, true);

    let mut queue = new_queue(
        &store,
        DelayQueueConfig::new("flaky").with_poll_interval(Duration::from_millis(30)),
    );
    let recorder = Arc::new(Recorder::default());
    queue.start(recorder.clone()).unwrap();

    let id = queue.add("eventually", Duration::ZERO).await.unwrap();

    assert!(wait_for(Duration::from_secs(2), || queue.stats().claim_errors >= 3).await);
    assert!(queue.is_running());
    assert_eq!(recorder.invocations(&id), 0);

    store.set_failing(StoreOp::ClaimDue, false);
    let done = wait_for(Duration::from_secs(4), || recorder.invocations(&id) == 1).await;
    queue.stop().await.unwrap();
    assert!(done);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Email {
    to: String,
    subject: String,
    attempts: u32,
}

#[tokio::test]
async fn test_handler_receives_serialized_payload() {
    let store = Arc::new(InMemoryTaskStore::new());
    let mut queue = new_queue(
        &store,
        DelayQueueConfig::new("roundtrip").with_poll_interval(Duration::from_millis(50)),
    );

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    queue
        .start(Arc::new(handler_fn(
            move |ctx: TaskContext, payload: Vec<u8>| {
                let tx = tx.clone();
                async move {
                    let email: Email = serde_json::from_slice(&payload)?;
                    let _ = tx.send((ctx.task_id().clone(), email));
                    Ok::<(), HandlerError>(())
                }
            },
        )))
        .unwrap();

    let sent = Email {
        to: "ops@example.com".to_string(),
        subject: "disk almost full".to_string(),
        attempts: 0,
    };
    let id = queue.add(&sent, Duration::ZERO).await.unwrap();

    let (got_id, got) = tokio::time::timeout(Duration::from_secs(4), rx.recv())
        .await
        .expect("handler was not invoked")
        .unwrap();
    queue.stop().await.unwrap();

    assert_eq!(got_id, id);
    assert_eq!(got, sent);
}
