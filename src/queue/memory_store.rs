//! In-memory task store for development and tests.
//!
//! Each operation runs inside one mutex critical section, which gives the
//! same atomicity the Redis store gets from MULTI/EXEC and Lua. Call counters
//! and fault switches let tests observe the poller and simulate outages.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;

use super::store::TaskStore;
use super::task::TaskId;

#[derive(Default)]
struct Tables {
    /// (due_at, id), so iteration order is due time then id.
    schedule: BTreeSet<(i64, TaskId)>,
    scores: HashMap<TaskId, i64>,
    payloads: HashMap<TaskId, Vec<u8>>,
}

impl Tables {
    fn insert_schedule(&mut self, id: &TaskId, due_at: i64) {
        if let Some(old) = self.scores.insert(id.clone(), due_at) {
            self.schedule.remove(&(old, id.clone()));
        }
        self.schedule.insert((due_at, id.clone()));
    }
}

#[derive(Default)]
struct CallCounts {
    schedule: AtomicU64,
    claim_due: AtomicU64,
    read_payload: AtomicU64,
    delete_payload: AtomicU64,
}

#[derive(Default)]
struct Faults {
    schedule: AtomicBool,
    claim_due: AtomicBool,
    read_payload: AtomicBool,
    delete_payload: AtomicBool,
}

/// Which store operation a fault switch applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Schedule,
    ClaimDue,
    ReadPayload,
    DeletePayload,
}

/// Process-local `TaskStore`.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tables: Mutex<Tables>,
    calls: CallCounts,
    faults: Faults,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call of `op` fail with `StoreError::Unavailable`.
    pub fn set_failing(&self, op: StoreOp, failing: bool) {
        self.fault(op).store(failing, Ordering::SeqCst);
    }

    /// Number of times `op` has been called, failed calls included.
    pub fn call_count(&self, op: StoreOp) -> u64 {
        let counter = match op {
            StoreOp::Schedule => &self.calls.schedule,
            StoreOp::ClaimDue => &self.calls.claim_due,
            StoreOp::ReadPayload => &self.calls.read_payload,
            StoreOp::DeletePayload => &self.calls.delete_payload,
        };
        counter.load(Ordering::SeqCst)
    }

    pub fn is_scheduled(&self, id: &TaskId) -> bool {
        self.lock().scores.contains_key(id)
    }

    pub fn has_payload(&self, id: &TaskId) -> bool {
        self.lock().payloads.contains_key(id)
    }

    /// Due time recorded for `id`, if it is still in the schedule index.
    pub fn due_at(&self, id: &TaskId) -> Option<i64> {
        self.lock().scores.get(id).copied()
    }

    fn fault(&self, op: StoreOp) -> &AtomicBool {
        match op {
            StoreOp::Schedule => &self.faults.schedule,
            StoreOp::ClaimDue => &self.faults.claim_due,
            StoreOp::ReadPayload => &self.faults.read_payload,
            StoreOp::DeletePayload => &self.faults.delete_payload,
        }
    }

    fn enter(&self, op: StoreOp, counter: &AtomicU64) -> Result<(), StoreError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.fault(op).load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{:?} failed (injected)", op)));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().expect("lock poisoned")
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn schedule(&self, id: &TaskId, due_at: i64, payload: &[u8]) -> Result<(), StoreError> {
        self.enter(StoreOp::Schedule, &self.calls.schedule)?;

        let mut tables = self.lock();
        tables.insert_schedule(id, due_at);
        tables.payloads.insert(id.clone(), payload.to_vec());
        Ok(())
    }

    async fn claim_due(&self, now: i64) -> Result<Option<TaskId>, StoreError> {
        self.enter(StoreOp::ClaimDue, &self.calls.claim_due)?;

        let mut tables = self.lock();
        let first = match tables.schedule.iter().next() {
            Some((due_at, id)) if *due_at <= now => (*due_at, id.clone()),
            _ => return Ok(None),
        };
        tables.schedule.remove(&first);
        tables.scores.remove(&first.1);
        Ok(Some(first.1))
    }

    async fn read_payload(&self, id: &TaskId) -> Result<Option<Vec<u8>>, StoreError> {
        self.enter(StoreOp::ReadPayload, &self.calls.read_payload)?;
        Ok(self.lock().payloads.get(id).cloned())
    }

    async fn delete_payload(&self, id: &TaskId) -> Result<(), StoreError> {
        self.enter(StoreOp::DeletePayload, &self.calls.delete_payload)?;
        self.lock().payloads.remove(id);
        Ok(())
    }

    async fn reschedule(&self, id: &TaskId, due_at: i64) -> Result<bool, StoreError> {
        let mut tables = self.lock();
        if !tables.payloads.contains_key(id) {
            return Ok(false);
        }
        tables.insert_schedule(id, due_at);
        Ok(true)
    }

    async fn pending_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock().schedule.len())
    }

    async fn payload_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock().payloads.len())
    }

    async fn unscheduled_ids(&self) -> Result<Vec<TaskId>, StoreError> {
        let tables = self.lock();
        let mut ids: Vec<TaskId> = tables
            .payloads
            .keys()
            .filter(|id| !tables.scores.contains_key(*id))
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}
