//! Task store port.
//!
//! Every operation is atomic with respect to other callers of the same store,
//! including callers in other processes.

use async_trait::async_trait;

use crate::error::StoreError;

use super::task::TaskId;

/// Backing store for a delay queue: a schedule index plus a payload table.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Records `id -> due_at` in the schedule index and `id -> payload` in the
    /// payload table as one transaction.
    async fn schedule(&self, id: &TaskId, due_at: i64, payload: &[u8]) -> Result<(), StoreError>;

    /// Removes and returns the id with the smallest due time `<= now`.
    ///
    /// Returns `Ok(None)` when nothing is due. Two concurrent calls never
    /// return the same id.
    async fn claim_due(&self, now: i64) -> Result<Option<TaskId>, StoreError>;

    /// Payload bytes for `id`, or `None` if the payload table has no entry.
    async fn read_payload(&self, id: &TaskId) -> Result<Option<Vec<u8>>, StoreError>;

    /// Removes `id` from the payload table. Deleting an absent id succeeds.
    async fn delete_payload(&self, id: &TaskId) -> Result<(), StoreError>;

    /// Puts an id whose payload still exists back into the schedule index.
    ///
    /// Returns `false` (and changes nothing) when the payload is absent.
    async fn reschedule(&self, id: &TaskId, due_at: i64) -> Result<bool, StoreError>;

    /// Number of ids in the schedule index.
    async fn pending_count(&self) -> Result<usize, StoreError>;

    /// Number of entries in the payload table.
    async fn payload_count(&self) -> Result<usize, StoreError>;

    /// Ids with a payload but no schedule entry: orphaned tasks plus tasks
    /// that are executing right now.
    async fn unscheduled_ids(&self) -> Result<Vec<TaskId>, StoreError>;
}
