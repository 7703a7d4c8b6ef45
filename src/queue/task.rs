//! Task identity, due-time arithmetic and the persisted key layout.
//!
//! A queue instance owns two Redis structures that share its name as prefix:
//!
//! - `{queue_name}:delayed`: sorted set of task ids scored by due time
//! - `{queue_name}:tasks`: hash of task id to payload bytes

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique identifier of a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a fresh random (v4 UUID) identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A unit of scheduled work as recorded at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,
    /// Serialized payload bytes.
    pub payload: Vec<u8>,
    /// Unix timestamp (seconds) at which the task becomes claimable.
    pub due_at: i64,
}

impl Task {
    /// Creates a task with a freshly generated id.
    pub fn new(payload: Vec<u8>, due_at: i64) -> Self {
        Self {
            id: TaskId::generate(),
            payload,
            due_at,
        }
    }
}

/// Redis keys used by one queue instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    /// Sorted set: task id scored by due time.
    pub schedule: String,
    /// Hash: task id to payload bytes.
    pub payloads: String,
}

impl QueueKeys {
    pub fn new(queue_name: &str) -> Self {
        Self {
            schedule: format!("{}:delayed", queue_name),
            payloads: format!("{}:tasks", queue_name),
        }
    }
}

/// Current Unix time in whole seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Due time for a task enqueued at `now` with the given delay.
///
/// Truncated to whole seconds, the same resolution as [`unix_now`], so a
/// zero-delay task is claimable within the second it was added.
pub fn due_at(now: DateTime<Utc>, delay: Duration) -> i64 {
    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    now.timestamp_millis()
        .saturating_add(delay_ms)
        .div_euclid(1000)
}
