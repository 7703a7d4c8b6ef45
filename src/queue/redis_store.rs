//! Redis-backed task store.
//!
//! # Layout
//!
//! - `{queue_name}:delayed`: sorted set, member = task id, score = due time
//! - `{queue_name}:tasks`: hash, field = task id, value = payload bytes
//!
//! # Atomicity
//!
//! Enqueue is a MULTI/EXEC pipeline over both keys. Claiming runs a Lua
//! script that reads the lowest due member and removes it in the same server
//! step, so competing processes polling the same queue never receive the same
//! id.

use std::collections::HashSet;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::error::StoreError;

use super::store::TaskStore;
use super::task::{QueueKeys, TaskId};

/// KEYS[1] = schedule index, ARGV[1] = now. Returns the claimed id or nil.
const CLAIM_DUE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
    return false
end
redis.call('ZREM', KEYS[1], ids[1])
return ids[1]
"#;

/// KEYS[1] = schedule index, KEYS[2] = payload table, ARGV[1] = id, ARGV[2] = due time.
const RESCHEDULE_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[2], ARGV[1]) == 0 then
    return 0
end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
return 1
"#;

/// Task store backed by a Redis sorted set and hash.
pub struct RedisTaskStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    keys: QueueKeys,
    claim_script: Script,
    reschedule_script: Script,
}

impl RedisTaskStore {
    /// Connects to Redis and binds the store to `queue_name`'s keys.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Connection` if the connection fails.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StoreError::Connection(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name))
    }

    /// Creates a store from an existing ConnectionManager.
    ///
    /// Useful when sharing a connection across several queues.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        Self {
            redis,
            keys: QueueKeys::new(queue_name),
            claim_script: Script::new(CLAIM_DUE_SCRIPT),
            reschedule_script: Script::new(RESCHEDULE_SCRIPT),
        }
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Deletes both keys of this queue.
    ///
    /// **Warning**: This permanently drops every scheduled and orphaned task.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic().del(&self.keys.schedule).del(&self.keys.payloads);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn schedule(&self, id: &TaskId, due_at: i64, payload: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zadd(&self.keys.schedule, id.as_str(), due_at)
            .hset(&self.keys.payloads, id.as_str(), payload);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    async fn claim_due(&self, now: i64) -> Result<Option<TaskId>, StoreError> {
        let mut conn = self.redis.clone();

        let claimed: Option<String> = self
            .claim_script
            .key(&self.keys.schedule)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;

        Ok(claimed.map(TaskId::from))
    }

    async fn read_payload(&self, id: &TaskId) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.redis.clone();
        let payload: Option<Vec<u8>> = conn.hget(&self.keys.payloads, id.as_str()).await?;
        Ok(payload)
    }

    async fn delete_payload(&self, id: &TaskId) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.hdel::<_, _, ()>(&self.keys.payloads, id.as_str()).await?;
        Ok(())
    }

    async fn reschedule(&self, id: &TaskId, due_at: i64) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();

        let added: i64 = self
            .reschedule_script
            .key(&self.keys.schedule)
            .key(&self.keys.payloads)
            .arg(id.as_str())
            .arg(due_at)
            .invoke_async(&mut conn)
            .await?;

        Ok(added == 1)
    }

    async fn pending_count(&self) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.zcard(&self.keys.schedule).await?;
        Ok(len)
    }

    async fn payload_count(&self) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.hlen(&self.keys.payloads).await?;
        Ok(len)
    }

    async fn unscheduled_ids(&self) -> Result<Vec<TaskId>, StoreError> {
        let mut conn = self.redis.clone();

        // Snapshot both structures in one transaction
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hkeys(&self.keys.payloads)
            .zrange(&self.keys.schedule, 0, -1);
        let (payload_ids, scheduled): (Vec<String>, Vec<String>) =
            pipe.query_async(&mut conn).await?;

        let scheduled: HashSet<String> = scheduled.into_iter().collect();
        let mut unscheduled: Vec<TaskId> = payload_ids
            .into_iter()
            .filter(|id| !scheduled.contains(id))
            .map(TaskId::from)
            .collect();
        unscheduled.sort();

        Ok(unscheduled)
    }
}
