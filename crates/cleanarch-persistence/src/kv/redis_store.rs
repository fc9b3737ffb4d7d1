//! # Redis Store
//!
//! [`KeyValueStore`] over a redis `ConnectionManager`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use super::config::KvConfig;
use super::store::{BatchOutcome, KeyValueStore, KvOp, WriteBatch};
use crate::error::Result;

/// Keys fetched per `SCAN` step.
const SCAN_COUNT: usize = 500;

/// Release a lock only while it still holds the caller's token.
const UNLOCK_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Apply a batch all-or-nothing.
///
/// ARGV carries four entries per key: op (`set`/`del`), condition
/// (`NX`/`XX`/empty), value, ttl in milliseconds (0 = none). Returns 0 when
/// applied, otherwise the 1-based index of the first failed condition.
const APPLY_SCRIPT: &str = r"
for i = 1, #KEYS do
    local condition = ARGV[(i - 1) * 4 + 2]
    local exists = redis.call('EXISTS', KEYS[i]) == 1
    if (condition == 'NX' and exists) or (condition == 'XX' and not exists) then
        return i
    end
end
for i = 1, #KEYS do
    local base = (i - 1) * 4
    if ARGV[base + 1] == 'set' then
        local ttl = tonumber(ARGV[base + 4])
        if ttl > 0 then
            redis.call('SET', KEYS[i], ARGV[base + 3], 'PX', ttl)
        else
            redis.call('SET', KEYS[i], ARGV[base + 3])
        end
    else
        redis.call('DEL', KEYS[i])
    end
end
return 0
";

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Redis store with a multiplexed, auto-reconnecting connection
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    apply: Arc<Script>,
    unlock: Arc<Script>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `config.url`
    pub async fn connect(config: &KvConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(url = %config.url, "connected to redis");

        Ok(Self {
            conn,
            apply: Arc::new(Script::new(APPLY_SCRIPT)),
            unlock: Arc::new(Script::new(UNLOCK_SCRIPT)),
        })
    }

    /// Get raw connection for advanced operations
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(key);
        }
        let values: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        Ok(values)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may report a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1i64).await?;
        Ok(value)
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl).max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .unlock
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn apply(&self, batch: &WriteBatch) -> Result<BatchOutcome> {
        if batch.is_empty() {
            return Ok(BatchOutcome::Applied);
        }
        let mut invocation = self.apply.prepare_invoke();
        for op in batch.ops() {
            invocation.key(op.key());
            match op {
                KvOp::Set {
                    value,
                    condition,
                    ttl,
                    ..
                } => {
                    invocation
                        .arg("set")
                        .arg(condition.as_str())
                        .arg(value.as_str())
                        .arg(ttl.map_or(0, millis));
                }
                KvOp::Delete { condition, .. } => {
                    invocation
                        .arg("del")
                        .arg(condition.as_str())
                        .arg("")
                        .arg(0u64);
                }
            }
        }

        let mut conn = self.conn.clone();
        let failed: usize = invocation.invoke_async(&mut conn).await?;
        Ok(match failed {
            0 => BatchOutcome::Applied,
            index => BatchOutcome::Rejected { index: index - 1 },
        })
    }
}
