//! # Key-Value Store Seam
//!
//! The handful of primitives the key-value repository needs, plus an
//! in-process implementation used by tests and dry runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{PersistenceError, Result};

// =============================================================================
// WRITE BATCH
// =============================================================================

/// Precondition on the key a batch operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    /// Key must not exist (`NX`).
    Absent,
    /// Key must exist (`XX`).
    Present,
}

impl Condition {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Always => "",
            Self::Absent => "NX",
            Self::Present => "XX",
        }
    }

    const fn holds(self, exists: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Absent => !exists,
            Self::Present => exists,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Set {
        key: String,
        value: String,
        condition: Condition,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
        condition: Condition,
    },
}

impl KvOp {
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Delete { key, .. } => key,
        }
    }

    pub const fn condition(&self) -> Condition {
        match self {
            Self::Set { condition, .. } | Self::Delete { condition, .. } => *condition,
        }
    }
}

/// Ordered operations applied all-or-nothing by [`KeyValueStore::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<KvOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        condition: Condition,
        ttl: Option<Duration>,
    ) -> &mut Self {
        self.ops.push(KvOp::Set {
            key: key.into(),
            value: value.into(),
            condition,
            ttl,
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<String>, condition: Condition) -> &mut Self {
        self.ops.push(KvOp::Delete {
            key: key.into(),
            condition,
        });
        self
    }

    pub fn ops(&self) -> &[KvOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Result of applying a [`WriteBatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Applied,
    /// Nothing was written; `index` is the first operation whose condition
    /// failed.
    Rejected { index: usize },
}

// =============================================================================
// STORE TRAIT
// =============================================================================

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Values for `keys` in order, fetched in one round trip.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Every key matching a glob `pattern` (`*` and `?`).
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set `key` to `token` unless it exists, expiring after `ttl`.
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only while it still holds `token`.
    async fn unlock(&self, key: &str, token: &str) -> Result<bool>;

    /// Check every condition, then apply every operation, atomically.
    async fn apply(&self, batch: &WriteBatch) -> Result<BatchOutcome>;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process [`KeyValueStore`]. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    data: Arc<Mutex<HashMap<String, Slot>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.data.lock().await.values().filter(|slot| slot.live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn live_value(data: &HashMap<String, Slot>, key: &str, now: Instant) -> Option<String> {
    data.get(key)
        .filter(|slot| slot.live(now))
        .map(|slot| slot.value.clone())
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self.data.lock().await;
        Ok(live_value(&data, key, Instant::now()))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let data = self.data.lock().await;
        let now = Instant::now();
        Ok(keys.iter().map(|key| live_value(&data, key, now)).collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut data = self.data.lock().await;
        let now = Instant::now();
        data.retain(|_, slot| slot.live(now));
        Ok(data
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut data = self.data.lock().await;
        let now = Instant::now();
        let current = match live_value(&data, key, now) {
            Some(raw) => raw.parse::<i64>().map_err(|err| {
                PersistenceError::Serialization(format!("{key} is not an integer: {err}"))
            })?,
            None => 0,
        };
        let next = current + 1;
        data.insert(key.to_string(), Slot::new(next.to_string(), None));
        Ok(next)
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut data = self.data.lock().await;
        if live_value(&data, key, Instant::now()).is_some() {
            return Ok(false);
        }
        data.insert(key.to_string(), Slot::new(token.to_string(), Some(ttl)));
        Ok(true)
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<bool> {
        let mut data = self.data.lock().await;
        if live_value(&data, key, Instant::now()).as_deref() == Some(token) {
            data.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn apply(&self, batch: &WriteBatch) -> Result<BatchOutcome> {
        let mut data = self.data.lock().await;
        let now = Instant::now();
        for (index, op) in batch.ops().iter().enumerate() {
            let exists = live_value(&data, op.key(), now).is_some();
            if !op.condition().holds(exists) {
                return Ok(BatchOutcome::Rejected { index });
            }
        }
        for op in batch.ops() {
            match op {
                KvOp::Set { key, value, ttl, .. } => {
                    data.insert(key.clone(), Slot::new(value.clone(), *ttl));
                }
                KvOp::Delete { key, .. } => {
                    data.remove(key);
                }
            }
        }
        Ok(BatchOutcome::Applied)
    }
}

/// Glob match supporting `*` (any run) and `?` (any one character).
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}
