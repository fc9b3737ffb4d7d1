//! # Key-Value Module
//!
//! Store primitives behind the key-value repository.

pub mod config;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;

pub use config::{KeySpace, KvConfig};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use store::{BatchOutcome, Condition, KeyValueStore, KvOp, MemoryKvStore, WriteBatch};
