//! # Clean Architecture - Persistence Library
//!
//! Storage-agnostic repository / unit-of-work layer with three backends.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Application Layer                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Repository<E>::begin() -> RepositorySession<E>      │
//! │     get / list / count / add / update / remove / commit      │
//! └─────────────────────────────────────────────────────────────┘
//!            │                      │                     │
//!            ▼                      ▼                     ▼
//! ┌──────────────────┐  ┌───────────────────────┐  ┌──────────────────┐
//! │  MockRepository  │  │     KvRepository      │  │  SqlRepository   │
//! │ snapshot+overlay │  │ overlay + batch (Lua) │  │ native txn       │
//! └──────────────────┘  └───────────────────────┘  └──────────────────┘
//!                                  │                       │
//!                                  ▼                       ▼
//!                       ┌─────────────────────┐   ┌──────────────────┐
//!                       │ Redis / MemoryKv    │   │     SQLite       │
//!                       └─────────────────────┘   └──────────────────┘
//! ```
//!
//! Every backend has the same observable semantics: one open session per
//! repository instance, writes invisible to other sessions until
//! `commit`, a dropped session discards its writes, ascending surrogate
//! identity as the default order, ordering before pagination.
//!
//! ## Features
//!
//! - `redis`: Enable the Redis key-value store (default)
//! - `sqlite`: Enable the SQLite backend (default)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cleanarch_persistence::{MockRepository, Repository, RepositorySession};
//! use cleanarch_domain::{Filter, LimitOffset};
//!
//! let repo = MockRepository::<Product>::new();
//! let mut session = repo.begin().await?;
//! session.add(product).await?;
//! session.commit().await?;
//!
//! let cheap = Filter::new().eq("in_stock", true).order_by("price,-name");
//! let page = session.list(LimitOffset::new(10, 0), Some(&cheap)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod kv;
pub mod repository;
pub mod sort;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use error::{PersistenceError, Result};
#[cfg(feature = "redis")]
pub use kv::RedisStore;
pub use kv::{KeyValueStore, KvConfig, MemoryKvStore};
pub use repository::{
    KvRepository, KvSession, MockRepository, MockSession, MockStore, Repository,
    RepositorySession,
};
#[cfg(feature = "sqlite")]
pub use repository::{
    QueryScope, SqlClient, SqlConfig, SqlContextQuery, SqlQuery, SqlRepository, SqlSession,
};
pub use sort::{multikey_sort, order_entities, sort_by_identity};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
