//! # Repository Module
//!
//! Repository and unit-of-work implementations for any [`Entity`].
//!
//! [`Entity`]: cleanarch_domain::Entity

mod fields;
mod lock;
mod overlay;

pub mod kv_impl;
pub mod mock_impl;
#[cfg(feature = "sqlite")]
pub mod sql_impl;
#[cfg(feature = "sqlite")]
pub mod sql_query;
pub mod traits;

pub use kv_impl::{KvRepository, KvSession};
pub use mock_impl::{MockRepository, MockSession, MockStore};
#[cfg(feature = "sqlite")]
pub use sql_impl::{SqlClient, SqlConfig, SqlRepository, SqlSession};
#[cfg(feature = "sqlite")]
pub use sql_query::{QueryScope, SqlContextQuery, SqlQuery};
pub use traits::{Repository, RepositorySession};
