//! # Repository Traits
//!
//! Abstract repository interfaces for any entity type.
//! Implementations can be swapped for different backends (mock, Redis, SQLite).
//!
//! A [`Repository`] only opens sessions. Every read and write goes through
//! the [`RepositorySession`] it returns, so writes outside a session cannot
//! be expressed. Dropping a session without [`RepositorySession::commit`]
//! discards everything it wrote and releases the repository for the next
//! session.

use std::time::Duration;

use async_trait::async_trait;

use cleanarch_domain::{
    DomainError, DomainResult, Entity, EntityKey, FieldValue, Filter, LimitOffset,
};

// =============================================================================
// REPOSITORY
// =============================================================================

/// Entry point of a backend: hands out one session at a time.
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    type Session: RepositorySession<E>;

    /// Open a session.
    ///
    /// Fails fast with `ConcurrencyViolation` if a session is already open
    /// on this instance.
    async fn begin(&self) -> DomainResult<Self::Session>;

    /// Open a session, waiting up to `timeout` for the current one to end.
    ///
    /// Fails with `ResourceBusy` once `timeout` elapses.
    async fn begin_timeout(&self, timeout: Duration) -> DomainResult<Self::Session>;
}

// =============================================================================
// SESSION (UNIT OF WORK)
// =============================================================================

/// Scoped unit of work over one repository.
#[async_trait]
pub trait RepositorySession<E: Entity>: Send + Sync {
    /// Get entity by surrogate id, external identifier or lookup key.
    ///
    /// Absence is `Ok(None)`, never an error.
    async fn get(&self, key: EntityKey) -> DomainResult<Option<E>>;

    /// Filtered, ordered, paginated entities.
    async fn list(&self, page: LimitOffset, filter: Option<&Filter>) -> DomainResult<Vec<E>>;

    /// Number of entities matching `filter`.
    async fn count(&self, filter: Option<&Filter>) -> DomainResult<u64>;

    /// Assign identity and stage the entity.
    ///
    /// Fails with `AlreadyExists` when the external identifier is taken.
    async fn add(&mut self, entity: E) -> DomainResult<E>;

    /// Replace `fields` (default: every non-identity field) of the stored
    /// entity with the same external identifier, optionally constrained by
    /// `filter`. Returns the number of affected entities (0 or 1).
    async fn update(
        &mut self,
        entity: &E,
        filter: Option<&Filter>,
        fields: Option<&[&str]>,
    ) -> DomainResult<u64>;

    /// Set each listed field on every entity matching `filter`.
    async fn update_by_filter(
        &mut self,
        filter: &Filter,
        values: &[(&str, FieldValue)],
    ) -> DomainResult<u64>;

    /// Delete every entity matching `filter`.
    async fn remove(&mut self, filter: &Filter) -> DomainResult<u64>;

    /// Make every write of this session visible to later sessions.
    async fn commit(&mut self) -> DomainResult<()>;

    /// Like [`RepositorySession::get`] but absence is `NotFound`.
    async fn get_required(&self, key: EntityKey) -> DomainResult<E> {
        let label = key.to_string();
        self.get(key)
            .await?
            .ok_or_else(|| DomainError::not_found(E::NAME, label))
    }

    async fn exists(&self, key: EntityKey) -> DomainResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
