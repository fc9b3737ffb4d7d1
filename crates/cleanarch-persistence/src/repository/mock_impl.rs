//! In-memory reference backend.
//!
//! Committed state is a copy-on-write map from external identifier to
//! entity. A session pins the map that was current when it began (an `Arc`
//! clone, not a deep copy) and stages its writes in an [`Overlay`]; commit
//! validates the overlay against the latest committed map, applies it to a
//! fresh copy and swaps that in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use cleanarch_domain::{
    DomainError, DomainResult, Entity, EntityKey, FieldValue, Filter, LimitOffset,
};

use super::fields::{
    assign_values, copy_fields, pinned_filter, update_fields, validate_filter, validate_values,
};
use super::lock::{SessionGuard, SessionLock};
use super::overlay::{Overlay, StagedWrite};
use super::traits::{Repository, RepositorySession};
use crate::sort::order_entities;

/// Surrogate identities are unique across every mock store in the process.
static NEXT_ID: AtomicI64 = AtomicI64::new(1);

fn next_id() -> i64 {
    NEXT_ID.fetch_add(1, Ordering::SeqCst)
}

type Snapshot<E> = Arc<HashMap<Uuid, E>>;

// =============================================================================
// MOCK STORE
// =============================================================================

/// Committed entities, shareable between repository instances.
#[derive(Debug, Clone)]
pub struct MockStore<E> {
    committed: Arc<RwLock<Snapshot<E>>>,
}

impl<E: Entity> MockStore<E> {
    pub fn new() -> Self {
        Self {
            committed: Arc::new(RwLock::new(Arc::new(HashMap::new()))),
        }
    }

    async fn snapshot(&self) -> Snapshot<E> {
        self.committed.read().await.clone()
    }

    /// Number of committed entities.
    pub async fn len(&self) -> usize {
        self.committed.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<E: Entity> Default for MockStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// MOCK REPOSITORY
// =============================================================================

/// Repository over a [`MockStore`]. Each instance has its own session lock.
#[derive(Debug)]
pub struct MockRepository<E> {
    store: MockStore<E>,
    lock: SessionLock,
}

impl<E: Entity> MockRepository<E> {
    /// Repository over a fresh, empty store.
    pub fn new() -> Self {
        Self::with_store(MockStore::new())
    }

    /// Repository over an existing store, e.g. one shared with another
    /// instance.
    pub fn with_store(store: MockStore<E>) -> Self {
        Self {
            store,
            lock: SessionLock::new(E::NAME),
        }
    }

    pub fn store(&self) -> &MockStore<E> {
        &self.store
    }

    async fn open(&self, guard: SessionGuard) -> MockSession<E> {
        let snapshot = self.store.snapshot().await;
        tracing::debug!(entity = E::NAME, committed = snapshot.len(), "mock session opened");
        MockSession {
            store: self.store.clone(),
            snapshot,
            overlay: Overlay::new(),
            _guard: guard,
        }
    }
}

impl<E: Entity> Default for MockRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for MockRepository<E> {
    type Session = MockSession<E>;

    async fn begin(&self) -> DomainResult<MockSession<E>> {
        let guard = self.lock.try_acquire()?;
        Ok(self.open(guard).await)
    }

    async fn begin_timeout(&self, timeout: Duration) -> DomainResult<MockSession<E>> {
        let guard = self.lock.acquire_timeout(timeout).await?;
        Ok(self.open(guard).await)
    }
}

// =============================================================================
// MOCK SESSION
// =============================================================================

/// Unit of work over a [`MockRepository`].
pub struct MockSession<E: Entity> {
    store: MockStore<E>,
    snapshot: Snapshot<E>,
    overlay: Overlay<E>,
    _guard: SessionGuard,
}

impl<E: Entity> MockSession<E> {
    fn committed(&self, uuid: &Uuid) -> Option<E> {
        self.snapshot.get(uuid).cloned()
    }

    fn visible(&self, uuid: &Uuid) -> Option<E> {
        match self.overlay.lookup(uuid) {
            Some(staged) => staged.cloned(),
            None => self.committed(uuid),
        }
    }

    fn visible_by_id(&self, id: i64) -> Option<E> {
        match self.overlay.lookup_id(id) {
            Some(staged) => staged.cloned(),
            None => self
                .snapshot
                .values()
                .find(|entity| entity.id() == Some(id))
                .cloned(),
        }
    }

    /// Session view restricted to `filter`, unordered.
    fn matching(&self, filter: Option<&Filter>) -> Vec<E> {
        let mut view = self.overlay.merge(self.snapshot.values().cloned());
        if let Some(filter) = filter {
            view.retain(|entity| filter.matches(entity));
        }
        view
    }

    fn ordered(&self, filter: Option<&Filter>) -> Vec<E> {
        let mut items = self.matching(filter);
        let keys = filter.map(Filter::order_keys).unwrap_or_default();
        order_entities(&mut items, &keys);
        items
    }
}

#[async_trait]
impl<E: Entity> RepositorySession<E> for MockSession<E> {
    async fn get(&self, key: EntityKey) -> DomainResult<Option<E>> {
        match key {
            EntityKey::Id(id) => Ok(self.visible_by_id(id)),
            EntityKey::Uuid(uuid) => Ok(self.visible(&uuid)),
            EntityKey::Key(key) => {
                let filter = E::filter_for_key(&key)?;
                filter.validate::<E>()?;
                Ok(self.ordered(Some(&filter)).into_iter().next())
            }
        }
    }

    async fn list(&self, page: LimitOffset, filter: Option<&Filter>) -> DomainResult<Vec<E>> {
        validate_filter::<E>(filter)?;
        Ok(page.paginate(self.ordered(filter)))
    }

    async fn count(&self, filter: Option<&Filter>) -> DomainResult<u64> {
        validate_filter::<E>(filter)?;
        Ok(self.matching(filter).len() as u64)
    }

    async fn add(&mut self, mut entity: E) -> DomainResult<E> {
        let uuid = entity.uuid();
        if self.visible(&uuid).is_some() {
            return Err(DomainError::already_exists(E::NAME, uuid));
        }
        entity.set_id(next_id());
        let committed = self.committed(&uuid);
        self.overlay.stage(entity.clone(), committed);
        tracing::debug!(entity = E::NAME, key = %uuid, id = ?entity.id(), "staged add");
        Ok(entity)
    }

    async fn update(
        &mut self,
        entity: &E,
        filter: Option<&Filter>,
        fields: Option<&[&str]>,
    ) -> DomainResult<u64> {
        let fields = update_fields::<E>(fields)?;
        validate_filter::<E>(filter)?;
        let uuid = entity.uuid();
        let Some(current) = self.visible(&uuid) else {
            return Ok(0);
        };
        let Some(pinned) = pinned_filter(entity, filter) else {
            return Ok(0);
        };
        if !pinned.matches(&current) {
            return Ok(0);
        }
        let mut next = current;
        copy_fields(&mut next, entity, &fields)?;
        let committed = self.committed(&uuid);
        self.overlay.stage(next, committed);
        Ok(1)
    }

    async fn update_by_filter(
        &mut self,
        filter: &Filter,
        values: &[(&str, FieldValue)],
    ) -> DomainResult<u64> {
        filter.validate::<E>()?;
        validate_values::<E>(values)?;
        let matched = self.matching(Some(filter));
        let count = matched.len() as u64;
        for mut entity in matched {
            assign_values(&mut entity, values)?;
            let committed = self.committed(&entity.uuid());
            self.overlay.stage(entity, committed);
        }
        tracing::debug!(entity = E::NAME, count, "staged bulk update");
        Ok(count)
    }

    async fn remove(&mut self, filter: &Filter) -> DomainResult<u64> {
        filter.validate::<E>()?;
        let matched = self.matching(Some(filter));
        let count = matched.len() as u64;
        for entity in matched {
            self.overlay.remove(entity);
        }
        tracing::debug!(entity = E::NAME, count, "staged remove");
        Ok(count)
    }

    async fn commit(&mut self) -> DomainResult<()> {
        let mut committed = self.store.committed.write().await;
        let writes = self.overlay.writes();

        for write in &writes {
            match write {
                StagedWrite::Insert(entity) if committed.contains_key(&entity.uuid()) => {
                    return Err(DomainError::already_exists(E::NAME, entity.uuid()));
                }
                StagedWrite::Replace { previous, .. } | StagedWrite::Delete(previous)
                    if !committed.contains_key(&previous.uuid()) =>
                {
                    return Err(DomainError::concurrency(
                        E::NAME,
                        format!("{} was removed by another session", previous.uuid()),
                    ));
                }
                _ => {}
            }
        }

        let mut next = HashMap::clone(&committed);
        for write in &writes {
            match write {
                StagedWrite::Insert(entity) | StagedWrite::Replace { current: entity, .. } => {
                    next.insert(entity.uuid(), (*entity).clone());
                }
                StagedWrite::Delete(entity) => {
                    next.remove(&entity.uuid());
                }
            }
        }
        let applied = writes.len();
        drop(writes);

        *committed = Arc::new(next);
        self.snapshot = Arc::clone(&committed);
        drop(committed);
        self.overlay.clear();
        tracing::debug!(entity = E::NAME, writes = applied, "mock session committed");
        Ok(())
    }
}

impl<E: Entity> Drop for MockSession<E> {
    fn drop(&mut self) {
        if !self.overlay.is_empty() {
            tracing::debug!(entity = E::NAME, "mock session discarded uncommitted writes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{conformance_suite, Item};

    async fn repository() -> MockRepository<Item> {
        MockRepository::new()
    }

    conformance_suite!(repository);

    #[tokio::test]
    async fn test_instances_share_committed_store() {
        let first = MockRepository::<Item>::new();
        let second = MockRepository::with_store(first.store().clone());

        let mut session = first.begin().await.unwrap();
        let added = session.add(Item::named("shared", 1)).await.unwrap();
        session.commit().await.unwrap();

        // different instances do not contend for the same session lock
        let other = second.begin().await.unwrap();
        assert_eq!(other.get(added.uuid.into()).await.unwrap(), Some(added));
        assert_eq!(first.store().len().await, 1);
    }

    #[tokio::test]
    async fn test_session_reads_its_start_snapshot() {
        let first = MockRepository::<Item>::new();
        let second = MockRepository::with_store(first.store().clone());

        let reader = second.begin().await.unwrap();
        let mut writer = first.begin().await.unwrap();
        writer.add(Item::named("late", 1)).await.unwrap();
        writer.commit().await.unwrap();

        assert_eq!(reader.count(None).await.unwrap(), 0);
        drop(reader);
        let reader = second.begin().await.unwrap();
        assert_eq!(reader.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_insert_fails_at_commit() {
        let first = MockRepository::<Item>::new();
        let second = MockRepository::with_store(first.store().clone());
        let item = Item::named("twin", 1);

        let mut a = first.begin().await.unwrap();
        let mut b = second.begin().await.unwrap();
        a.add(item.clone()).await.unwrap();
        b.add(item.clone()).await.unwrap();
        a.commit().await.unwrap();
        assert!(matches!(
            b.commit().await,
            Err(DomainError::AlreadyExists { .. })
        ));
        assert_eq!(first.store().len().await, 1);
    }

    #[tokio::test]
    async fn test_update_of_concurrently_removed_entity_fails_at_commit() {
        let first = MockRepository::<Item>::new();
        let second = MockRepository::with_store(first.store().clone());

        let mut seed = first.begin().await.unwrap();
        let stored = seed.add(Item::named("doomed", 1)).await.unwrap();
        seed.commit().await.unwrap();
        drop(seed);

        let mut a = first.begin().await.unwrap();
        let mut b = second.begin().await.unwrap();
        a.remove(&Filter::by_uuid(stored.uuid)).await.unwrap();
        a.commit().await.unwrap();

        let mut renamed = stored.clone();
        renamed.name = "saved".into();
        assert_eq!(b.update(&renamed, None, None).await.unwrap(), 1);
        assert!(matches!(
            b.commit().await,
            Err(DomainError::ConcurrencyViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_returned_entities_are_copies() {
        let repo = MockRepository::<Item>::new();
        let mut session = repo.begin().await.unwrap();
        session.add(Item::named("original", 1)).await.unwrap();
        session.commit().await.unwrap();

        let mut listed = session.list(LimitOffset::default(), None).await.unwrap();
        listed[0].name = "mutated".into();
        let again = session.list(LimitOffset::default(), None).await.unwrap();
        assert_eq!(again[0].name, "original");
    }

    #[tokio::test]
    async fn test_identity_counter_survives_sessions() {
        let repo = MockRepository::<Item>::new();
        let mut session = repo.begin().await.unwrap();
        let first = session.add(Item::named("a", 1)).await.unwrap();
        drop(session);

        let mut session = repo.begin().await.unwrap();
        let second = session.add(Item::named("b", 2)).await.unwrap();
        assert!(second.id > first.id);
    }
}
