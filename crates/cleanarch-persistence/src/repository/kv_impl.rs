//! Key-value repository implementation.
//!
//! One serialized record per external identifier plus a surrogate identity
//! index. A session stages writes in an [`Overlay`] and commit applies them
//! as one conditional [`WriteBatch`]: new records must be absent, replaced
//! or removed records must still be present, and nothing is written unless
//! every condition holds.
//!
//! Reads scan every record key of the namespace and filter in process, so
//! `list`, `count` and string-key `get` cost O(total records). A scan is
//! not a point-in-time snapshot across keys.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
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
use crate::error::PersistenceError;
use crate::kv::{BatchOutcome, Condition, KeySpace, KeyValueStore, KvConfig, MemoryKvStore, WriteBatch};
use crate::sort::order_entities;

/// Pause between attempts on the identity counter lock.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

// =============================================================================
// SETTINGS
// =============================================================================

#[derive(Debug, Clone)]
struct KvSettings {
    keys: KeySpace,
    ttl: Option<Duration>,
    lock_timeout: Duration,
    lock_ttl: Duration,
}

impl KvSettings {
    fn new<E: Entity>(config: &KvConfig) -> Self {
        Self {
            keys: KeySpace::new(config.prefix.as_deref().unwrap_or(E::COLLECTION)),
            ttl: config.ttl,
            lock_timeout: config.lock_timeout,
            lock_ttl: config.lock_ttl,
        }
    }
}

// =============================================================================
// KEY-VALUE REPOSITORY
// =============================================================================

/// Repository over any [`KeyValueStore`].
pub struct KvRepository<E, S> {
    store: Arc<S>,
    settings: KvSettings,
    lock: SessionLock,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity, S: KeyValueStore> KvRepository<E, S> {
    pub fn new(store: Arc<S>, config: &KvConfig) -> Self {
        Self {
            store,
            settings: KvSettings::new::<E>(config),
            lock: SessionLock::new(E::NAME),
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn keys(&self) -> &KeySpace {
        &self.settings.keys
    }

    fn open(&self, guard: SessionGuard) -> KvSession<E, S> {
        tracing::debug!(entity = E::NAME, prefix = self.settings.keys.prefix(), "kv session opened");
        KvSession {
            store: Arc::clone(&self.store),
            settings: self.settings.clone(),
            overlay: Overlay::new(),
            _guard: guard,
        }
    }
}

impl<E: Entity> KvRepository<E, MemoryKvStore> {
    /// Repository over a fresh in-process store.
    pub fn in_memory(config: &KvConfig) -> Self {
        Self::new(Arc::new(MemoryKvStore::new()), config)
    }
}

#[cfg(feature = "redis")]
impl<E: Entity> KvRepository<E, crate::kv::RedisStore> {
    /// Connect to redis at `config.url`.
    pub async fn connect(config: &KvConfig) -> crate::error::Result<Self> {
        let store = crate::kv::RedisStore::connect(config).await?;
        Ok(Self::new(Arc::new(store), config))
    }
}

impl<E, S> std::fmt::Debug for KvRepository<E, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvRepository")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E: Entity, S: KeyValueStore + 'static> Repository<E> for KvRepository<E, S> {
    type Session = KvSession<E, S>;

    async fn begin(&self) -> DomainResult<KvSession<E, S>> {
        let guard = self.lock.try_acquire()?;
        Ok(self.open(guard))
    }

    async fn begin_timeout(&self, timeout: Duration) -> DomainResult<KvSession<E, S>> {
        let guard = self.lock.acquire_timeout(timeout).await?;
        Ok(self.open(guard))
    }
}

// =============================================================================
// KEY-VALUE SESSION
// =============================================================================

/// Unit of work over a [`KvRepository`].
pub struct KvSession<E: Entity, S> {
    store: Arc<S>,
    settings: KvSettings,
    overlay: Overlay<E>,
    _guard: SessionGuard,
}

impl<E: Entity, S: KeyValueStore> KvSession<E, S> {
    fn decode(key: &str, raw: &str) -> DomainResult<E> {
        serde_json::from_str(raw).map_err(|err| DomainError::Corrupted {
            entity_type: E::NAME,
            key: key.to_string(),
            message: err.to_string(),
        })
    }

    fn encode(entity: &E) -> DomainResult<String> {
        Ok(serde_json::to_string(entity).map_err(PersistenceError::from)?)
    }

    async fn committed(&self, uuid: &Uuid) -> DomainResult<Option<E>> {
        let key = self.settings.keys.record(uuid);
        match self.store.get(&key).await? {
            Some(raw) => Self::decode(&key, &raw).map(Some),
            None => Ok(None),
        }
    }

    async fn committed_by_id(&self, id: i64) -> DomainResult<Option<E>> {
        let index = self.settings.keys.index(id);
        let Some(raw) = self.store.get(&index).await? else {
            return Ok(None);
        };
        let uuid = Uuid::parse_str(&raw).map_err(|err| DomainError::Corrupted {
            entity_type: E::NAME,
            key: index,
            message: err.to_string(),
        })?;
        Ok(self
            .committed(&uuid)
            .await?
            .filter(|entity| entity.id() == Some(id)))
    }

    async fn committed_all(&self) -> DomainResult<Vec<E>> {
        let keys = self.store.scan(&self.settings.keys.records()).await?;
        let values = self.store.mget(&keys).await?;
        keys.iter()
            .zip(values)
            // keys can vanish between scan and fetch
            .filter_map(|(key, raw)| raw.map(|raw| Self::decode(key, &raw)))
            .collect()
    }

    async fn visible(&self, uuid: &Uuid) -> DomainResult<Option<E>> {
        match self.overlay.lookup(uuid) {
            Some(staged) => Ok(staged.cloned()),
            None => self.committed(uuid).await,
        }
    }

    async fn visible_by_id(&self, id: i64) -> DomainResult<Option<E>> {
        match self.overlay.lookup_id(id) {
            Some(staged) => Ok(staged.cloned()),
            None => self.committed_by_id(id).await,
        }
    }

    async fn matching(&self, filter: Option<&Filter>) -> DomainResult<Vec<E>> {
        let mut view = self.overlay.merge(self.committed_all().await?);
        if let Some(filter) = filter {
            view.retain(|entity| filter.matches(entity));
        }
        Ok(view)
    }

    async fn ordered(&self, filter: Option<&Filter>) -> DomainResult<Vec<E>> {
        let mut items = self.matching(filter).await?;
        let keys = filter.map(Filter::order_keys).unwrap_or_default();
        order_entities(&mut items, &keys);
        Ok(items)
    }

    /// Next surrogate identity from the shared counter, under the counter
    /// lock.
    async fn allocate_id(&self) -> DomainResult<i64> {
        let lock_key = self.settings.keys.sequence_lock();
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.settings.lock_timeout;

        while !self
            .store
            .try_lock(&lock_key, &token, self.settings.lock_ttl)
            .await?
        {
            if Instant::now() >= deadline {
                tracing::warn!(entity = E::NAME, key = %lock_key, "identity lock wait timed out");
                return Err(PersistenceError::LockTimeout {
                    key: lock_key,
                    timeout_ms: u64::try_from(self.settings.lock_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                }
                .into());
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }

        let id = self.store.incr(&self.settings.keys.sequence()).await;
        match self.store.unlock(&lock_key, &token).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(entity = E::NAME, key = %lock_key, "identity lock expired before release"),
            Err(err) => tracing::warn!(entity = E::NAME, key = %lock_key, error = %err, "identity lock release failed"),
        }
        Ok(id?)
    }

    /// Conditional batch for the staged writes, with the external
    /// identifier each operation belongs to.
    fn batch(&self) -> DomainResult<(WriteBatch, Vec<Uuid>)> {
        let keys = &self.settings.keys;
        let ttl = self.settings.ttl;
        let mut batch = WriteBatch::new();
        let mut owners = Vec::new();

        for write in self.overlay.writes() {
            let before = batch.len();
            match write {
                StagedWrite::Insert(entity) => {
                    batch.set(keys.record(&entity.uuid()), Self::encode(entity)?, Condition::Absent, ttl);
                    if let Some(id) = entity.id() {
                        batch.set(keys.index(id), entity.uuid().to_string(), Condition::Always, ttl);
                    }
                }
                StagedWrite::Replace { previous, current } => {
                    batch.set(keys.record(&current.uuid()), Self::encode(current)?, Condition::Present, ttl);
                    if let Some(id) = previous.id().filter(|id| current.id() != Some(*id)) {
                        batch.delete(keys.index(id), Condition::Always);
                    }
                    if let Some(id) = current.id() {
                        batch.set(keys.index(id), current.uuid().to_string(), Condition::Always, ttl);
                    }
                }
                StagedWrite::Delete(previous) => {
                    batch.delete(keys.record(&previous.uuid()), Condition::Present);
                    if let Some(id) = previous.id() {
                        batch.delete(keys.index(id), Condition::Always);
                    }
                }
            }
            let uuid = match write {
                StagedWrite::Insert(entity) | StagedWrite::Replace { current: entity, .. } => entity.uuid(),
                StagedWrite::Delete(entity) => entity.uuid(),
            };
            owners.resize(owners.len() + batch.len() - before, uuid);
        }
        Ok((batch, owners))
    }
}

#[async_trait]
impl<E: Entity, S: KeyValueStore + 'static> RepositorySession<E> for KvSession<E, S> {
    async fn get(&self, key: EntityKey) -> DomainResult<Option<E>> {
        match key {
            EntityKey::Id(id) => self.visible_by_id(id).await,
            EntityKey::Uuid(uuid) => self.visible(&uuid).await,
            EntityKey::Key(key) => {
                let filter = E::filter_for_key(&key)?;
                filter.validate::<E>()?;
                Ok(self.ordered(Some(&filter)).await?.into_iter().next())
            }
        }
    }

    async fn list(&self, page: LimitOffset, filter: Option<&Filter>) -> DomainResult<Vec<E>> {
        validate_filter::<E>(filter)?;
        Ok(page.paginate(self.ordered(filter).await?))
    }

    async fn count(&self, filter: Option<&Filter>) -> DomainResult<u64> {
        validate_filter::<E>(filter)?;
        Ok(self.matching(filter).await?.len() as u64)
    }

    async fn add(&mut self, mut entity: E) -> DomainResult<E> {
        let uuid = entity.uuid();
        let taken = match self.overlay.lookup(&uuid) {
            Some(staged) => staged.is_some(),
            None => self.store.exists(&self.settings.keys.record(&uuid)).await?,
        };
        if taken {
            return Err(DomainError::already_exists(E::NAME, uuid));
        }
        entity.set_id(self.allocate_id().await?);
        self.overlay.stage(entity.clone(), None);
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
        let Some(current) = self.visible(&uuid).await? else {
            return Ok(0);
        };
        let Some(pinned) = pinned_filter(entity, filter) else {
            return Ok(0);
        };
        if !pinned.matches(&current) {
            return Ok(0);
        }
        let committed = self.committed(&uuid).await?;
        let mut next = current;
        copy_fields(&mut next, entity, &fields)?;
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
        let committed: std::collections::HashMap<Uuid, E> = self
            .committed_all()
            .await?
            .into_iter()
            .map(|entity| (entity.uuid(), entity))
            .collect();
        let mut matched = self.overlay.merge(committed.values().cloned());
        matched.retain(|entity| filter.matches(entity));
        let count = matched.len() as u64;
        for mut entity in matched {
            assign_values(&mut entity, values)?;
            let previous = committed.get(&entity.uuid()).cloned();
            self.overlay.stage(entity, previous);
        }
        tracing::debug!(entity = E::NAME, count, "staged bulk update");
        Ok(count)
    }

    async fn remove(&mut self, filter: &Filter) -> DomainResult<u64> {
        filter.validate::<E>()?;
        let matched = self.matching(Some(filter)).await?;
        let count = matched.len() as u64;
        for entity in matched {
            self.overlay.remove(entity);
        }
        tracing::debug!(entity = E::NAME, count, "staged remove");
        Ok(count)
    }

    async fn commit(&mut self) -> DomainResult<()> {
        let (batch, owners) = self.batch()?;
        if !batch.is_empty() {
            match self.store.apply(&batch).await? {
                BatchOutcome::Applied => {}
                BatchOutcome::Rejected { index } => {
                    let uuid = owners.get(index).copied().unwrap_or_default();
                    let condition = batch.ops().get(index).map(|op| op.condition());
                    tracing::warn!(entity = E::NAME, key = %uuid, "kv commit rejected");
                    return Err(match condition {
                        Some(Condition::Absent) => DomainError::already_exists(E::NAME, uuid),
                        _ => DomainError::concurrency(
                            E::NAME,
                            format!("{uuid} was changed or removed by another writer"),
                        ),
                    });
                }
            }
        }
        self.overlay.clear();
        tracing::debug!(entity = E::NAME, ops = batch.len(), "kv session committed");
        Ok(())
    }
}

impl<E: Entity, S> Drop for KvSession<E, S> {
    fn drop(&mut self) {
        if !self.overlay.is_empty() {
            tracing::debug!(entity = E::NAME, "kv session discarded uncommitted writes");
        }
    }
}
