//! Session-local write overlay for backends without native transactions.
//!
//! Each touched external identifier records the committed version seen when
//! the session first touched it and the staged version (`None` once
//! removed). Reads merge the overlay over committed state; commit turns it
//! into inserts, replacements and deletions.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use uuid::Uuid;

use cleanarch_domain::Entity;

#[derive(Debug, Clone)]
struct Staged<E> {
    committed: Option<E>,
    current: Option<E>,
}

/// One write derived from the overlay at commit time.
#[derive(Debug)]
pub(crate) enum StagedWrite<'a, E> {
    /// Entity not present in committed state when staged.
    Insert(&'a E),
    /// Committed entity replaced by a new version.
    Replace { previous: &'a E, current: &'a E },
    /// Committed entity removed.
    Delete(&'a E),
}

#[derive(Debug, Clone)]
pub(crate) struct Overlay<E> {
    staged: HashMap<Uuid, Staged<E>>,
}

impl<E: Entity> Overlay<E> {
    pub(crate) fn new() -> Self {
        Self {
            staged: HashMap::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.staged.clear();
    }

    /// `Some(Some(_))` staged version, `Some(None)` removed in this session,
    /// `None` untouched.
    pub(crate) fn lookup(&self, uuid: &Uuid) -> Option<Option<&E>> {
        self.staged.get(uuid).map(|staged| staged.current.as_ref())
    }

    /// Same as [`Overlay::lookup`] keyed by surrogate identity.
    pub(crate) fn lookup_id(&self, id: i64) -> Option<Option<&E>> {
        for staged in self.staged.values() {
            if let Some(current) = &staged.current {
                if current.id() == Some(id) {
                    return Some(Some(current));
                }
            }
        }
        let shadowed = self.staged.values().any(|staged| {
            staged
                .committed
                .as_ref()
                .is_some_and(|committed| committed.id() == Some(id))
        });
        shadowed.then_some(None)
    }

    /// Stage a new version of `entity`; `committed` is the version currently
    /// visible outside the session, recorded on first touch only.
    pub(crate) fn stage(&mut self, entity: E, committed: Option<E>) {
        match self.staged.entry(entity.uuid()) {
            Entry::Occupied(mut slot) => slot.get_mut().current = Some(entity),
            Entry::Vacant(slot) => {
                slot.insert(Staged {
                    committed,
                    current: Some(entity),
                });
            }
        }
    }

    /// Stage removal of `entity`, which is visible in the session view.
    pub(crate) fn remove(&mut self, entity: E) {
        let uuid = entity.uuid();
        let Some(staged) = self.staged.get_mut(&uuid) else {
            self.staged.insert(
                uuid,
                Staged {
                    committed: Some(entity),
                    current: None,
                },
            );
            return;
        };
        if staged.committed.is_none() {
            self.staged.remove(&uuid);
        } else {
            staged.current = None;
        }
    }

    /// Committed entities with the overlay applied on top.
    pub(crate) fn merge(&self, committed: impl IntoIterator<Item = E>) -> Vec<E> {
        let mut merged: Vec<E> = committed
            .into_iter()
            .filter(|entity| !self.staged.contains_key(&entity.uuid()))
            .collect();
        merged.extend(
            self.staged
                .values()
                .filter_map(|staged| staged.current.clone()),
        );
        merged
    }

    pub(crate) fn writes(&self) -> Vec<StagedWrite<'_, E>> {
        self.staged
            .values()
            .filter_map(|staged| match (&staged.committed, &staged.current) {
                (None, Some(current)) => Some(StagedWrite::Insert(current)),
                (Some(previous), Some(current)) => Some(StagedWrite::Replace { previous, current }),
                (Some(previous), None) => Some(StagedWrite::Delete(previous)),
                (None, None) => None,
            })
            .collect()
    }
}
