//! Multi-key stable sorting for backends without native ordering.

use std::cmp::Ordering;

use cleanarch_domain::{Entity, FieldValue, OrderKey};

/// Compare two entities key by key; a descending key reverses only itself.
fn compare_by<E: Entity>(left: &E, right: &E, keys: &[OrderKey]) -> Ordering {
    for key in keys {
        let l = left.field(&key.field).unwrap_or(FieldValue::Null);
        let r = right.field(&key.field).unwrap_or(FieldValue::Null);
        let ordering = if key.descending { r.cmp(&l) } else { l.cmp(&r) };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Stable sort of `items` by successive ordering keys.
///
/// Ties keep their original relative order.
pub fn multikey_sort<E: Entity>(items: &mut [E], keys: &[OrderKey]) {
    if keys.is_empty() {
        return;
    }
    items.sort_by(|a, b| compare_by(a, b, keys));
}

/// Default backend order: ascending surrogate identity, unassigned last.
pub fn sort_by_identity<E: Entity>(items: &mut [E]) {
    items.sort_by_key(|item| (item.id().is_none(), item.id()));
}

/// Identity order followed by the requested keys; the result is
/// deterministic for the same underlying set.
pub fn order_entities<E: Entity>(items: &mut [E], keys: &[OrderKey]) {
    sort_by_identity(items);
    multikey_sort(items, keys);
}
