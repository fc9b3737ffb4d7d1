//! Offset/limit pagination.

use serde::{Deserialize, Serialize};

/// Pagination parameters.
///
/// `limit == LimitOffset::UNBOUNDED` disables truncation. A zero limit is
/// a real limit and yields an empty page. Offset is applied before limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOffset {
    pub limit: u64,
    pub offset: u64,
}

impl LimitOffset {
    /// Sentinel limit meaning "no limit".
    pub const UNBOUNDED: u64 = u64::MAX;

    #[must_use]
    pub const fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }

    #[must_use]
    pub const fn unbounded() -> Self {
        Self::new(Self::UNBOUNDED, 0)
    }

    /// Same offset, no limit.
    #[must_use]
    pub const fn inf(self) -> Self {
        Self::new(Self::UNBOUNDED, self.offset)
    }

    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.limit == Self::UNBOUNDED
    }

    /// Apply offset then limit to an already ordered sequence.
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let iter = items.into_iter().skip(offset);
        if self.is_unbounded() {
            iter.collect()
        } else {
            iter.take(usize::try_from(self.limit).unwrap_or(usize::MAX))
                .collect()
        }
    }
}

impl Default for LimitOffset {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate_tail() {
        let items: Vec<u32> = (0..25).collect();
        let page = LimitOffset::new(10, 20).paginate(items);
        assert_eq!(page, vec![20, 21, 22, 23, 24]);
    }

    #[test]
    fn test_unbounded_keeps_everything_after_offset() {
        let items: Vec<u32> = (0..5).collect();
        assert_eq!(LimitOffset::new(2, 1).inf().paginate(items.clone()), vec![1, 2, 3, 4]);
        assert_eq!(LimitOffset::unbounded().paginate(items).len(), 5);
    }

    #[test]
    fn test_zero_limit_is_empty() {
        let items: Vec<u32> = (0..5).collect();
        assert!(LimitOffset::new(0, 0).paginate(items).is_empty());
    }

    #[test]
    fn test_offset_past_end() {
        let items: Vec<u32> = (0..3).collect();
        assert!(LimitOffset::new(10, 7).paginate(items).is_empty());
        assert_eq!(LimitOffset::default().limit, 20);
    }
}
