//! Unique reference collection.

use std::collections::HashSet;
use std::hash::Hash;

/// A set of IDs that remembers first-seen order.
///
/// Batches are sent in the order references first appear on the page, which
/// keeps downstream requests deterministic.
#[derive(Debug, Clone)]
pub struct ReferenceSet<T> {
    seen: HashSet<T>,
    ordered: Vec<T>,
}

impl<T: Copy + Eq + Hash> ReferenceSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seen: HashSet::new(),
            ordered: Vec::new(),
        }
    }

    /// Adds `id` unless it is already present. Returns `true` if it was new.
    pub fn insert(&mut self, id: T) -> bool {
        let fresh = self.seen.insert(id);
        if fresh {
            self.ordered.push(id);
        }
        fresh
    }

    /// The IDs in first-seen order.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.ordered
    }

    /// Number of distinct IDs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Returns `true` if no IDs were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl<T: Copy + Eq + Hash> Default for ReferenceSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Eq + Hash> FromIterator<T> for ReferenceSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}
