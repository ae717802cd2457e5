//! Copy-on-write containers owned through [`Ownership`] tokens.
//!
//! The tables are `Arc`-shared between clones so that forking an execution
//! state is O(1) per container. A mutation presents the caller's ownership
//! token: if it matches the recorded owner the table is updated in place
//! when unshared; any other token re-owns the container by copying first.
//! Mutations that would not change the table return early without copying,
//! which keeps "did this actually change" checks cheap for the propagation
//! short-circuits built on top.

use std::hash::Hash;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::ownership::Ownership;

/// A copy-on-write hash map.
#[derive(Debug, Clone)]
pub struct CowMap<K, V> {
    inner: Arc<HashMap<K, V>>,
    owner: Ownership,
}

impl<K: Eq + Hash + Clone, V: Clone> CowMap<K, V> {
    /// An empty map owned by `owner`.
    #[must_use]
    pub fn new(owner: Ownership) -> Self {
        CowMap {
            inner: Arc::new(HashMap::new()),
            owner,
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// True if `key` has an entry.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Iterate over entries (unspecified order).
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    /// Iterate over keys (unspecified order).
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    fn table_mut(&mut self, token: Ownership) -> &mut HashMap<K, V> {
        if self.owner != token {
            // Re-own under the caller's token; the old owner keeps the
            // shared table untouched.
            self.inner = Arc::new((*self.inner).clone());
            self.owner = token;
        }
        Arc::make_mut(&mut self.inner)
    }

    /// Insert or overwrite an entry. Returns true if the map changed.
    pub fn insert(&mut self, key: K, value: V, token: Ownership) -> bool
    where
        V: PartialEq,
    {
        if self.inner.get(&key) == Some(&value) {
            return false;
        }
        self.table_mut(token).insert(key, value);
        true
    }

    /// Remove an entry. Returns true if the map changed.
    pub fn remove(&mut self, key: &K, token: Ownership) -> bool {
        if !self.inner.contains_key(key) {
            return false;
        }
        self.table_mut(token).remove(key);
        true
    }

    /// Update the entry at `key` (inserting `default` first if absent).
    pub fn update<R>(
        &mut self,
        key: K,
        default: V,
        token: Ownership,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        let table = self.table_mut(token);
        f(table.entry(key).or_insert(default))
    }

    /// Drop every entry.
    pub fn clear(&mut self, token: Ownership) {
        if self.inner.is_empty() {
            return;
        }
        self.table_mut(token).clear();
    }
}

/// A copy-on-write hash set.
#[derive(Debug, Clone)]
pub struct CowSet<T> {
    inner: Arc<HashSet<T>>,
    owner: Ownership,
}

impl<T: Eq + Hash + Clone> CowSet<T> {
    /// An empty set owned by `owner`.
    #[must_use]
    pub fn new(owner: Ownership) -> Self {
        CowSet {
            inner: Arc::new(HashSet::new()),
            owner,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if there are no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// True if `value` is a member.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.inner.contains(value)
    }

    /// Iterate over elements (unspecified order).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.inner.iter()
    }

    fn table_mut(&mut self, token: Ownership) -> &mut HashSet<T> {
        if self.owner != token {
            self.inner = Arc::new((*self.inner).clone());
            self.owner = token;
        }
        Arc::make_mut(&mut self.inner)
    }

    /// Add an element. Returns true if the set changed.
    pub fn insert(&mut self, value: T, token: Ownership) -> bool {
        if self.inner.contains(&value) {
            return false;
        }
        self.table_mut(token).insert(value);
        true
    }

    /// Remove an element. Returns true if the set changed.
    pub fn remove(&mut self, value: &T, token: Ownership) -> bool {
        if !self.inner.contains(value) {
            return false;
        }
        self.table_mut(token).remove(value);
        true
    }

    /// Drop every element.
    pub fn clear(&mut self, token: Ownership) {
        if self.inner.is_empty() {
            return;
        }
        self.table_mut(token).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_until_mutated() {
        let token = Ownership::new();
        let mut map = CowMap::new(token);
        map.insert("a", 1, token);
        map.insert("b", 2, token);

        let fork_token = Ownership::new();
        let mut fork = map.clone();
        fork.insert("c", 3, fork_token);

        assert_eq!(map.len(), 2);
        assert_eq!(fork.len(), 3);
        assert!(!map.contains_key(&"c"));
    }

    #[test]
    fn unchanged_mutations_do_not_copy(){
        let token = Ownership::new();
        let mut map = CowMap::new(token);
        map.insert("a", 1, token);

        let fork = map.clone();
        // Re-inserting an identical value and removing a missing key must
        // not disturb the shared table.
        assert!(!map.insert("a", 1, Ownership::new()));
        assert!(!map.remove(&"missing", Ownership::new()));
        assert_eq!(fork.len(), 1);
    }

    #[test]
    fn stale_token_cannot_touch_shared_state() {
        let old_token = Ownership::new();
        let mut set = CowSet::new(old_token);
        set.insert(1, old_token);

        let snapshot = set.clone();
        // Mutating with a fresh token after a clone re-owns the table; the
        // snapshot keeps observing the old contents.
        let new_token = Ownership::new();
        set.insert(2, new_token);
        set.remove(&1, new_token);

        assert!(snapshot.contains(&1));
        assert!(!snapshot.contains(&2));
        assert!(set.contains(&2));
        assert!(!set.contains(&1));
    }
}
