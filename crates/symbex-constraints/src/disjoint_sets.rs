//! Union-find with representative selection and merge events.
//!
//! Unlike a classic array-based union-find, elements are arbitrary hashable
//! values and enter the structure lazily: an element not yet unioned is its
//! own representative. `union` reports the merge it performed as an event
//! `(to, from)` — the surviving and the absorbed representative — which the
//! caller applies to every structure keyed by representatives. This keeps
//! the notification flow explicit instead of hiding it behind registered
//! callbacks.

use std::hash::Hash;

use crate::cow::CowMap;
use crate::ownership::Ownership;

/// A merge performed by [`DisjointSets::union`]: the equivalence class of
/// `from` was absorbed into the class represented by `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merge<T> {
    /// Representative of the merged class.
    pub to: T,
    /// The absorbed former representative.
    pub from: T,
}

/// Union-find over values of type `T`.
///
/// `rank` orders candidate representatives: when two classes merge, the
/// root with the higher rank survives.
#[derive(Debug, Clone)]
pub struct DisjointSets<T> {
    parent: CowMap<T, T>,
    rank: fn(&T) -> u32,
}

impl<T: Copy + Eq + Hash> DisjointSets<T> {
    /// An empty structure with the given representative preference.
    #[must_use]
    pub fn new(owner: Ownership, rank: fn(&T) -> u32) -> Self {
        DisjointSets {
            parent: CowMap::new(owner),
            rank,
        }
    }

    /// The representative of `value`'s equivalence class.
    #[must_use]
    pub fn find(&self, value: T) -> T {
        let mut current = value;
        while let Some(&next) = self.parent.get(&current) {
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    /// True if `a` and `b` are in the same class.
    #[must_use]
    pub fn connected(&self, a: T, b: T) -> bool {
        self.find(a) == self.find(b)
    }

    /// Union the classes of `a` and `b`.
    ///
    /// Returns the performed merge, or `None` if they already shared a
    /// class. Paths touched by the lookup are compressed.
    pub fn union(&mut self, a: T, b: T, token: Ownership) -> Option<Merge<T>> {
        let root_a = self.find_compress(a, token);
        let root_b = self.find_compress(b, token);
        if root_a == root_b {
            return None;
        }

        let (to, from) = if (self.rank)(&root_b) > (self.rank)(&root_a) {
            (root_b, root_a)
        } else {
            (root_a, root_b)
        };
        self.parent.insert(from, to, token);
        Some(Merge { to, from })
    }

    fn find_compress(&mut self, value: T, token: Ownership) -> T {
        let root = self.find(value);
        let mut current = value;
        while current != root {
            let next = *self.parent.get(&current).expect("chain member has a parent");
            self.parent.insert(current, root, token);
            current = next;
        }
        root
    }

    /// Iterate over `(member, parent)` links (unspecified order). Every
    /// member of a non-trivial class appears exactly once.
    pub fn iter(&self) -> impl Iterator<Item = (T, T)> + '_ {
        self.parent
            .iter()
            .filter(|(member, parent)| *member != *parent)
            .map(|(member, parent)| (*member, *parent))
    }

    /// Drop all classes.
    pub fn clear(&mut self, token: Ownership) {
        self.parent.clear(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_preference(_: &u32) -> u32 {
        0
    }

    #[test]
    fn transitive_union() {
        let token = Ownership::new();
        let mut ds = DisjointSets::new(token, no_preference);
        ds.union(1, 2, token);
        ds.union(2, 3, token);
        assert!(ds.connected(1, 3));
        assert!(!ds.connected(1, 4));
    }

    #[test]
    fn union_reports_merge_once() {
        let token = Ownership::new();
        let mut ds = DisjointSets::new(token, no_preference);
        let merge = ds.union(1, 2, token).expect("first union merges");
        assert!(merge.to == 1 || merge.to == 2);
        assert!(ds.union(1, 2, token).is_none());
    }

    #[test]
    fn rank_picks_representative() {
        // Prefer even values as representatives.
        fn even_first(v: &u32) -> u32 {
            u32::from(v % 2 == 0)
        }
        let token = Ownership::new();
        let mut ds = DisjointSets::new(token, even_first);
        let merge = ds.union(3, 4, token).unwrap();
        assert_eq!(merge.to, 4);
        assert_eq!(merge.from, 3);
        assert_eq!(ds.find(3), 4);
    }

    #[test]
    fn clone_is_independent() {
        let token = Ownership::new();
        let mut ds = DisjointSets::new(token, no_preference);
        ds.union(1, 2, token);

        let fork = ds.clone();
        ds.union(3, 4, Ownership::new());

        assert!(fork.connected(1, 2));
        assert!(!fork.connected(3, 4));
    }
}
