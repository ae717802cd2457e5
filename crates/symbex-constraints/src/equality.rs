//! Equality constraints between heap references.
//!
//! Three kinds of constraints are tracked:
//! - Equalities, as equivalence classes in a union-find structure.
//! - Disequalities: an incrementally-grown approximate maximal clique of
//!   mutually distinct representatives ([`distinct_references`]), plus a
//!   symmetric pairwise table for disequalities outside the clique.
//! - Nullable disequalities: `x != y || (x == null && y == null)`.
//!
//! Invariant: the clique and both pairwise tables contain only
//! representatives of equivalence classes. When two classes merge, the
//! absorbed representative's entries are renamed onto the surviving one;
//! the merge is also reported through [`take_merge_events`] so the
//! aggregator can notify structures layered on top (type constraints).
//!
//! [`distinct_references`]: EqualityConstraints::distinct_references
//! [`take_merge_events`]: EqualityConstraints::take_merge_events

use symbex_core::{HeapRef, TermId, TermStore, TypeName};
use tracing::debug;

use crate::cow::{CowMap, CowSet};
use crate::disjoint_sets::{DisjointSets, Merge};
use crate::ownership::Ownership;

/// Representative preference: static refs, then null, then symbolic.
fn ref_rank(heap_ref: &HeapRef) -> u32 {
    match heap_ref {
        HeapRef::Static(_) => 2,
        HeapRef::Null => 1,
        HeapRef::Symbolic(_) => 0,
    }
}

/// Equality, disequality and nullable-disequality constraints over heap
/// references.
#[derive(Debug, Clone)]
pub struct EqualityConstraints {
    equal_references: DisjointSets<HeapRef>,
    distinct: CowSet<HeapRef>,
    reference_disequalities: CowMap<HeapRef, CowSet<HeapRef>>,
    nullable_disequalities: CowMap<HeapRef, CowSet<HeapRef>>,
    merge_events: Vec<Merge<HeapRef>>,
    contradicting: bool,
    ownership: Ownership,
}

impl EqualityConstraints {
    /// An empty constraint set; the disequality clique starts with the null
    /// reference.
    #[must_use]
    pub fn new(ownership: Ownership) -> Self {
        let mut distinct = CowSet::new(ownership);
        distinct.insert(HeapRef::Null, ownership);
        EqualityConstraints {
            equal_references: DisjointSets::new(ownership, ref_rank),
            distinct,
            reference_disequalities: CowMap::new(ownership),
            nullable_disequalities: CowMap::new(ownership),
            merge_events: Vec::new(),
            contradicting: false,
            ownership,
        }
    }

    /// True if the accumulated constraints are unsatisfiable.
    #[must_use]
    pub fn is_contradicting(&self) -> bool {
        self.contradicting
    }

    /// The representative of `heap_ref`'s equivalence class.
    #[must_use]
    pub fn find(&self, heap_ref: HeapRef) -> HeapRef {
        self.equal_references.find(heap_ref)
    }

    /// True if `a` and `b` are identical in all models.
    #[must_use]
    pub fn are_equal(&self, a: HeapRef, b: HeapRef) -> bool {
        self.equal_references.connected(a, b)
    }

    /// True if `heap_ref` is null in all models.
    #[must_use]
    pub fn is_null(&self, heap_ref: HeapRef) -> bool {
        self.are_equal(HeapRef::Null, heap_ref)
    }

    /// True if `a` and `b` are distinct in all models.
    #[must_use]
    pub fn are_distinct(&self, a: HeapRef, b: HeapRef) -> bool {
        let repr_a = self.find(a);
        let repr_b = self.find(b);
        self.are_distinct_representatives(repr_a, repr_b)
    }

    /// True if `heap_ref` is non-null in all models.
    #[must_use]
    pub fn is_not_null(&self, heap_ref: HeapRef) -> bool {
        self.are_distinct(HeapRef::Null, heap_ref)
    }

    /// The current disequality clique (representatives only).
    pub fn distinct_references(&self) -> impl Iterator<Item = HeapRef> + '_ {
        self.distinct.iter().copied()
    }

    /// Pairwise disequalities outside the clique; symmetric pairs appear in
    /// both orientations.
    pub fn reference_disequalities(&self) -> impl Iterator<Item = (HeapRef, HeapRef)> + '_ {
        self.reference_disequalities
            .iter()
            .flat_map(|(a, set)| set.iter().map(move |b| (*a, *b)))
    }

    /// Nullable disequalities; symmetric pairs appear in both orientations.
    pub fn nullable_disequalities(&self) -> impl Iterator<Item = (HeapRef, HeapRef)> + '_ {
        self.nullable_disequalities
            .iter()
            .flat_map(|(a, set)| set.iter().map(move |b| (*a, *b)))
    }

    /// Merges performed since the last call, in application order. The
    /// aggregator forwards these to every structure keyed by
    /// representatives.
    pub fn take_merge_events(&mut self) -> Vec<Merge<HeapRef>> {
        std::mem::take(&mut self.merge_events)
    }

    /// Assert that two references are always equal. At most one operand may
    /// be static.
    ///
    /// # Panics
    /// Panics if both operands are distinct static references; such an
    /// assertion is decided before it reaches this layer.
    pub fn make_equal(&mut self, a: HeapRef, b: HeapRef) {
        assert!(
            !(a.is_static() && b.is_static() && a != b),
            "two distinct static references can never be equal"
        );
        self.make_ref_equal(a, b);
    }

    /// Assert that two references are never equal.
    pub fn make_non_equal(&mut self, a: HeapRef, b: HeapRef) {
        self.make_ref_non_equal(a, b);
    }

    /// Assert the weaker relation `a != b || (a == null && b == null)`.
    pub fn make_non_equal_or_both_null(&mut self, a: HeapRef, b: HeapRef) {
        self.make_ref_non_equal_or_both_null(a, b);
    }

    fn contradiction(&mut self) {
        debug!("equality constraints latched contradicting");
        self.contradicting = true;
        // Reclaim the tables: every further call is a no-op.
        self.equal_references.clear(self.ownership);
        self.distinct.clear(self.ownership);
        self.reference_disequalities.clear(self.ownership);
        self.nullable_disequalities.clear(self.ownership);
    }

    fn contains_reference_disequality(&self, a: HeapRef, b: HeapRef) -> bool {
        self.reference_disequalities
            .get(&a)
            .is_some_and(|set| set.contains(&b))
    }

    fn contains_nullable_disequality(&self, a: HeapRef, b: HeapRef) -> bool {
        self.nullable_disequalities
            .get(&a)
            .is_some_and(|set| set.contains(&b))
    }

    fn are_distinct_representatives(&self, repr_a: HeapRef, repr_b: HeapRef) -> bool {
        if repr_a == repr_b {
            return false;
        }
        let by_clique = self.distinct.contains(&repr_a) && self.distinct.contains(&repr_b);
        by_clique || self.contains_reference_disequality(repr_a, repr_b)
    }

    fn make_ref_equal(&mut self, a: HeapRef, b: HeapRef) {
        if self.contradicting {
            return;
        }

        // Null never aliases an allocated object, and classes pinned to
        // two different static addresses cannot merge.
        let repr_a = self.find(a);
        let repr_b = self.find(b);
        let null_vs_static = (repr_a.is_null() && repr_b.is_static())
            || (repr_a.is_static() && repr_b.is_null());
        let distinct_statics = repr_a.is_static() && repr_b.is_static() && repr_a != repr_b;
        if null_vs_static || distinct_statics {
            self.contradiction();
            return;
        }

        if let Some(merge) = self.equal_references.union(a, b, self.ownership) {
            self.rename(merge.to, merge.from);
            self.merge_events.push(merge);
        }
        // Further contradictions are detected while renaming.
    }

    /// React to the merge of `from`'s class into `to`'s by eliminating
    /// `from` from every table and re-asserting its disequalities under the
    /// new name.
    fn rename(&mut self, to: HeapRef, from: HeapRef) {
        if self.distinct.contains(&from) {
            if self.distinct.contains(&to) {
                // Two members of the mutually-distinct clique became equal.
                self.contradiction();
                return;
            }
            self.distinct.remove(&from, self.ownership);
            self.distinct.insert(to, self.ownership);
        }

        if let Some(from_diseqs) = self.reference_disequalities.get(&from) {
            if from_diseqs.contains(&to) {
                // `to` was known distinct from `from` and just became equal
                // to it.
                self.contradiction();
                return;
            }

            let migrated: Vec<HeapRef> = from_diseqs.iter().copied().collect();
            self.reference_disequalities.remove(&from, self.ownership);
            for other in migrated {
                self.remove_directed_disequality(other, from);
                self.make_ref_non_equal(to, other);
                if self.contradicting {
                    return;
                }
            }
        }

        let null_repr = self.find(HeapRef::Null);
        if to == null_repr {
            // x == null satisfies x != y || (x == null && y == null), so
            // every nullable disequality involving the null class is
            // vacuously true.
            for key in [from, to] {
                if let Some(set) = self.nullable_disequalities.get(&key) {
                    let entries: Vec<HeapRef> = set.iter().copied().collect();
                    self.nullable_disequalities.remove(&key, self.ownership);
                    for other in entries {
                        self.remove_directed_nullable(other, key);
                    }
                }
            }
        } else if self.contains_nullable_disequality(from, to) {
            // If x == y, the nullable disequality between them can only
            // hold if both are null.
            self.make_ref_equal(to, null_repr);
        } else if let Some(set) = self.nullable_disequalities.get(&from) {
            let entries: Vec<HeapRef> = set.iter().copied().collect();
            self.nullable_disequalities.remove(&from, self.ownership);
            for other in entries {
                self.remove_directed_nullable(other, from);
                self.make_ref_non_equal_or_both_null(to, other);
                if self.contradicting {
                    return;
                }
            }
        }
    }

    fn remove_directed_disequality(&mut self, key: HeapRef, value: HeapRef) {
        let token = self.ownership;
        if self.reference_disequalities.contains_key(&key) {
            self.reference_disequalities
                .update(key, CowSet::new(token), token, |set| {
                    set.remove(&value, token);
                });
        }
    }

    fn remove_directed_nullable(&mut self, key: HeapRef, value: HeapRef) {
        let token = self.ownership;
        if self.nullable_disequalities.contains_key(&key) {
            self.nullable_disequalities
                .update(key, CowSet::new(token), token, |set| {
                    set.remove(&value, token);
                });
        }
    }

    fn insert_reference_disequality(&mut self, a: HeapRef, b: HeapRef) {
        let token = self.ownership;
        self.reference_disequalities
            .update(a, CowSet::new(token), token, |set| {
                set.insert(b, token);
            });
        self.reference_disequalities
            .update(b, CowSet::new(token), token, |set| {
                set.insert(a, token);
            });
    }

    /// Grow the disequality structures with `repr_a != repr_b`; both are
    /// distinct representatives.
    fn add_disequality_unguarded(&mut self, repr_a: HeapRef, repr_b: HeapRef) {
        match self.distinct.len() {
            0 => {
                debug_assert!(self.reference_disequalities.is_empty());
                // Seed the clique with the pair.
                self.distinct.insert(repr_a, self.ownership);
                self.distinct.insert(repr_b, self.ownership);
                return;
            }
            1 => {
                let only = *self.distinct.iter().next().expect("len is 1");
                if repr_a == only {
                    self.distinct.insert(repr_b, self.ownership);
                    return;
                }
                if repr_b == only {
                    self.distinct.insert(repr_a, self.ownership);
                    return;
                }
            }
            _ => {}
        }

        let a_in_clique = self.distinct.contains(&repr_a);
        let b_in_clique = self.distinct.contains(&repr_b);

        if a_in_clique && b_in_clique {
            return;
        }

        if self.contains_reference_disequality(repr_a, repr_b) {
            return;
        }

        if a_in_clique || b_in_clique {
            let in_clique = if a_in_clique { repr_a } else { repr_b };
            let outside = if a_in_clique { repr_b } else { repr_a };

            // O(clique) fold-in check against the existing pairwise table;
            // clique pairs are never re-derived.
            let distinct_from_all = self
                .distinct
                .iter()
                .all(|member| *member == in_clique || self.contains_reference_disequality(outside, *member));

            if distinct_from_all {
                debug!(?outside, "folding reference into disequality clique");
                let members: Vec<HeapRef> = self.distinct.iter().copied().collect();
                for member in members {
                    // Pairwise entries against clique members are implied by
                    // membership now.
                    self.remove_directed_disequality(outside, member);
                    self.remove_directed_disequality(member, outside);
                }
                self.distinct.insert(outside, self.ownership);
                return;
            }
        }

        self.insert_reference_disequality(repr_a, repr_b);
    }

    fn make_ref_non_equal(&mut self, a: HeapRef, b: HeapRef) {
        if self.contradicting {
            return;
        }

        if a.is_static() && b.is_static() && a != b {
            // Distinct static refs cannot be equal; nothing to record.
            return;
        }

        let repr_a = self.find(a);
        let repr_b = self.find(b);

        if repr_a == repr_b {
            self.contradiction();
            return;
        }

        self.add_disequality_unguarded(repr_a, repr_b);
        // The hard disequality subsumes a nullable one between the same
        // pair.
        self.remove_nullable_disequality(repr_a, repr_b);
    }

    fn make_ref_non_equal_or_both_null(&mut self, a: HeapRef, b: HeapRef) {
        if self.contradicting {
            return;
        }

        if a.is_static() && b.is_static() && a != b {
            // Distinct static refs are never equal and never null.
            return;
        }

        let repr_a = self.find(a);
        let repr_b = self.find(b);

        if repr_a == repr_b {
            // x != x || (x == null && x == null) reduces to x == null.
            self.make_ref_equal(repr_a, HeapRef::Null);
            return;
        }

        let null_repr = self.find(HeapRef::Null);
        if repr_a == null_repr || repr_b == null_repr {
            // Holds in every model.
            return;
        }

        if self.are_distinct_representatives(repr_a, null_repr)
            || self.are_distinct_representatives(repr_b, null_repr)
        {
            // One side is known non-null: only the hard disequality is left.
            self.add_disequality_unguarded(repr_a, repr_b);
            return;
        }

        let token = self.ownership;
        self.nullable_disequalities
            .update(repr_a, CowSet::new(token), token, |set| {
                set.insert(repr_b, token);
            });
        self.nullable_disequalities
            .update(repr_b, CowSet::new(token), token, |set| {
                set.insert(repr_a, token);
            });
    }

    fn remove_nullable_disequality(&mut self, repr_a: HeapRef, repr_b: HeapRef) {
        if self.contains_nullable_disequality(repr_a, repr_b) {
            self.remove_directed_nullable(repr_a, repr_b);
            self.remove_directed_nullable(repr_b, repr_a);
        }
    }

    /// React to a fresh concrete allocation: every clique member for which
    /// `assignable_to` holds (a symbolic reference the new object could
    /// alias) is moved out of the clique, its cliquewise disequalities
    /// materialized pairwise; the allocated static then joins the clique.
    pub fn update_disequality(
        &mut self,
        allocated_static: HeapRef,
        assignable_to: impl Fn(HeapRef) -> bool,
    ) {
        if !allocated_static.is_static() || self.contradicting {
            return;
        }

        let old_distinct: Vec<HeapRef> = self.distinct.iter().copied().collect();
        let displaced: Vec<HeapRef> = old_distinct
            .iter()
            .copied()
            .filter(|r| r.is_symbolic() && !r.is_null() && assignable_to(*r))
            .collect();

        for displaced_ref in displaced {
            self.distinct.remove(&displaced_ref, self.ownership);
            for other in old_distinct.iter().copied() {
                if other != displaced_ref {
                    self.insert_reference_disequality(displaced_ref, other);
                }
            }
        }

        self.distinct.insert(allocated_static, self.ownership);
    }

    /// Emit the constraint formulas for the external solver: per-class
    /// equalities, one `distinct` over the clique, pairwise disequalities
    /// and nullable disequalities.
    pub fn emit<T: TypeName>(&self, store: &mut TermStore<T>) -> Vec<TermId> {
        if self.contradicting {
            return vec![store.false_term()];
        }

        let mut out = Vec::new();

        for (member, parent) in self.equal_references.iter() {
            let lhs = store.mk_ref(member);
            let rhs = store.mk_ref(parent);
            out.push(store.mk_eq(lhs, rhs));
        }

        if self.distinct.len() >= 2 {
            let mut refs: Vec<HeapRef> = self.distinct.iter().copied().collect();
            refs.sort_unstable();
            let args = refs.into_iter().map(|r| store.mk_ref(r)).collect();
            out.push(store.mk_distinct(args));
        }

        let mut processed: Vec<(HeapRef, HeapRef)> = Vec::new();
        for (a, b) in self.reference_disequalities() {
            if processed.contains(&(b, a)) {
                continue;
            }
            processed.push((a, b));
            let lhs = store.mk_ref(a);
            let rhs = store.mk_ref(b);
            let eq = store.mk_eq(lhs, rhs);
            out.push(store.mk_not(eq));
        }

        processed.clear();
        let null_ref = store.mk_ref(HeapRef::Null);
        for (a, b) in self.nullable_disequalities() {
            if processed.contains(&(b, a)) {
                continue;
            }
            processed.push((a, b));
            let lhs = store.mk_ref(a);
            let rhs = store.mk_ref(b);
            let eq = store.mk_eq(lhs, rhs);
            let diseq = store.mk_not(eq);
            let lhs_null = store.mk_eq(lhs, null_ref);
            let rhs_null = store.mk_eq(rhs, null_ref);
            let both_null = store.mk_and(vec![lhs_null, rhs_null]);
            out.push(store.mk_or(vec![diseq, both_null]));
        }

        out
    }

    /// Create an independent copy sharing unmodified substructure.
    ///
    /// The source keeps working under `this_owner`; the copy owns its
    /// containers through `clone_owner`. Pending merge events stay with the
    /// source; the clone's subscribers must be re-established by the caller.
    pub fn clone_with(&mut self, this_owner: Ownership, clone_owner: Ownership) -> Self {
        if self.contradicting {
            let mut copy = EqualityConstraints::new(clone_owner);
            copy.contradicting = true;
            copy.distinct.clear(clone_owner);
            return copy;
        }

        self.ownership = this_owner;
        EqualityConstraints {
            equal_references: self.equal_references.clone(),
            distinct: self.distinct.clone(),
            reference_disequalities: self.reference_disequalities.clone(),
            nullable_disequalities: self.nullable_disequalities.clone(),
            merge_events: Vec::new(),
            contradicting: false,
            ownership: clone_owner,
        }
    }
}
