//! Type regions.
//!
//! A type region describes the possible types of one symbolic value as four
//! constraint sets (declared/excluded supertypes, declared/excluded
//! subtypes) plus a contradiction flag denoting the empty set. Regions are
//! immutable: every narrowing operation returns a new region, keeping the
//! constraint sets minimal (a new fact evicts the weaker facts it implies)
//! and latching the contradiction flag when the new fact conflicts with the
//! accumulated ones.

use std::sync::Arc;

use hashbrown::HashSet;
use symbex_core::{Region, TypeSystem};

/// The admissible types of one symbolic value.
pub struct TypeRegion<TS: TypeSystem> {
    type_system: Arc<TS>,
    supertypes: HashSet<TS::Ty>,
    not_supertypes: HashSet<TS::Ty>,
    subtypes: HashSet<TS::Ty>,
    not_subtypes: HashSet<TS::Ty>,
    contradicting: bool,
}

impl<TS: TypeSystem> Clone for TypeRegion<TS> {
    fn clone(&self) -> Self {
        TypeRegion {
            type_system: Arc::clone(&self.type_system),
            supertypes: self.supertypes.clone(),
            not_supertypes: self.not_supertypes.clone(),
            subtypes: self.subtypes.clone(),
            not_subtypes: self.not_subtypes.clone(),
            contradicting: self.contradicting,
        }
    }
}

impl<TS: TypeSystem> PartialEq for TypeRegion<TS> {
    fn eq(&self, other: &Self) -> bool {
        self.contradicting == other.contradicting
            && self.supertypes == other.supertypes
            && self.not_supertypes == other.not_supertypes
            && self.subtypes == other.subtypes
            && self.not_subtypes == other.not_subtypes
    }
}

impl<TS: TypeSystem> Eq for TypeRegion<TS> {}

impl<TS: TypeSystem> std::fmt::Debug for TypeRegion<TS> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.contradicting {
            return write!(f, "TypeRegion(empty)");
        }
        f.debug_struct("TypeRegion")
            .field("supertypes", &self.supertypes)
            .field("not_supertypes", &self.not_supertypes)
            .field("subtypes", &self.subtypes)
            .field("not_subtypes", &self.not_subtypes)
            .finish()
    }
}

impl<TS: TypeSystem> TypeRegion<TS> {
    /// The unconstrained region (all types).
    #[must_use]
    pub fn top(type_system: Arc<TS>) -> Self {
        TypeRegion {
            type_system,
            supertypes: HashSet::new(),
            not_supertypes: HashSet::new(),
            subtypes: HashSet::new(),
            not_subtypes: HashSet::new(),
            contradicting: false,
        }
    }

    /// The region containing exactly `ty`.
    #[must_use]
    pub fn from_exact(type_system: Arc<TS>, ty: TS::Ty) -> Self {
        let mut region = Self::top(type_system);
        region.supertypes.insert(ty.clone());
        region.subtypes.insert(ty);
        region
    }

    /// The empty region.
    fn contradiction(&self) -> Self {
        let mut region = Self::top(Arc::clone(&self.type_system));
        region.contradicting = true;
        region
    }

    /// True if no type satisfies the accumulated constraints.
    #[must_use]
    pub fn is_contradicting(&self) -> bool {
        self.contradicting
    }

    /// Declared supertypes (the value's type is a subtype of each).
    #[must_use]
    pub fn supertypes(&self) -> &HashSet<TS::Ty> {
        &self.supertypes
    }

    /// Excluded supertypes.
    #[must_use]
    pub fn not_supertypes(&self) -> &HashSet<TS::Ty> {
        &self.not_supertypes
    }

    /// Declared subtypes (each is a subtype of the value's type).
    #[must_use]
    pub fn subtypes(&self) -> &HashSet<TS::Ty> {
        &self.subtypes
    }

    /// Excluded subtypes.
    #[must_use]
    pub fn not_subtypes(&self) -> &HashSet<TS::Ty> {
        &self.not_subtypes
    }

    /// True if the concrete type `ty` satisfies every constraint of this
    /// region.
    #[must_use]
    pub fn contains_exact(&self, ty: &TS::Ty) -> bool {
        let ts = &*self.type_system;
        !self.contradicting
            && self.supertypes.iter().all(|u| ts.is_supertype(u, ty))
            && self.not_supertypes.iter().all(|u| !ts.is_supertype(u, ty))
            && self.subtypes.iter().all(|u| ts.is_supertype(ty, u))
            && self.not_subtypes.iter().all(|u| !ts.is_supertype(ty, u))
    }

    /// Narrow to types that are subtypes of `supertype`.
    ///
    /// Contradictions detected against the whole constraint set (with X the
    /// value's type and t the new supertype):
    /// - X <: t while u <: t is excluded for some declared u
    /// - some declared subtype is not a subtype of t
    /// - t forbids multiple inheritance and an incomparable declared
    ///   supertype forbids it too
    /// - t is final and excluded as a subtype
    #[must_use]
    pub fn add_supertype(&self, supertype: &TS::Ty) -> Self {
        let ts = Arc::clone(&self.type_system);
        if self.contradicting || self.supertypes.iter().any(|u| ts.is_supertype(supertype, u)) {
            return self.clone();
        }

        if self.not_supertypes.iter().any(|u| ts.is_supertype(u, supertype)) {
            return self.contradiction();
        }

        if self.subtypes.iter().any(|u| !ts.is_supertype(supertype, u)) {
            return self.contradiction();
        }

        if !ts.allows_multiple_inheritance(supertype) {
            // No declared supertype is a subtype of `supertype` (checked
            // above), so any u not above it is incomparable with it.
            let incomparable_single_inheritance = self
                .supertypes
                .iter()
                .any(|u| !ts.allows_multiple_inheritance(u) && !ts.is_supertype(u, supertype));
            if incomparable_single_inheritance {
                return self.contradiction();
            }
        }

        let mut new_subtypes = self.subtypes.clone();
        if ts.is_final(supertype) {
            if self.not_subtypes.contains(supertype) {
                return self.contradiction();
            }
            // X <: t with t final means X == t, i.e. t <: X as well.
            new_subtypes.insert(supertype.clone());
        }

        if new_subtypes.iter().any(|u| ts.is_supertype(u, supertype)) {
            return self.single_type_region(supertype);
        }

        let mut result = self.clone();
        result.subtypes = new_subtypes;
        result.supertypes.retain(|u| !ts.is_supertype(u, supertype));
        result.supertypes.insert(supertype.clone());
        result
    }

    /// Narrow away the subtypes of `not_supertype`.
    #[must_use]
    pub fn exclude_supertype(&self, not_supertype: &TS::Ty) -> Self {
        let ts = Arc::clone(&self.type_system);
        if self.contradicting
            || self.not_supertypes.iter().any(|u| ts.is_supertype(u, not_supertype))
        {
            return self.clone();
        }

        if self.supertypes.iter().any(|u| ts.is_supertype(not_supertype, u)) {
            return self.contradiction();
        }

        let mut result = self.clone();
        result.not_supertypes.retain(|u| !ts.is_supertype(not_supertype, u));
        result.not_supertypes.insert(not_supertype.clone());
        result
    }

    /// Narrow to types that are supertypes of `subtype`.
    #[must_use]
    pub fn add_subtype(&self, subtype: &TS::Ty) -> Self {
        let ts = Arc::clone(&self.type_system);
        if self.contradicting || self.subtypes.iter().any(|u| ts.is_supertype(u, subtype)) {
            return self.clone();
        }

        if self.not_subtypes.iter().any(|u| ts.is_supertype(subtype, u)) {
            return self.contradiction();
        }

        if self.supertypes.iter().any(|u| !ts.is_supertype(u, subtype)) {
            return self.contradiction();
        }

        if self.supertypes.iter().any(|u| ts.is_supertype(subtype, u)) {
            // t <: X and X <: u <: t force X == t.
            return self.single_type_region(subtype);
        }

        let mut result = self.clone();
        result.subtypes.retain(|u| !ts.is_supertype(subtype, u));
        result.subtypes.insert(subtype.clone());
        result
    }

    /// Narrow away the supertypes of `not_subtype`.
    #[must_use]
    pub fn exclude_subtype(&self, not_subtype: &TS::Ty) -> Self {
        let ts = Arc::clone(&self.type_system);
        if self.contradicting
            || self.not_subtypes.iter().any(|u| ts.is_supertype(not_subtype, u))
        {
            return self.clone();
        }

        if self.subtypes.iter().any(|u| ts.is_supertype(u, not_subtype)) {
            return self.contradiction();
        }

        if ts.is_final(not_subtype) && self.supertypes.contains(not_subtype) {
            return self.contradiction();
        }

        let mut result = self.clone();
        result.not_subtypes.retain(|u| !ts.is_supertype(u, not_subtype));
        result.not_subtypes.insert(not_subtype.clone());
        result
    }

    /// Collapse to the singleton region of `ty`, checking the accumulated
    /// constraints allow exactly that type.
    fn single_type_region(&self, ty: &TS::Ty) -> Self {
        let ts = Arc::clone(&self.type_system);
        if !ts.is_instantiable(ty) {
            return self.contradiction();
        }
        if self.supertypes.iter().any(|u| !ts.is_supertype(u, ty)) {
            return self.contradiction();
        }
        if self.not_supertypes.iter().any(|u| ts.is_supertype(u, ty)) {
            return self.contradiction();
        }
        if self.subtypes.iter().any(|u| !ts.is_supertype(ty, u)) {
            return self.contradiction();
        }
        if self.not_subtypes.iter().any(|u| ts.is_supertype(ty, u)) {
            return self.contradiction();
        }

        let mut result = self.clone();
        result.supertypes = HashSet::from_iter([ty.clone()]);
        result.subtypes = HashSet::from_iter([ty.clone()]);
        result
    }
}

impl<TS: TypeSystem> Region for TypeRegion<TS> {
    fn is_empty(&self) -> bool {
        self.contradicting
    }

    fn intersect(&self, other: &Self) -> Self {
        if self == other {
            return self.clone();
        }
        let (small, large) = if other.constraint_count() < self.constraint_count() {
            (other, self)
        } else {
            (self, other)
        };
        if small.contradicting {
            return small.clone();
        }

        let mut result = large.clone();
        for t in &small.supertypes {
            result = result.add_supertype(t);
        }
        for t in &small.not_supertypes {
            result = result.exclude_supertype(t);
        }
        for t in &small.subtypes {
            result = result.add_subtype(t);
        }
        for t in &small.not_subtypes {
            result = result.exclude_subtype(t);
        }
        result
    }

    /// Subtraction supports only a single positive constraint operand; this
    /// is a permanent restriction of the API, sufficient for the heap
    /// partitioning queries the memory subsystem performs.
    ///
    /// # Panics
    /// Panics if `other` carries negative constraints or more than one
    /// positive constraint.
    fn subtract(&self, other: &Self) -> Self {
        if self.contradicting || other.contradicting {
            return self.clone();
        }
        assert!(
            other.not_supertypes.is_empty()
                && other.not_subtypes.is_empty()
                && other.supertypes.len() + other.subtypes.len() == 1,
            "only single positive type constraints can be subtracted"
        );

        let mut result = self.clone();
        for t in &other.supertypes {
            result = result.exclude_supertype(t);
        }
        for t in &other.subtypes {
            result = result.exclude_subtype(t);
        }
        result
    }
}

impl<TS: TypeSystem> TypeRegion<TS> {
    fn constraint_count(&self) -> usize {
        self.supertypes.len()
            + self.not_supertypes.len()
            + self.subtypes.len()
            + self.not_subtypes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ty, TestTypeSystem};
    use symbex_core::RegionComparison;

    fn top() -> TypeRegion<TestTypeSystem> {
        TypeRegion::top(Arc::new(TestTypeSystem::default()))
    }

    #[test]
    fn add_supertype_is_idempotent() {
        let region = top();
        let once = region.add_supertype(&ty("A"));
        let twice = once.add_supertype(&ty("A"));
        assert_eq!(once, twice);
    }

    #[test]
    fn add_then_exclude_contradicts() {
        let region = top().add_supertype(&ty("A")).exclude_supertype(&ty("A"));
        assert!(region.is_contradicting());
        let region = top().exclude_supertype(&ty("A")).add_supertype(&ty("A"));
        assert!(region.is_contradicting());
    }

    #[test]
    fn new_supertype_evicts_weaker_one() {
        let region = top().add_supertype(&ty("Object")).add_supertype(&ty("A"));
        assert!(region.supertypes().contains(&ty("A")));
        assert!(!region.supertypes().contains(&ty("Object")));
    }

    #[test]
    fn final_supertype_collapses_to_singleton() {
        // C is final: X <: C forces X == C.
        let region = top().add_supertype(&ty("C"));
        assert!(!region.is_contradicting());
        assert!(region.supertypes().contains(&ty("C")));
        assert!(region.subtypes().contains(&ty("C")));
    }

    #[test]
    fn excluded_subtype_blocks_final_supertype() {
        let region = top().exclude_subtype(&ty("C")).add_supertype(&ty("C"));
        assert!(region.is_contradicting());
    }

    #[test]
    fn single_inheritance_conflict() {
        // A and D are incomparable classes without multiple inheritance.
        let region = top().add_supertype(&ty("A")).add_supertype(&ty("D"));
        assert!(region.is_contradicting());
    }

    #[test]
    fn interface_combines_with_class() {
        let region = top().add_supertype(&ty("A")).add_supertype(&ty("I"));
        assert!(!region.is_contradicting());
        assert!(region.supertypes().contains(&ty("A")));
        assert!(region.supertypes().contains(&ty("I")));
    }

    #[test]
    fn subtype_conflicting_with_supertype_contradicts() {
        // D <: X and X <: A cannot hold: D is not a subtype of A.
        let region = top().add_supertype(&ty("A")).add_subtype(&ty("D"));
        assert!(region.is_contradicting());
    }

    #[test]
    fn disjoint_class_regions() {
        let a = top().add_supertype(&ty("A"));
        let d = top().add_supertype(&ty("D"));
        assert_eq!(a.compare(&d), RegionComparison::Disjoint);
    }

    #[test]
    fn narrower_region_is_included() {
        let object = top().add_supertype(&ty("Object"));
        let a = top().add_supertype(&ty("A"));
        assert!(!a.intersect(&object).is_contradicting());
        assert_eq!(object.compare(&a), RegionComparison::Includes);
    }

    #[test]
    fn contains_exact_checks_all_sets() {
        let region = top().add_supertype(&ty("A")).exclude_supertype(&ty("B"));
        assert!(region.contains_exact(&ty("C")));
        assert!(!region.contains_exact(&ty("B")));
        assert!(!region.contains_exact(&ty("D")));
    }
}
