//! Type constraints.
//!
//! One type region per equivalence-class representative, kept in sync with
//! equality merges, plus the exact types of concretely allocated objects.
//! Narrowing a symbolic reference's region feeds back into aliasing: when
//! two tracked references end up with provably disjoint regions they cannot
//! alias unless both are null, which is asserted back into the equality
//! constraints.

use std::sync::Arc;

use hashbrown::HashMap;
use symbex_core::{AddressModel, ConcreteAddr, HeapRef, Region, TermId, TermStore, TypeSystem, TypesResult};
use thiserror::Error;
use tracing::debug;

use crate::cow::CowMap;
use crate::equality::EqualityConstraints;
use crate::ownership::Ownership;
use crate::type_region::TypeRegion;

/// A verified concrete type per model address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAssignment<T> {
    types: HashMap<ConcreteAddr, T>,
}

impl<T> TypeAssignment<T> {
    /// The type assigned to the object at `addr`, if any reference landed
    /// there.
    #[must_use]
    pub fn type_at(&self, addr: ConcreteAddr) -> Option<&T> {
        self.types.get(&addr)
    }

    /// Iterate over `(address, type)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ConcreteAddr, &T)> {
        self.types.iter().map(|(addr, ty)| (*addr, ty))
    }
}

/// Terminal outcomes of [`TypeConstraints::verify`] other than a verified
/// assignment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// The model grouped references with incompatible regions onto one
    /// address; the carried disequality formulas must be asserted and the
    /// solver re-queried.
    #[error("model needs refinement: {} additional disequality formulas", .0.len())]
    Refinement(Vec<TermId>),
    /// Some equivalence class admits no type at all.
    #[error("type constraints are unsatisfiable")]
    Unsat,
    /// The enumeration budget ran out before a verdict.
    #[error("type enumeration budget exhausted")]
    Undecided,
}

/// Type constraints over heap references.
pub struct TypeConstraints<TS: TypeSystem> {
    type_system: Arc<TS>,
    regions: CowMap<HeapRef, TypeRegion<TS>>,
    concrete: CowMap<ConcreteAddr, TS::Ty>,
    contradicting: bool,
    ownership: Ownership,
}

impl<TS: TypeSystem> TypeConstraints<TS> {
    /// An empty constraint set over the given type system.
    #[must_use]
    pub fn new(type_system: Arc<TS>, ownership: Ownership) -> Self {
        TypeConstraints {
            type_system,
            regions: CowMap::new(ownership),
            concrete: CowMap::new(ownership),
            contradicting: false,
            ownership,
        }
    }

    /// True if the accumulated constraints are unsatisfiable.
    #[must_use]
    pub fn is_contradicting(&self) -> bool {
        self.contradicting
    }

    /// The type system oracle this instance narrows against.
    #[must_use]
    pub fn type_system(&self) -> &Arc<TS> {
        &self.type_system
    }

    fn contradiction(&mut self) {
        debug!("type constraints latched contradicting");
        self.contradicting = true;
    }

    /// The exact type of the object allocated at `addr`, if registered.
    #[must_use]
    pub fn exact_type(&self, addr: ConcreteAddr) -> Option<&TS::Ty> {
        self.concrete.get(&addr)
    }

    /// The type region of `heap_ref`'s equivalence class.
    ///
    /// # Panics
    /// Panics if the class is represented by a static reference whose
    /// allocation was never registered with [`allocate`](Self::allocate).
    #[must_use]
    pub fn region_of(&self, eq: &EqualityConstraints, heap_ref: HeapRef) -> TypeRegion<TS> {
        match eq.find(heap_ref) {
            HeapRef::Static(addr) => {
                let exact = self
                    .concrete
                    .get(&addr)
                    .unwrap_or_else(|| panic!("unregistered static allocation @{addr}"));
                TypeRegion::from_exact(Arc::clone(&self.type_system), exact.clone())
            }
            repr => self.region_of_representative(repr),
        }
    }

    fn region_of_representative(&self, repr: HeapRef) -> TypeRegion<TS> {
        self.regions
            .get(&repr)
            .cloned()
            .unwrap_or_else(|| TypeRegion::top(Arc::clone(&self.type_system)))
    }

    /// Register a fresh concrete allocation with its exact type and update
    /// the disequality clique accordingly.
    ///
    /// # Panics
    /// Panics if `addr` was already registered with a different type.
    pub fn allocate(&mut self, eq: &mut EqualityConstraints, addr: ConcreteAddr, ty: TS::Ty) {
        if let Some(existing) = self.concrete.get(&addr) {
            assert!(
                *existing == ty,
                "allocation @{addr} registered twice with different types"
            );
            return;
        }
        self.concrete.insert(addr, ty.clone(), self.ownership);

        let regions = &self.regions;
        eq.update_disequality(HeapRef::Static(addr), |sym| {
            regions.get(&sym).map_or(true, |region| region.contains_exact(&ty))
        });
    }

    /// True if the object allocated at `addr` could be the value of the
    /// symbolic reference `sym` as far as type information goes.
    #[must_use]
    pub fn can_static_ref_be_equal_to_symbolic(
        &self,
        eq: &EqualityConstraints,
        addr: ConcreteAddr,
        sym: HeapRef,
    ) -> bool {
        let Some(exact) = self.concrete.get(&addr) else {
            panic!("unregistered static allocation @{addr}");
        };
        let repr = eq.find(sym);
        self.region_of_representative(repr).contains_exact(exact)
    }

    /// Assert that the value of `heap_ref` is an instance of `ty` (its type
    /// is `ty` or a subtype).
    pub fn add_supertype(&mut self, eq: &mut EqualityConstraints, heap_ref: HeapRef, ty: TS::Ty) {
        self.constrain(eq, heap_ref, |exact, ts| ts.is_supertype(&ty, exact), |region| {
            region.add_supertype(&ty)
        });
    }

    /// Assert that the value of `heap_ref` is *not* an instance of `ty`.
    pub fn exclude_supertype(&mut self, eq: &mut EqualityConstraints, heap_ref: HeapRef, ty: TS::Ty) {
        self.constrain(eq, heap_ref, |exact, ts| !ts.is_supertype(&ty, exact), |region| {
            region.exclude_supertype(&ty)
        });
    }

    /// Assert that `ty` is a subtype of the value's type.
    pub fn add_subtype(&mut self, eq: &mut EqualityConstraints, heap_ref: HeapRef, ty: TS::Ty) {
        self.constrain(eq, heap_ref, |exact, ts| ts.is_supertype(exact, &ty), |region| {
            region.add_subtype(&ty)
        });
    }

    /// Assert that `ty` is *not* a subtype of the value's type.
    pub fn exclude_subtype(&mut self, eq: &mut EqualityConstraints, heap_ref: HeapRef, ty: TS::Ty) {
        self.constrain(eq, heap_ref, |exact, ts| !ts.is_supertype(exact, &ty), |region| {
            region.exclude_subtype(&ty)
        });
    }

    fn constrain(
        &mut self,
        eq: &mut EqualityConstraints,
        heap_ref: HeapRef,
        holds_for_exact: impl FnOnce(&TS::Ty, &TS) -> bool,
        narrow: impl FnOnce(&TypeRegion<TS>) -> TypeRegion<TS>,
    ) {
        if self.contradicting {
            return;
        }

        let repr = eq.find(heap_ref);
        if repr.is_null() {
            // Null belongs to every reference type: constraints on a class
            // containing null hold vacuously.
            return;
        }
        if let HeapRef::Static(addr) = repr {
            // Concrete references are evaluated immediately against their
            // known exact type.
            let exact = self
                .concrete
                .get(&addr)
                .unwrap_or_else(|| panic!("unregistered static allocation @{addr}"));
            if !holds_for_exact(exact, self.type_system.as_ref()) {
                self.contradiction();
            }
            return;
        }

        let region = self.region_of_representative(repr);
        let narrowed = narrow(&region);
        if narrowed == region {
            return;
        }
        self.update_region(eq, repr, narrowed);
    }

    /// Store the narrowed region and feed provable non-aliasing back into
    /// the equality constraints.
    fn update_region(&mut self, eq: &mut EqualityConstraints, repr: HeapRef, region: TypeRegion<TS>) {
        if region.is_contradicting() {
            self.contradiction();
            return;
        }

        let newly_disjoint: Vec<HeapRef> = self
            .regions
            .iter()
            .filter(|(other, other_region)| {
                **other != repr && region.intersect(other_region).is_contradicting()
            })
            .map(|(other, _)| *other)
            .collect();

        self.regions.insert(repr, region, self.ownership);

        for other in newly_disjoint {
            // Disjoint types: the references can only coincide at null.
            eq.make_non_equal_or_both_null(repr, other);
        }
    }

    /// React to the merge of `from`'s equivalence class into `to`'s by
    /// intersecting their regions under the surviving name.
    pub fn on_merge(&mut self, eq: &mut EqualityConstraints, to: HeapRef, from: HeapRef) {
        if self.contradicting {
            return;
        }

        // Nested merges may have renamed `to` again before this event is
        // applied; key everything by the current representative.
        let to_repr = eq.find(to);

        if to_repr.is_null() {
            // The merged class is null: its type constraints hold
            // vacuously, drop the regions.
            self.regions.remove(&from, self.ownership);
            self.regions.remove(&to, self.ownership);
            return;
        }

        let Some(from_region) = self.regions.get(&from).cloned() else {
            return;
        };
        self.regions.remove(&from, self.ownership);

        if let HeapRef::Static(addr) = to_repr {
            let exact = self
                .concrete
                .get(&addr)
                .unwrap_or_else(|| panic!("unregistered static allocation @{addr}"));
            if !from_region.contains_exact(exact) {
                self.contradiction();
            }
            return;
        }

        let to_region = self.region_of_representative(to_repr);
        let merged = to_region.intersect(&from_region);
        self.update_region(eq, to_repr, merged);
    }

    /// Verify a model produced by the external solver.
    ///
    /// Symbolic references are grouped by the concrete address the model
    /// assigns them; the regions of each group are intersected. A group
    /// whose intersection dies yields a refinement request; otherwise one
    /// concrete type is picked per address, enumerating at most `budget`
    /// candidate types per group.
    pub fn verify(
        &self,
        eq: &EqualityConstraints,
        store: &mut TermStore<TS::Ty>,
        model: &impl AddressModel,
        budget: usize,
    ) -> Result<TypeAssignment<TS::Ty>, VerifyError> {
        if self.contradicting {
            return Err(VerifyError::Unsat);
        }

        let mut groups: HashMap<ConcreteAddr, Vec<HeapRef>> = HashMap::new();
        for (heap_ref, _) in self.regions.iter() {
            let addr = model.address_of(eq.find(*heap_ref));
            groups.entry(addr).or_default().push(*heap_ref);
        }

        let mut refinements: Vec<TermId> = Vec::new();
        let mut assignment: HashMap<ConcreteAddr, TS::Ty> = HashMap::new();

        for (addr, members) in &groups {
            let mut running = match self.concrete.get(addr) {
                Some(exact) => TypeRegion::from_exact(Arc::clone(&self.type_system), exact.clone()),
                None => TypeRegion::top(Arc::clone(&self.type_system)),
            };
            let mut folded: Vec<HeapRef> = Vec::new();
            let mut conflict = false;

            for &member in members {
                let region = self.region_of_representative(member);
                let next = running.intersect(&region);
                if next.is_contradicting() {
                    refinements.extend(self.conflict_formulas(store, &folded, member, &region));
                    conflict = true;
                    break;
                }
                running = next;
                folded.push(member);
            }

            if conflict {
                continue;
            }

            if let Some(exact) = self.concrete.get(addr) {
                assignment.insert(*addr, exact.clone());
                continue;
            }

            let supertypes: Vec<TS::Ty> = running.supertypes().iter().cloned().collect();
            let not_supertypes: Vec<TS::Ty> = running.not_supertypes().iter().cloned().collect();
            let subtypes: Vec<TS::Ty> = running.subtypes().iter().cloned().collect();
            let not_subtypes: Vec<TS::Ty> = running.not_subtypes().iter().cloned().collect();

            match self.type_system.types_satisfying(
                &supertypes,
                &not_supertypes,
                &subtypes,
                &not_subtypes,
                budget,
            ) {
                TypesResult::Types(types) => {
                    let chosen = types.into_iter().next().expect("non-empty by contract");
                    assignment.insert(*addr, chosen);
                }
                TypesResult::Empty => return Err(VerifyError::Unsat),
                TypesResult::Undecided => return Err(VerifyError::Undecided),
            }
        }

        if !refinements.is_empty() {
            debug!(count = refinements.len(), "model rejected; requesting refinement");
            return Err(VerifyError::Refinement(refinements));
        }

        Ok(TypeAssignment { types: assignment })
    }

    /// Disequality formulas separating `conflicting` from the references it
    /// cannot share an address with.
    fn conflict_formulas(
        &self,
        store: &mut TermStore<TS::Ty>,
        folded: &[HeapRef],
        conflicting: HeapRef,
        conflicting_region: &TypeRegion<TS>,
    ) -> Vec<TermId> {
        let pairwise: Vec<HeapRef> = folded
            .iter()
            .copied()
            .filter(|other| {
                self.region_of_representative(*other)
                    .intersect(conflicting_region)
                    .is_contradicting()
            })
            .collect();

        let sources: &[HeapRef] = if pairwise.is_empty() { folded } else { &pairwise };
        let mut disequalities = Vec::with_capacity(sources.len());
        for &other in sources {
            let lhs = store.mk_ref(other);
            let rhs = store.mk_ref(conflicting);
            let eq_term = store.mk_eq(lhs, rhs);
            disequalities.push(store.mk_not(eq_term));
        }

        if pairwise.is_empty() {
            // Only the accumulated combination is contradictory: at least
            // one of the group members must move away.
            vec![store.mk_or(disequalities)]
        } else {
            disequalities
        }
    }

    /// Create an independent copy sharing unmodified substructure.
    pub fn clone_with(&mut self, this_owner: Ownership, clone_owner: Ownership) -> Self {
        self.ownership = this_owner;
        TypeConstraints {
            type_system: Arc::clone(&self.type_system),
            regions: self.regions.clone(),
            concrete: self.concrete.clone(),
            contradicting: self.contradicting,
            ownership: clone_owner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ty, TestTy, TestTypeSystem};

    struct FixedModel(HashMap<HeapRef, ConcreteAddr>);

    impl AddressModel for FixedModel {
        fn address_of(&self, heap_ref: HeapRef) -> ConcreteAddr {
            self.0.get(&heap_ref).copied().unwrap_or(0)
        }
    }

    fn sym(id: u32) -> HeapRef {
        HeapRef::Symbolic(id)
    }

    fn setup() -> (TypeConstraints<TestTypeSystem>, EqualityConstraints) {
        let token = Ownership::new();
        (
            TypeConstraints::new(Arc::new(TestTypeSystem), token),
            EqualityConstraints::new(token),
        )
    }

    fn drain(types: &mut TypeConstraints<TestTypeSystem>, eq: &mut EqualityConstraints) {
        loop {
            let events = eq.take_merge_events();
            if events.is_empty() {
                return;
            }
            for merge in events {
                types.on_merge(eq, merge.to, merge.from);
            }
        }
    }

    #[test]
    fn narrowing_and_merge_intersection() {
        let (mut types, mut eq) = setup();
        types.add_supertype(&mut eq, sym(0), ty("A"));
        types.add_supertype(&mut eq, sym(1), ty("I"));
        assert!(!types.is_contradicting());

        eq.make_equal(sym(0), sym(1));
        drain(&mut types, &mut eq);
        assert!(!types.is_contradicting());

        // The merged class must be both under A and under I, which only B
        // satisfies.
        let repr = eq.find(sym(0));
        let region = types.region_of(&eq, repr);
        assert!(region.contains_exact(&ty("B")));
        assert!(!region.contains_exact(&ty("D")));
        assert!(!region.contains_exact(&ty("A")));
    }

    #[test]
    fn merge_of_disjoint_regions_collapses_to_null() {
        let (mut types, mut eq) = setup();
        types.add_supertype(&mut eq, sym(0), ty("A"));
        types.add_supertype(&mut eq, sym(1), ty("D"));

        // The only models in which the references can be equal have both
        // null; the merge forces that, without a contradiction.
        eq.make_equal(sym(0), sym(1));
        drain(&mut types, &mut eq);
        assert!(!types.is_contradicting());
        assert!(!eq.is_contradicting());
        assert!(eq.is_null(sym(0)));
    }

    #[test]
    fn merge_of_disjoint_non_null_regions_contradicts() {
        let (mut types, mut eq) = setup();
        types.add_supertype(&mut eq, sym(0), ty("A"));
        eq.make_non_equal(sym(0), HeapRef::Null);
        types.add_supertype(&mut eq, sym(1), ty("D"));

        // With one side known non-null the type disjointness became a hard
        // disequality, so the merge is impossible.
        eq.make_equal(sym(0), sym(1));
        drain(&mut types, &mut eq);
        assert!(eq.is_contradicting());
    }

    #[test]
    fn disjoint_regions_feed_back_nullable_disequality() {
        let (mut types, mut eq) = setup();
        types.add_supertype(&mut eq, sym(0), ty("A"));
        // D's region is disjoint from A's: single-inheritance classes.
        types.add_supertype(&mut eq, sym(1), ty("D"));

        assert!(!types.is_contradicting());
        let nullable: Vec<_> = eq.nullable_disequalities().collect();
        assert!(nullable.contains(&(sym(0), sym(1))) || nullable.contains(&(sym(1), sym(0))));
    }

    #[test]
    fn static_refs_check_immediately() {
        let (mut types, mut eq) = setup();
        types.allocate(&mut eq, 1, ty("B"));
        types.add_supertype(&mut eq, HeapRef::Static(1), ty("A"));
        assert!(!types.is_contradicting());
        types.add_supertype(&mut eq, HeapRef::Static(1), ty("D"));
        assert!(types.is_contradicting());
    }

    #[test]
    fn exclusion_on_static_refs() {
        let (mut types, mut eq) = setup();
        types.allocate(&mut eq, 1, ty("B"));
        types.exclude_supertype(&mut eq, HeapRef::Static(1), ty("D"));
        assert!(!types.is_contradicting());
        types.exclude_supertype(&mut eq, HeapRef::Static(1), ty("I"));
        assert!(types.is_contradicting());
    }

    #[test]
    fn merge_with_static_checks_region() {
        let (mut types, mut eq) = setup();
        types.allocate(&mut eq, 1, ty("B"));
        types.add_supertype(&mut eq, sym(0), ty("D"));
        eq.make_equal(sym(0), HeapRef::Static(1));
        drain(&mut types, &mut eq);
        // B is not under D.
        assert!(types.is_contradicting());
    }

    #[test]
    fn allocation_respects_symbolic_regions() {
        let (mut types, mut eq) = setup();
        // sym(0) must be under A; a D allocation cannot alias it.
        types.add_supertype(&mut eq, sym(0), ty("A"));
        eq.make_non_equal(sym(0), HeapRef::Null);

        types.allocate(&mut eq, 5, ty("D"));
        let clique: Vec<_> = eq.distinct_references().collect();
        // sym(0) stays in the clique: the new allocation is type-incompatible.
        assert!(clique.contains(&sym(0)));
        assert!(clique.contains(&HeapRef::Static(5)));
        assert!(eq.are_distinct(sym(0), HeapRef::Static(5)));
    }

    #[test]
    fn verify_assigns_types() {
        let (mut types, mut eq) = setup();
        let mut store = TermStore::<TestTy>::new();
        types.add_supertype(&mut eq, sym(0), ty("A"));
        types.add_supertype(&mut eq, sym(1), ty("I"));

        // The model puts both on the same address: needs a type under A and I.
        let model = FixedModel(HashMap::from_iter([(sym(0), 10), (sym(1), 10)]));
        let assignment = types
            .verify(&eq, &mut store, &model, 64)
            .expect("satisfiable");
        assert_eq!(assignment.type_at(10), Some(&ty("B")));
    }

    #[test]
    fn verify_requests_refinement_for_conflicting_grouping() {
        let (mut types, mut eq) = setup();
        let mut store = TermStore::<TestTy>::new();
        types.add_supertype(&mut eq, sym(0), ty("A"));
        types.add_supertype(&mut eq, sym(1), ty("D"));

        let model = FixedModel(HashMap::from_iter([(sym(0), 10), (sym(1), 10)]));
        let err = types
            .verify(&eq, &mut store, &model, 64)
            .expect_err("conflicting grouping");
        match err {
            VerifyError::Refinement(formulas) => assert!(!formulas.is_empty()),
            other => panic!("expected refinement, got {other:?}"),
        }
    }

    #[test]
    fn verify_reports_unsat_for_empty_class() {
        let (mut types, mut eq) = setup();
        let mut store = TermStore::<TestTy>::new();
        // J has no instantiable implementors.
        types.add_supertype(&mut eq, sym(0), ty("J"));

        let model = FixedModel(HashMap::from_iter([(sym(0), 10)]));
        let err = types.verify(&eq, &mut store, &model, 64).expect_err("unsat");
        assert_eq!(err, VerifyError::Unsat);
    }

    #[test]
    fn verify_reports_undecided_on_tiny_budget() {
        let (mut types, mut eq) = setup();
        let mut store = TermStore::<TestTy>::new();
        types.add_supertype(&mut eq, sym(0), ty("I"));

        let model = FixedModel(HashMap::from_iter([(sym(0), 10)]));
        // Budget 1 only examines Object, which is not under I.
        let err = types.verify(&eq, &mut store, &model, 1).expect_err("undecided");
        assert_eq!(err, VerifyError::Undecided);
    }

    #[test]
    fn clone_independence() {
        let (mut types, mut eq) = setup();
        types.add_supertype(&mut eq, sym(0), ty("A"));

        let mut fork_eq = eq.clone_with(Ownership::new(), Ownership::new());
        let mut fork = types.clone_with(Ownership::new(), Ownership::new());
        fork.add_supertype(&mut fork_eq, sym(0), ty("I"));

        let region = types.region_of(&eq, sym(0));
        assert!(region.contains_exact(&ty("C")));
        let fork_region = fork.region_of(&fork_eq, sym(0));
        assert!(!fork_region.contains_exact(&ty("C")));
        assert!(fork_region.contains_exact(&ty("B")));
    }
}
