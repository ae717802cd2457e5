//! Path constraints: the aggregator.
//!
//! Receives opaque boolean formulas from the interpreter, classifies them
//! and routes each to the sub-solver that can absorb it — equality
//! constraints for reference (dis)equalities, type constraints for
//! instance-of assertions, one numeric-constraints instance per bit width
//! for comparisons, and an opaque logical bucket for everything else.
//! Merge events produced by the equality constraints are forwarded to the
//! type constraints after every routed assertion, so the per-class state
//! stays keyed by representatives.

use std::sync::Arc;

use hashbrown::HashMap;
use symbex_core::{AddressModel, ConcreteAddr, HeapRef, IntIntervals, TermData, TermId, TermStore, TypeSystem};
use tracing::debug;

use crate::config::ConstraintsConfig;
use crate::cow::CowSet;
use crate::equality::EqualityConstraints;
use crate::numeric::NumericConstraints;
use crate::ownership::Ownership;
use crate::types::{TypeAssignment, TypeConstraints, VerifyError};

/// The opaque formula set: formulas no sub-theory can absorb, kept for the
/// external solver.
#[derive(Debug, Clone)]
pub struct LogicalConstraints {
    constraints: CowSet<TermId>,
    contradicting: bool,
    ownership: Ownership,
}

impl LogicalConstraints {
    fn new(ownership: Ownership) -> Self {
        LogicalConstraints {
            constraints: CowSet::new(ownership),
            contradicting: false,
            ownership,
        }
    }

    /// True if `false` or a pair of complementary formulas was asserted.
    #[must_use]
    pub fn is_contradicting(&self) -> bool {
        self.contradicting
    }

    /// The accumulated formulas (unspecified order).
    pub fn iter(&self) -> impl Iterator<Item = TermId> + '_ {
        self.constraints.iter().copied()
    }

    fn add<T: symbex_core::TypeName>(&mut self, store: &mut TermStore<T>, formula: TermId) {
        if self.contradicting || store.is_true(formula) || self.constraints.contains(&formula) {
            return;
        }
        let negated = store.mk_not(formula);
        if store.is_false(formula) || self.constraints.contains(&negated) {
            debug!("logical constraints latched contradicting");
            self.contradicting = true;
            return;
        }
        self.constraints.insert(formula, self.ownership);
    }

    fn clone_with(&mut self, this_owner: Ownership, clone_owner: Ownership) -> Self {
        self.ownership = this_owner;
        LogicalConstraints {
            constraints: self.constraints.clone(),
            contradicting: self.contradicting,
            ownership: clone_owner,
        }
    }
}

/// Mutable representation of one execution state's path constraints.
pub struct PathConstraints<TS: TypeSystem> {
    config: ConstraintsConfig,
    logical: LogicalConstraints,
    equality: EqualityConstraints,
    types: TypeConstraints<TS>,
    numeric: HashMap<u32, NumericConstraints>,
    ownership: Ownership,
}

impl<TS: TypeSystem> PathConstraints<TS> {
    /// Empty path constraints over the given type system.
    #[must_use]
    pub fn new(type_system: Arc<TS>) -> Self {
        Self::with_config(type_system, ConstraintsConfig::default())
    }

    /// Empty path constraints with explicit configuration.
    #[must_use]
    pub fn with_config(type_system: Arc<TS>, config: ConstraintsConfig) -> Self {
        let ownership = Ownership::new();
        PathConstraints {
            config,
            logical: LogicalConstraints::new(ownership),
            equality: EqualityConstraints::new(ownership),
            types: TypeConstraints::new(type_system, ownership),
            numeric: HashMap::new(),
            ownership,
        }
    }

    /// The equality constraints view.
    #[must_use]
    pub fn equality(&self) -> &EqualityConstraints {
        &self.equality
    }

    /// The type constraints view.
    #[must_use]
    pub fn types(&self) -> &TypeConstraints<TS> {
        &self.types
    }

    /// The opaque logical formula set.
    #[must_use]
    pub fn logical(&self) -> &LogicalConstraints {
        &self.logical
    }

    /// The numeric constraints for `width`, if any were asserted.
    #[must_use]
    pub fn numeric(&self, width: u32) -> Option<&NumericConstraints> {
        self.numeric.get(&width)
    }

    /// True if the accumulated path condition is unsatisfiable.
    #[must_use]
    pub fn is_false(&self) -> bool {
        self.logical.is_contradicting()
            || self.equality.is_contradicting()
            || self.types.is_contradicting()
            || self.numeric.values().any(NumericConstraints::is_contradicting)
    }

    /// Register a fresh concrete allocation with its exact type.
    pub fn allocate(&mut self, addr: ConcreteAddr, ty: TS::Ty) {
        self.types.allocate(&mut self.equality, addr, ty);
        self.drain_merge_events();
    }

    /// Assert one branch condition.
    pub fn assert_constraint(&mut self, store: &mut TermStore<TS::Ty>, formula: TermId) {
        match store.get(formula).clone() {
            TermData::True => {}
            TermData::False => self.logical.add(store, formula),

            TermData::Eq(lhs, rhs) => match (store.get(lhs), store.get(rhs)) {
                (&TermData::Ref(a), &TermData::Ref(b)) => {
                    self.route_ref_equality(a, b);
                }
                _ if store.sort(lhs).bv_width().is_some() => {
                    self.route_numeric(store, formula, false);
                }
                _ => self.logical.add(store, formula),
            },

            TermData::BvSignedLt(_, _) | TermData::BvSignedLe(_, _) => {
                self.route_numeric(store, formula, false);
            }

            TermData::IsSubtype { heap_ref, ty } => {
                self.types.add_supertype(&mut self.equality, heap_ref, ty);
                self.drain_merge_events();
            }
            TermData::IsSupertype { heap_ref, ty } => {
                self.types.add_subtype(&mut self.equality, heap_ref, ty);
                self.drain_merge_events();
            }

            TermData::And(args) => {
                for arg in args {
                    self.assert_constraint(store, arg);
                }
            }

            TermData::Not(inner) => match store.get(inner).clone() {
                TermData::Eq(lhs, rhs) => match (store.get(lhs), store.get(rhs)) {
                    (&TermData::Ref(a), &TermData::Ref(b)) => {
                        self.equality.make_non_equal(a, b);
                        self.drain_merge_events();
                    }
                    _ if store.sort(lhs).bv_width().is_some() => {
                        self.route_numeric(store, inner, true);
                    }
                    _ => self.logical.add(store, formula),
                },
                TermData::BvSignedLt(_, _) | TermData::BvSignedLe(_, _) => {
                    self.route_numeric(store, inner, true);
                }
                TermData::IsSubtype { heap_ref, ty } => {
                    self.types.exclude_supertype(&mut self.equality, heap_ref, ty);
                    self.drain_merge_events();
                }
                TermData::IsSupertype { heap_ref, ty } => {
                    self.types.exclude_subtype(&mut self.equality, heap_ref, ty);
                    self.drain_merge_events();
                }
                TermData::Or(args) => {
                    // Push the negation through the disjunction.
                    for arg in args {
                        let negated = store.mk_not(arg);
                        self.assert_constraint(store, negated);
                    }
                }
                _ => self.logical.add(store, formula),
            },

            _ => self.logical.add(store, formula),
        }
    }

    fn route_ref_equality(&mut self, a: HeapRef, b: HeapRef) {
        // Equalities between concretely decidable refs fold to literals in
        // the term store and never reach this point.
        self.equality.make_equal(a, b);
        self.drain_merge_events();
    }

    fn route_numeric(&mut self, store: &mut TermStore<TS::Ty>, formula: TermId, negated: bool) {
        let width = match store.get(formula) {
            TermData::Eq(lhs, _) => store.bv_width(*lhs),
            TermData::BvSignedLt(lhs, _) | TermData::BvSignedLe(lhs, _) => store.bv_width(*lhs),
            _ => unreachable!("caller checked the shape"),
        };
        let ownership = self.ownership;
        let numeric = self
            .numeric
            .entry(width)
            .or_insert_with(|| NumericConstraints::new(width, ownership));
        if negated {
            numeric.add_negated_numeric_constraint(store, formula);
        } else {
            numeric.add_numeric_constraint(store, formula);
        }
    }

    /// Forward pending equality merges to the structures keyed by
    /// representatives, until none are produced anymore.
    fn drain_merge_events(&mut self) {
        loop {
            let events = self.equality.take_merge_events();
            if events.is_empty() {
                return;
            }
            for merge in events {
                self.types.on_merge(&mut self.equality, merge.to, merge.from);
            }
        }
    }

    /// The interval of possible values of a bit-vector expression.
    pub fn eval_interval(&mut self, store: &mut TermStore<TS::Ty>, expr: TermId) -> IntIntervals {
        let width = store.bv_width(expr);
        let ownership = self.ownership;
        self.numeric
            .entry(width)
            .or_insert_with(|| NumericConstraints::new(width, ownership))
            .eval_interval(store, expr)
    }

    /// The accumulated formula set for the external solver: the opaque
    /// formulas plus the equality and numeric emissions.
    pub fn constraints(&self, store: &mut TermStore<TS::Ty>) -> Vec<TermId> {
        let mut out: Vec<TermId> = self.logical.iter().collect();
        out.extend(self.equality.emit(store));
        for numeric in self.numeric.values() {
            out.extend(numeric.emit(store));
        }
        out
    }

    /// The accumulated formulas, mapped into the solver's term language by
    /// a caller-supplied translator.
    pub fn translated<S>(
        &self,
        store: &mut TermStore<TS::Ty>,
        mut translate: impl FnMut(TermId) -> S,
    ) -> Vec<S> {
        self.constraints(store).into_iter().map(&mut translate).collect()
    }

    /// Verify a model against the type constraints (see
    /// [`TypeConstraints::verify`]).
    pub fn verify_types(
        &self,
        store: &mut TermStore<TS::Ty>,
        model: &impl AddressModel,
    ) -> Result<TypeAssignment<TS::Ty>, VerifyError> {
        self.types
            .verify(&self.equality, store, model, self.config.type_query_budget)
    }

    /// Fork this state's constraints: both copies get fresh ownership
    /// tokens and share all unmodified substructure. Merge-event routing
    /// needs no re-subscription; the fork drains its own events.
    pub fn fork(&mut self) -> Self {
        let this_owner = Ownership::new();
        let fork_owner = Ownership::new();

        let logical = self.logical.clone_with(this_owner, fork_owner);
        let equality = self.equality.clone_with(this_owner, fork_owner);
        let types = self.types.clone_with(this_owner, fork_owner);
        let numeric = self
            .numeric
            .iter_mut()
            .map(|(width, nc)| (*width, nc.clone_with(this_owner, fork_owner)))
            .collect();

        self.ownership = this_owner;
        PathConstraints {
            config: self.config.clone(),
            logical,
            equality,
            types,
            numeric,
            ownership: fork_owner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ty, TestTy, TestTypeSystem};

    type Store = TermStore<TestTy>;

    fn sym(id: u32) -> HeapRef {
        HeapRef::Symbolic(id)
    }

    fn setup() -> (PathConstraints<TestTypeSystem>, Store) {
        (
            PathConstraints::new(Arc::new(TestTypeSystem)),
            Store::new(),
        )
    }

    #[test]
    fn end_to_end_reference_scenario() {
        let (mut pc, mut store) = setup();
        let a = store.mk_ref(sym(0));
        let b = store.mk_ref(sym(1));
        let null = store.mk_ref(HeapRef::Null);

        let a_eq_null = store.mk_eq(a, null);
        let a_not_null = store.mk_not(a_eq_null);
        pc.assert_constraint(&mut store, a_not_null);

        let a_eq_b = store.mk_eq(a, b);
        pc.assert_constraint(&mut store, a_eq_b);

        let b_eq_null = store.mk_eq(b, null);
        let b_not_null = store.mk_not(b_eq_null);
        pc.assert_constraint(&mut store, b_not_null);

        assert!(!pc.is_false());
        assert!(pc.equality().are_equal(sym(0), sym(1)));
        assert!(pc.equality().are_distinct(sym(0), HeapRef::Null));

        pc.assert_constraint(&mut store, a_eq_null);
        assert!(pc.is_false());
    }

    #[test]
    fn numeric_routing_by_width() {
        let (mut pc, mut store) = setup();
        let x = store.mk_bv_var("x", 32);
        let five = store.mk_bv(32, 5);
        let four = store.mk_bv(32, 4);

        let ge = store.mk_bv_sge(x, five);
        pc.assert_constraint(&mut store, ge);
        assert!(!pc.is_false());
        assert!(pc.numeric(32).is_some());
        assert!(pc.numeric(8).is_none());

        let le = store.mk_bv_sle(x, four);
        pc.assert_constraint(&mut store, le);
        assert!(pc.is_false());
    }

    #[test]
    fn instance_of_routing() {
        let (mut pc, mut store) = setup();
        let is_a = store.mk_is_subtype(sym(0), ty("A"));
        pc.assert_constraint(&mut store, is_a);
        assert!(!pc.is_false());

        let is_d = store.mk_is_subtype(sym(0), ty("D"));
        pc.assert_constraint(&mut store, is_d);
        assert!(pc.is_false());
    }

    #[test]
    fn negated_instance_of_routing() {
        let (mut pc, mut store) = setup();
        let is_a = store.mk_is_subtype(sym(0), ty("A"));
        pc.assert_constraint(&mut store, is_a);
        let not_a = store.mk_not(is_a);
        pc.assert_constraint(&mut store, not_a);
        assert!(pc.is_false());
    }

    #[test]
    fn conjunctions_distribute() {
        let (mut pc, mut store) = setup();
        let a = store.mk_ref(sym(0));
        let b = store.mk_ref(sym(1));
        let x = store.mk_bv_var("x", 32);
        let seven = store.mk_bv(32, 7);

        let eq_refs = store.mk_eq(a, b);
        let eq_num = store.mk_eq(x, seven);
        let both = store.mk_and(vec![eq_refs, eq_num]);
        pc.assert_constraint(&mut store, both);

        assert!(pc.equality().are_equal(sym(0), sym(1)));
        let interval = pc.eval_interval(&mut store, x);
        assert_eq!(interval.as_point(), Some(7));
    }

    #[test]
    fn negated_disjunction_distributes() {
        let (mut pc, mut store) = setup();
        let a = store.mk_ref(sym(0));
        let b = store.mk_ref(sym(1));
        let x = store.mk_bv_var("x", 32);
        let five = store.mk_bv(32, 5);

        // not (a == b || x < 5) asserts a != b and x >= 5.
        let eq_refs = store.mk_eq(a, b);
        let lt = store.mk_bv_slt(x, five);
        let disj = store.mk_or(vec![eq_refs, lt]);
        let negated = store.mk_not(disj);
        pc.assert_constraint(&mut store, negated);

        assert!(!pc.is_false());
        assert!(pc.equality().are_distinct(sym(0), sym(1)));
        let interval = pc.eval_interval(&mut store, x);
        assert!(!interval.contains(4));
        assert!(interval.contains(5));
    }

    #[test]
    fn opaque_formula_negation_contradicts() {
        let (mut pc, mut store) = setup();
        let a = store.mk_ref(sym(0));
        let b = store.mk_ref(sym(1));
        let c = store.mk_ref(sym(2));

        let distinct = store.mk_distinct(vec![a, b, c]);
        pc.assert_constraint(&mut store, distinct);
        assert!(!pc.is_false());

        // Re-asserting is a no-op.
        pc.assert_constraint(&mut store, distinct);
        assert_eq!(pc.logical().iter().count(), 1);

        let negated = store.mk_not(distinct);
        pc.assert_constraint(&mut store, negated);
        assert!(pc.is_false());
    }

    #[test]
    fn false_literal_latches() {
        let (mut pc, mut store) = setup();
        let t = store.true_term();
        pc.assert_constraint(&mut store, t);
        assert!(!pc.is_false());
        let f = store.false_term();
        pc.assert_constraint(&mut store, f);
        assert!(pc.is_false());
    }

    #[test]
    fn type_narrowing_feeds_equality() {
        let (mut pc, mut store) = setup();
        // Disjoint class constraints first, then an equality between the
        // refs: the nullable disequality forces both refs to null.
        let is_a = store.mk_is_subtype(sym(0), ty("A"));
        let is_d = store.mk_is_subtype(sym(1), ty("D"));
        pc.assert_constraint(&mut store, is_a);
        pc.assert_constraint(&mut store, is_d);
        assert!(!pc.is_false());

        let a = store.mk_ref(sym(0));
        let b = store.mk_ref(sym(1));
        let eq = store.mk_eq(a, b);
        pc.assert_constraint(&mut store, eq);

        // Types A and D admit no common non-null value, so the merge can
        // only survive with both references null.
        assert!(!pc.is_false());
        assert!(pc.equality().is_null(sym(0)));
        assert!(pc.equality().is_null(sym(1)));
    }

    #[test]
    fn fork_independence() {
        let (mut pc, mut store) = setup();
        let a = store.mk_ref(sym(0));
        let b = store.mk_ref(sym(1));
        let x = store.mk_bv_var("x", 32);
        let five = store.mk_bv(32, 5);

        let eq = store.mk_eq(a, b);
        pc.assert_constraint(&mut store, eq);
        let ge = store.mk_bv_sge(x, five);
        pc.assert_constraint(&mut store, ge);
        let is_a = store.mk_is_subtype(sym(0), ty("A"));
        pc.assert_constraint(&mut store, is_a);

        let mut fork = pc.fork();
        let null = store.mk_ref(HeapRef::Null);
        let a_eq_null = store.mk_eq(a, null);
        fork.assert_constraint(&mut store, a_eq_null);
        let three = store.mk_bv(32, 3);
        let le = store.mk_bv_sle(x, three);
        fork.assert_constraint(&mut store, le);

        // The fork collapsed; the source is untouched.
        assert!(fork.is_false());
        assert!(!pc.is_false());
        assert!(pc.equality().are_equal(sym(0), sym(1)));
        let interval = pc.eval_interval(&mut store, x);
        assert!(interval.contains(5));
        assert!(!interval.contains(4));
    }

    #[test]
    fn constraints_emission_covers_all_theories() {
        let (mut pc, mut store) = setup();
        let a = store.mk_ref(sym(0));
        let b = store.mk_ref(sym(1));
        let x = store.mk_bv_var("x", 32);
        let five = store.mk_bv(32, 5);

        let eq = store.mk_eq(a, b);
        pc.assert_constraint(&mut store, eq);
        let ge = store.mk_bv_sge(x, five);
        pc.assert_constraint(&mut store, ge);
        let c = store.mk_ref(sym(2));
        let distinct = store.mk_distinct(vec![a, b, c]);
        pc.assert_constraint(&mut store, distinct);

        let formulas = pc.constraints(&mut store);
        // The opaque distinct formula, one union-find equality, and one
        // primary numeric bound.
        assert!(formulas.contains(&distinct));
        let emitted_ge = store.mk_bv_sle(five, x);
        assert!(formulas.contains(&emitted_ge));
        assert!(formulas.len() >= 3);

        let translated = pc.translated(&mut store, |t| format!("{t}"));
        assert_eq!(translated.len(), formulas.len());
    }
}
