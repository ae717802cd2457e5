//! Numeric constraints over fixed-width bit-vectors.
//!
//! Manages and simplifies signed comparisons and (dis)equalities between
//! bit-vector terms of one width. Every incoming constraint is normalized
//! into a canonical linear sum of non-constant sub-terms plus an integer
//! bias; the relation is then recorded on the sum's [`BoundsConstraint`]
//! record, keyed by bias.
//!
//! Three structural simplifications keep the representation small:
//!
//! 1. *Equality collapse*: a term proven equal to a concrete value becomes
//!    a thin redirection; its accumulated relations are replayed onto the
//!    value and onto every dependent found through the watch list.
//! 2. *Term merge*: two sums proven equal (modulo bias) redirect the
//!    smaller record through the larger one.
//! 3. *Bound-chain elimination*: per-term bound lists against biased
//!    instances of one other term are pruned when an intermediate bias is
//!    implied by its neighbors within the overflow-safe distance.
//!
//! Propagation runs off an explicit queue of "this term's bound changed"
//! events and a reverse-dependency watch list. Overflow during bound
//! refinement is never a contradiction, only a lost refinement.

use std::sync::Arc;

use symbex_core::{BvValue, IntIntervals, Region, TermData, TermId, TermStore, TypeName};
use tracing::debug;

use crate::cow::{CowMap, CowSet};
use crate::ownership::Ownership;

/// A concrete bound or excluded value, tagged primary or derived.
///
/// Primary constraints entered through the public surface must be part of
/// the emitted formula set; derived ones are propagation artifacts and may
/// be dropped from output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ValueBound {
    value: BvValue,
    primary: bool,
}

/// A relation endpoint `terms + bias`, with strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TermBound {
    terms: TermId,
    bias: BvValue,
    strict: bool,
}

/// A multimap of term relations: each [`TermBound`] applies at a set of
/// biases of the owning record, with a reverse index by related term.
#[derive(Debug, Clone)]
struct TermBoundSet {
    by_bound: CowMap<TermBound, CowSet<BvValue>>,
    by_terms: CowMap<TermId, CowSet<TermBound>>,
    len: usize,
}

impl TermBoundSet {
    fn new(owner: Ownership) -> Self {
        TermBoundSet {
            by_bound: CowMap::new(owner),
            by_terms: CowMap::new(owner),
            len: 0,
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn biases_of(&self, bound: &TermBound) -> Vec<BvValue> {
        self.by_bound
            .get(bound)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn bounds_on(&self, terms: TermId) -> Vec<TermBound> {
        self.by_terms
            .get(&terms)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn entries(&self) -> Vec<(TermBound, Vec<BvValue>)> {
        self.by_bound
            .iter()
            .map(|(bound, biases)| (*bound, biases.iter().copied().collect()))
            .collect()
    }

    fn add(&mut self, bias: BvValue, bound: TermBound, token: Ownership) -> bool {
        let existing = self.by_bound.get(&bound);
        if existing.is_some_and(|set| set.contains(&bias)) {
            return false;
        }
        let fresh_bound = existing.map_or(true, |set| set.is_empty());
        self.by_bound
            .update(bound, CowSet::new(token), token, |set| {
                set.insert(bias, token);
            });
        if fresh_bound {
            self.len += 1;
            self.by_terms
                .update(bound.terms, CowSet::new(token), token, |set| {
                    set.insert(bound, token);
                });
        }
        true
    }

    fn remove(&mut self, bias: BvValue, bound: TermBound, token: Ownership) -> bool {
        let Some(set) = self.by_bound.get(&bound) else {
            return false;
        };
        if !set.contains(&bias) {
            return false;
        }
        let mut emptied = false;
        self.by_bound
            .update(bound, CowSet::new(token), token, |set| {
                set.remove(&bias, token);
                emptied = set.is_empty();
            });
        if emptied {
            self.by_bound.remove(&bound, token);
            self.len -= 1;
            self.by_terms
                .update(bound.terms, CowSet::new(token), token, |set| {
                    set.remove(&bound, token);
                });
        }
        true
    }

    fn drop_terms(&mut self, terms: TermId, token: Ownership) -> bool {
        let bounds = self.bounds_on(terms);
        if bounds.is_empty() {
            return false;
        }
        for bound in bounds {
            if self.by_bound.remove(&bound, token) {
                self.len -= 1;
            }
        }
        self.by_terms.remove(&terms, token);
        true
    }
}

/// Bound and disequality facts about one canonical sum of terms.
#[derive(Debug, Clone)]
struct BoundsConstraint {
    terms: TermId,
    /// Concrete inclusive lower bounds, one per bias.
    lower: CowMap<BvValue, ValueBound>,
    /// Concrete inclusive upper bounds, one per bias.
    upper: CowMap<BvValue, ValueBound>,
    /// Concrete disequalities, normalized to `terms + bias != 0`.
    diseq: CowMap<BvValue, ValueBound>,
    /// Lower bounds against other terms; always derived from the mirror
    /// upper bounds, omitted from output.
    term_lower: TermBoundSet,
    /// Upper bounds against other terms; primary.
    term_upper: TermBoundSet,
    /// Disequalities against other terms; primary.
    term_diseq: TermBoundSet,
}

impl BoundsConstraint {
    fn new(terms: TermId, owner: Ownership) -> Self {
        BoundsConstraint {
            terms,
            lower: CowMap::new(owner),
            upper: CowMap::new(owner),
            diseq: CowMap::new(owner),
            term_lower: TermBoundSet::new(owner),
            term_upper: TermBoundSet::new(owner),
            term_diseq: TermBoundSet::new(owner),
        }
    }

    fn lower_bound(&self, bias: BvValue) -> Option<ValueBound> {
        self.lower.get(&bias).copied()
    }

    fn upper_bound(&self, bias: BvValue) -> Option<ValueBound> {
        self.upper.get(&bias).copied()
    }

    /// Number of term relations; used to pick the merge direction.
    fn relation_count(&self) -> usize {
        self.term_lower.len() + self.term_upper.len() + self.term_diseq.len()
    }
}

/// A constraint record: live bounds, or a thin redirection left behind by
/// an equality collapse.
#[derive(Debug, Clone)]
enum Constraint {
    Bounds(Arc<BoundsConstraint>),
    /// `terms == value`.
    EqConst { value: BvValue },
    /// `terms + bias == equal`.
    EqTerms { bias: BvValue, equal: TermId },
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            // Records are immutable snapshots: identity is the cheap and
            // sufficient change check.
            (Constraint::Bounds(a), Constraint::Bounds(b)) => Arc::ptr_eq(a, b),
            (
                Constraint::EqConst { value: a },
                Constraint::EqConst { value: b },
            ) => a == b,
            (
                Constraint::EqTerms { bias: ab, equal: ae },
                Constraint::EqTerms { bias: bb, equal: be },
            ) => ab == bb && ae == be,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundsUpdate {
    Upper,
    Lower,
    Both,
}

#[derive(Debug, Clone, Copy)]
struct UpdateEvent {
    terms: TermId,
    bias: BvValue,
    kind: BoundsUpdate,
}

#[derive(Debug, Clone, Copy)]
enum ConstraintKind {
    Eq,
    Neq,
    Lt,
    Leq,
}

/// A record resolved through redirections: either live bounds with a bias
/// adjustment (`original == record + adjustment`... constraining the
/// original at bias `c` constrains the record at `c + adjustment`), or a
/// concrete value.
enum Resolved {
    Bounds(Arc<BoundsConstraint>, BvValue),
    Value(BvValue),
}

/// Incremental bound and disequality propagation over linear bit-vector
/// sums of one fixed width.
#[derive(Debug, Clone)]
pub struct NumericConstraints {
    width: u32,
    ownership: Ownership,
    constraints: CowMap<TermId, Constraint>,
    watch: CowMap<TermId, CowSet<TermId>>,
    queue: Vec<UpdateEvent>,
    contradicting: bool,
}

impl NumericConstraints {
    /// An empty constraint set over `width`-bit terms.
    #[must_use]
    pub fn new(width: u32, ownership: Ownership) -> Self {
        NumericConstraints {
            width,
            ownership,
            constraints: CowMap::new(ownership),
            watch: CowMap::new(ownership),
            queue: Vec::new(),
            contradicting: false,
        }
    }

    /// The bit width this instance handles.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// True if the accumulated constraints are unsatisfiable.
    #[must_use]
    pub fn is_contradicting(&self) -> bool {
        self.contradicting
    }

    /// Re-seat the ownership token (after the containing state forked).
    pub fn change_ownership(&mut self, ownership: Ownership) {
        self.ownership = ownership;
    }

    fn contradiction(&mut self) {
        if !self.contradicting {
            debug!(width = self.width, "numeric constraints latched contradicting");
        }
        self.contradicting = true;
    }

    fn zero(&self) -> BvValue {
        BvValue::zero(self.width)
    }

    /// True if `expr` is a relation this instance can absorb: `=`, signed
    /// `<` or `<=` (and their mirrored forms, which the term constructors
    /// normalize away) between terms of this width.
    #[must_use]
    pub fn is_numeric_constraint<T: TypeName>(&self, store: &TermStore<T>, expr: TermId) -> bool {
        self.recognize(store, expr).is_some()
    }

    fn recognize<T: TypeName>(
        &self,
        store: &TermStore<T>,
        expr: TermId,
    ) -> Option<(TermId, TermId, ConstraintKind)> {
        match *store.get(expr) {
            TermData::Eq(lhs, rhs) if store.sort(lhs).bv_width() == Some(self.width) => {
                Some((lhs, rhs, ConstraintKind::Eq))
            }
            TermData::BvSignedLt(lhs, rhs) if store.bv_width(lhs) == self.width => {
                Some((lhs, rhs, ConstraintKind::Lt))
            }
            TermData::BvSignedLe(lhs, rhs) if store.bv_width(lhs) == self.width => {
                Some((lhs, rhs, ConstraintKind::Leq))
            }
            _ => None,
        }
    }

    /// Add a numeric constraint.
    ///
    /// # Panics
    /// Panics if `expr` is not [`is_numeric_constraint`](Self::is_numeric_constraint).
    pub fn add_numeric_constraint<T: TypeName>(&mut self, store: &mut TermStore<T>, expr: TermId) {
        let (lhs, rhs, kind) = self
            .recognize(store, expr)
            .unwrap_or_else(|| panic!("not a numeric constraint: {expr}"));
        self.add_constraint(store, lhs, rhs, kind);
    }

    /// Add the negation of a numeric constraint.
    ///
    /// # Panics
    /// Panics if `expr` is not [`is_numeric_constraint`](Self::is_numeric_constraint).
    pub fn add_negated_numeric_constraint<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        expr: TermId,
    ) {
        let (lhs, rhs, kind) = self
            .recognize(store, expr)
            .unwrap_or_else(|| panic!("not a numeric constraint: {expr}"));
        match kind {
            ConstraintKind::Eq => self.add_constraint(store, lhs, rhs, ConstraintKind::Neq),
            // not (a < b) <=> b <= a
            ConstraintKind::Lt => self.add_constraint(store, rhs, lhs, ConstraintKind::Leq),
            // not (a <= b) <=> b < a
            ConstraintKind::Leq => self.add_constraint(store, rhs, lhs, ConstraintKind::Lt),
            ConstraintKind::Neq => unreachable!("recognize never yields Neq"),
        }
    }

    fn add_constraint<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        lhs: TermId,
        rhs: TermId,
        kind: ConstraintKind,
    ) {
        if self.contradicting {
            return;
        }

        let (lhs_terms, lhs_const) = self.collect_linear(store, lhs);
        let (rhs_terms, rhs_const) = self.collect_linear(store, rhs);

        match kind {
            ConstraintKind::Eq => self.add_equality(store, lhs_terms, lhs_const, rhs_terms, rhs_const),
            ConstraintKind::Neq => {
                self.add_disequality(store, lhs_terms, lhs_const, rhs_terms, rhs_const);
            }
            ConstraintKind::Lt => self.add_upper_bound(
                store, lhs_terms, lhs_const, rhs_terms, rhs_const, true, false,
            ),
            ConstraintKind::Leq => self.add_upper_bound(
                store, lhs_terms, lhs_const, rhs_terms, rhs_const, false, false,
            ),
        }

        self.propagate(store);
    }

    /// The possible values of `expr`: a point, an interval with finitely
    /// many excluded points, or the signed universe of this width.
    pub fn eval_interval<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        expr: TermId,
    ) -> IntIntervals {
        let universe = IntIntervals::closed(
            BvValue::min_signed(self.width).as_i64(),
            BvValue::max_signed(self.width).as_i64(),
        );

        let (terms, bias) = self.collect_linear(store, expr);
        let Some(terms) = terms else {
            return IntIntervals::point(bias.as_i64());
        };

        match self.resolve(terms) {
            None => universe,
            Some(Resolved::Value(value)) => IntIntervals::point(value.wrapping_add(bias).as_i64()),
            Some(Resolved::Bounds(record, adjustment)) => {
                let bias = bias.wrapping_add(adjustment);
                let record = self.actualize(&record, bias);

                let lower = record
                    .lower_bound(bias)
                    .map_or(BvValue::min_signed(self.width).as_i64(), |b| b.value.as_i64());
                let upper = record
                    .upper_bound(bias)
                    .map_or(BvValue::max_signed(self.width).as_i64(), |b| b.value.as_i64());

                let mut interval = IntIntervals::closed(lower, upper);
                for excluded in self.excluded_points(&record, bias) {
                    interval = interval.subtract(&IntIntervals::point(excluded.as_i64()));
                }
                interval
            }
        }
    }

    /// Create an independent copy sharing unmodified substructure. Pending
    /// refinement events stay with the source; they only tighten derived
    /// state.
    pub fn clone_with(&mut self, this_owner: Ownership, clone_owner: Ownership) -> Self {
        self.ownership = this_owner;
        NumericConstraints {
            width: self.width,
            ownership: clone_owner,
            constraints: self.constraints.clone(),
            watch: self.watch.clone(),
            queue: Vec::new(),
            contradicting: self.contradicting,
        }
    }

    // ------------------------------------------------------------------
    // Normalization
    // ------------------------------------------------------------------

    /// Rewrite `expr` as a canonical sum of non-constant terms plus a
    /// single accumulated bias. Additions, subtractions and negations are
    /// pushed down; everything else is an opaque leaf.
    fn collect_linear<T: TypeName>(
        &self,
        store: &mut TermStore<T>,
        expr: TermId,
    ) -> (Option<TermId>, BvValue) {
        debug_assert_eq!(store.bv_width(expr), self.width);

        let mut leaves = Vec::new();
        let mut bias = self.zero();
        self.collect_linear_into(store, expr, false, &mut leaves, &mut bias);

        leaves.sort_unstable();
        let sum = leaves
            .into_iter()
            .reduce(|acc, term| store.mk_bv_add(acc, term));
        (sum, bias)
    }

    fn collect_linear_into<T: TypeName>(
        &self,
        store: &mut TermStore<T>,
        expr: TermId,
        negated: bool,
        leaves: &mut Vec<TermId>,
        bias: &mut BvValue,
    ) {
        match *store.get(expr) {
            TermData::BvConst(value) => {
                let value = if negated { value.wrapping_neg() } else { value };
                *bias = bias.wrapping_add(value);
            }
            TermData::BvAdd(a, b) => {
                self.collect_linear_into(store, a, negated, leaves, bias);
                self.collect_linear_into(store, b, negated, leaves, bias);
            }
            TermData::BvSub(a, b) => {
                self.collect_linear_into(store, a, negated, leaves, bias);
                self.collect_linear_into(store, b, !negated, leaves, bias);
            }
            TermData::BvNeg(inner) => {
                self.collect_linear_into(store, inner, !negated, leaves, bias);
            }
            _ => {
                let leaf = if negated { store.mk_bv_neg(expr) } else { expr };
                leaves.push(leaf);
            }
        }
    }

    fn has_multiple_terms<T: TypeName>(store: &TermStore<T>, terms: TermId) -> bool {
        matches!(store.get(terms), TermData::BvAdd(_, _))
    }

    fn unit_terms<T: TypeName>(store: &TermStore<T>, terms: TermId) -> Vec<TermId> {
        let mut stack = vec![terms];
        let mut result = Vec::new();
        while let Some(term) = stack.pop() {
            match *store.get(term) {
                TermData::BvAdd(a, b) => {
                    stack.push(a);
                    stack.push(b);
                }
                _ => result.push(term),
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Record resolution
    // ------------------------------------------------------------------

    fn store_record(&mut self, record: Arc<BoundsConstraint>) {
        let terms = record.terms;
        self.constraints
            .insert(terms, Constraint::Bounds(record), self.ownership);
    }

    /// Follow redirections for `terms`, path-compressing chained term
    /// equalities.
    fn resolve(&mut self, terms: TermId) -> Option<Resolved> {
        loop {
            match self.constraints.get(&terms).cloned()? {
                Constraint::Bounds(record) => {
                    return Some(Resolved::Bounds(record, self.zero()));
                }
                Constraint::EqConst { value } => return Some(Resolved::Value(value)),
                Constraint::EqTerms { bias, equal } => {
                    match self
                        .constraints
                        .get(&equal)
                        .cloned()
                        .expect("redirection target exists")
                    {
                        Constraint::Bounds(record) => {
                            // terms + bias == equal: a constraint on terms
                            // at bias c lands on the record at c - bias.
                            return Some(Resolved::Bounds(record, self.zero().wrapping_sub(bias)));
                        }
                        Constraint::EqConst { value } => {
                            return Some(Resolved::Value(value.wrapping_sub(bias)));
                        }
                        Constraint::EqTerms { bias: next_bias, equal: next } => {
                            // Compress the chain and retry.
                            self.constraints.insert(
                                terms,
                                Constraint::EqTerms {
                                    bias: bias.wrapping_add(next_bias),
                                    equal: next,
                                },
                                self.ownership,
                            );
                        }
                    }
                }
            }
        }
    }

    fn resolve_or_create(&mut self, terms: TermId) -> Resolved {
        if let Some(resolved) = self.resolve(terms) {
            return resolved;
        }
        let record = Arc::new(BoundsConstraint::new(terms, self.ownership));
        self.store_record(Arc::clone(&record));
        Resolved::Bounds(record, self.zero())
    }

    fn constraint_updated(&mut self, terms: TermId, bias: BvValue, kind: BoundsUpdate) {
        self.queue.push(UpdateEvent { terms, bias, kind });
    }

    /// Register `terms` as a watcher of `dependency`, creating the
    /// dependency's record and its own unit-term watches on first sight.
    fn add_watch<T: TypeName>(&mut self, store: &TermStore<T>, terms: TermId, dependency: TermId) {
        if !self.constraints.contains_key(&dependency) {
            let record = Arc::new(BoundsConstraint::new(dependency, self.ownership));
            self.store_record(record);
        }

        let unseen = self.watch.get(&dependency).is_none();
        if unseen && Self::has_multiple_terms(store, dependency) {
            for unit in Self::unit_terms(store, dependency) {
                self.add_watch(store, dependency, unit);
            }
        }

        let token = self.ownership;
        self.watch
            .update(dependency, CowSet::new(token), token, |set| {
                set.insert(terms, token);
            });
    }

    // ------------------------------------------------------------------
    // Constraint entry points (by shape)
    // ------------------------------------------------------------------

    fn add_equality<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        lhs_terms: Option<TermId>,
        lhs_const: BvValue,
        rhs_terms: Option<TermId>,
        rhs_const: BvValue,
    ) {
        match (lhs_terms, rhs_terms) {
            (None, None) => {
                if lhs_const != rhs_const {
                    self.contradiction();
                }
            }
            (None, Some(rt)) => self.add_lhs_equality(store, rt, rhs_const, None, lhs_const),
            (Some(lt), _) => self.add_lhs_equality(store, lt, lhs_const, rhs_terms, rhs_const),
        }
    }

    fn add_lhs_equality<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        lhs_terms: TermId,
        lhs_const: BvValue,
        rhs_terms: Option<TermId>,
        rhs_const: BvValue,
    ) {
        match self.resolve_or_create(lhs_terms) {
            Resolved::Value(value) => {
                // value + lc == rt + rc: flip to constrain the right side.
                self.add_equality(store, rhs_terms, rhs_const, None, lhs_const.wrapping_add(value));
            }
            Resolved::Bounds(record, adjustment) => {
                let lhs_bias = lhs_const.wrapping_add(adjustment);
                match rhs_terms {
                    None => self.bind_record_to_value(&record, lhs_bias, rhs_const),
                    Some(rt) => self.bind_record_to_terms(store, &record, lhs_bias, rt, rhs_const),
                }
            }
        }
    }

    fn add_disequality<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        lhs_terms: Option<TermId>,
        lhs_const: BvValue,
        rhs_terms: Option<TermId>,
        rhs_const: BvValue,
    ) {
        match (lhs_terms, rhs_terms) {
            (None, None) => {
                if lhs_const == rhs_const {
                    self.contradiction();
                }
            }
            (None, Some(rt)) => self.add_lhs_disequality(store, rt, rhs_const, None, lhs_const),
            (Some(lt), _) => self.add_lhs_disequality(store, lt, lhs_const, rhs_terms, rhs_const),
        }
    }

    fn add_lhs_disequality<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        lhs_terms: TermId,
        lhs_const: BvValue,
        rhs_terms: Option<TermId>,
        rhs_const: BvValue,
    ) {
        match self.resolve_or_create(lhs_terms) {
            Resolved::Value(value) => {
                self.add_disequality(store, rhs_terms, rhs_const, None, lhs_const.wrapping_add(value));
            }
            Resolved::Bounds(record, adjustment) => {
                let lhs_bias = lhs_const.wrapping_add(adjustment);
                let updated = match rhs_terms {
                    None => self.rec_add_concrete_diseq(&record, lhs_bias, rhs_const, true),
                    Some(rt) => self.record_terms_disequality(store, &record, lhs_bias, rt, rhs_const),
                };
                if !Arc::ptr_eq(&updated, &record) {
                    self.store_record(updated);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_upper_bound<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        lhs_terms: Option<TermId>,
        lhs_const: BvValue,
        rhs_terms: Option<TermId>,
        rhs_const: BvValue,
        strict: bool,
        internal: bool,
    ) {
        match (lhs_terms, rhs_terms) {
            (None, None) => {
                if lhs_const.signed_gt(rhs_const) || (strict && lhs_const == rhs_const) {
                    self.contradiction();
                }
            }
            (None, Some(rt)) => {
                // rhs is an upper bound of a constant: the constant is a
                // lower bound of rhs.
                self.add_lhs_lower_concrete(store, rt, rhs_const, lhs_const, strict, internal);
            }
            (Some(lt), _) => {
                self.add_lhs_upper_bound(store, lt, lhs_const, rhs_terms, rhs_const, strict, internal);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_lower_bound_concrete<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        lhs_terms: Option<TermId>,
        lhs_const: BvValue,
        bound: BvValue,
        strict: bool,
        internal: bool,
    ) {
        match lhs_terms {
            None => {
                if lhs_const.signed_lt(bound) || (strict && lhs_const == bound) {
                    self.contradiction();
                }
            }
            Some(lt) => self.add_lhs_lower_concrete(store, lt, lhs_const, bound, strict, internal),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_lhs_lower_concrete<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        lhs_terms: TermId,
        lhs_const: BvValue,
        bound: BvValue,
        strict: bool,
        internal: bool,
    ) {
        match self.resolve_or_create(lhs_terms) {
            Resolved::Value(value) => {
                // value + lc >= bound: a pure concrete check.
                self.add_upper_bound(
                    store,
                    None,
                    bound,
                    None,
                    lhs_const.wrapping_add(value),
                    strict,
                    internal,
                );
            }
            Resolved::Bounds(record, adjustment) => {
                let bias = lhs_const.wrapping_add(adjustment);
                let updated = self.rec_add_concrete_lower(&record, bias, bound, strict, true);
                if !Arc::ptr_eq(&updated, &record) {
                    self.store_record(updated);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_lhs_upper_bound<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        lhs_terms: TermId,
        lhs_const: BvValue,
        rhs_terms: Option<TermId>,
        rhs_const: BvValue,
        strict: bool,
        internal: bool,
    ) {
        match self.resolve_or_create(lhs_terms) {
            Resolved::Value(value) => {
                // value + lc <= rt + rc: the value is a lower bound of rhs.
                self.add_lower_bound_concrete(
                    store,
                    rhs_terms,
                    rhs_const,
                    lhs_const.wrapping_add(value),
                    strict,
                    internal,
                );
            }
            Resolved::Bounds(record, adjustment) => {
                let lhs_bias = lhs_const.wrapping_add(adjustment);
                let updated = match rhs_terms {
                    None => self.rec_add_concrete_upper(&record, lhs_bias, rhs_const, strict, true),
                    Some(rt) => self.record_terms_upper_bound(
                        store, &record, lhs_bias, rt, rhs_const, strict, internal,
                    ),
                };
                if !Arc::ptr_eq(&updated, &record) {
                    self.store_record(updated);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Record-to-record relations
    // ------------------------------------------------------------------

    fn bind_record_to_terms<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        record: &Arc<BoundsConstraint>,
        lhs_bias: BvValue,
        rhs_terms: TermId,
        rhs_const: BvValue,
    ) {
        match self.resolve_or_create(rhs_terms) {
            Resolved::Value(value) => {
                self.bind_record_to_value(record, lhs_bias, rhs_const.wrapping_add(value));
            }
            Resolved::Bounds(rhs_record, rhs_adjustment) => {
                let rhs_bias = rhs_const.wrapping_add(rhs_adjustment);
                if Arc::ptr_eq(&rhs_record, record) {
                    // x + lc == x + rc
                    if lhs_bias != rhs_bias {
                        self.contradiction();
                    }
                    return;
                }
                // Redirect the record with fewer relations through the
                // other one.
                if record.relation_count() > rhs_record.relation_count() {
                    self.merge_equal_records(store, record, lhs_bias, &rhs_record, rhs_bias);
                } else {
                    self.merge_equal_records(store, &rhs_record, rhs_bias, record, lhs_bias);
                }
            }
        }
    }

    /// `destination + destination_bias == source + source_bias`: leave a
    /// thin redirection in place of `source` and replay its facts.
    fn merge_equal_records<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        destination: &Arc<BoundsConstraint>,
        destination_bias: BvValue,
        source: &Arc<BoundsConstraint>,
        source_bias: BvValue,
    ) {
        let bias = source_bias.wrapping_sub(destination_bias);
        self.constraints.insert(
            source.terms,
            Constraint::EqTerms {
                bias,
                equal: destination.terms,
            },
            self.ownership,
        );
        self.replay_term_equality(store, source, bias, destination);
    }

    /// `record + lhs_bias == value`: leave a concrete redirection and
    /// replay the record's facts onto the value.
    fn bind_record_to_value(
        &mut self,
        record: &Arc<BoundsConstraint>,
        lhs_bias: BvValue,
        rhs_const: BvValue,
    ) {
        let value = rhs_const.wrapping_sub(lhs_bias);
        self.constraints
            .insert(record.terms, Constraint::EqConst { value }, self.ownership);
        self.replay_value_equality(record, value);
    }

    fn record_terms_disequality<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        record: &Arc<BoundsConstraint>,
        lhs_bias: BvValue,
        rhs_terms: TermId,
        rhs_const: BvValue,
    ) -> Arc<BoundsConstraint> {
        match self.resolve_or_create(rhs_terms) {
            Resolved::Value(value) => {
                self.rec_add_concrete_diseq(record, lhs_bias, rhs_const.wrapping_add(value), true)
            }
            Resolved::Bounds(rhs_record, rhs_adjustment) => {
                let rhs_bias = rhs_const.wrapping_add(rhs_adjustment);
                if Arc::ptr_eq(&rhs_record, record) {
                    // x + lc != x + rc
                    if lhs_bias == rhs_bias {
                        self.contradiction();
                    }
                    return Arc::clone(record);
                }
                self.rec_add_terms_diseq(store, record, lhs_bias, &rhs_record, rhs_bias)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_terms_upper_bound<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        record: &Arc<BoundsConstraint>,
        lhs_bias: BvValue,
        rhs_terms: TermId,
        rhs_const: BvValue,
        strict: bool,
        internal: bool,
    ) -> Arc<BoundsConstraint> {
        match self.resolve_or_create(rhs_terms) {
            Resolved::Value(value) => self.rec_add_concrete_upper(
                record,
                lhs_bias,
                rhs_const.wrapping_add(value),
                strict,
                true,
            ),
            Resolved::Bounds(rhs_record, rhs_adjustment) => {
                let rhs_bias = rhs_const.wrapping_add(rhs_adjustment);
                if Arc::ptr_eq(&rhs_record, record) {
                    // (a + c0) <relation> (a + c1) has a fixed truth value;
                    // encode it as a concrete bound at the overflow margin.
                    let margin = if strict {
                        BvValue::min_signed(self.width)
                            .wrapping_add(lhs_bias.wrapping_sub(rhs_bias))
                    } else {
                        BvValue::max_signed(self.width)
                            .wrapping_add(lhs_bias.wrapping_sub(rhs_bias))
                    };
                    return self.rec_add_concrete_upper(record, lhs_bias, margin, strict, true);
                }

                let updated =
                    self.rec_add_terms_upper(store, record, lhs_bias, &rhs_record, rhs_bias, strict);
                if !internal && !Arc::ptr_eq(&updated, record) {
                    self.store_record(Arc::clone(&updated));

                    // Mirror the relation as an inferred lower bound on rhs.
                    let rhs_updated = self.rec_add_terms_inferred_lower(
                        store, &rhs_record, rhs_bias, &updated, lhs_bias, strict,
                    );
                    if !Arc::ptr_eq(&rhs_updated, &rhs_record) {
                        self.store_record(rhs_updated);
                    }
                }
                updated
            }
        }
    }

    // ------------------------------------------------------------------
    // Concrete bound updates on one record
    // ------------------------------------------------------------------

    fn rec_add_concrete_upper(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        value: BvValue,
        strict: bool,
        primary: bool,
    ) -> Arc<BoundsConstraint> {
        let value = if strict {
            if value.is_min_signed() {
                self.contradiction();
                return Arc::clone(record);
            }
            value.wrapping_sub(BvValue::one(self.width))
        } else {
            value
        };
        self.rec_add_concrete_upper_val(record, bias, value, primary)
    }

    fn rec_add_concrete_lower(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        value: BvValue,
        strict: bool,
        primary: bool,
    ) -> Arc<BoundsConstraint> {
        let value = if strict {
            if value.is_max_signed() {
                self.contradiction();
                return Arc::clone(record);
            }
            value.wrapping_add(BvValue::one(self.width))
        } else {
            value
        };
        self.rec_add_concrete_lower_val(record, bias, value, primary)
    }

    fn rec_add_concrete_upper_val(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        value: BvValue,
        primary: bool,
    ) -> Arc<BoundsConstraint> {
        let record = self.refine_from_ground(record, bias);
        self.update_concrete_upper(&record, bias, value, primary)
    }

    fn rec_add_concrete_lower_val(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        value: BvValue,
        primary: bool,
    ) -> Arc<BoundsConstraint> {
        let record = self.refine_from_ground(record, bias);
        self.update_concrete_lower(&record, bias, value, primary)
    }

    fn rec_add_concrete_diseq(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        value: BvValue,
        primary: bool,
    ) -> Arc<BoundsConstraint> {
        let record = self.refine_from_ground(record, bias);
        self.update_concrete_diseq(&record, bias, value, primary)
    }

    fn update_concrete_upper(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        value: BvValue,
        primary: bool,
    ) -> Arc<BoundsConstraint> {
        if let Some(lower) = record.lower_bound(bias) {
            if lower.value.signed_gt(value) {
                self.contradiction();
                return Arc::clone(record);
            }
        }

        if let Some(upper) = record.upper_bound(bias) {
            if upper.value.signed_lt(value) {
                return Arc::clone(record);
            }
            if upper.value == value {
                // Same bound, possibly upgraded to primary.
                if primary && !upper.primary {
                    let mut copy = (**record).clone();
                    copy.upper
                        .insert(bias, ValueBound { value, primary: true }, self.ownership);
                    return Arc::new(copy);
                }
                return Arc::clone(record);
            }
        }

        self.add_refined_concrete_upper(record, bias, ValueBound { value, primary })
    }

    fn update_concrete_lower(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        value: BvValue,
        primary: bool,
    ) -> Arc<BoundsConstraint> {
        if let Some(upper) = record.upper_bound(bias) {
            if upper.value.signed_lt(value) {
                self.contradiction();
                return Arc::clone(record);
            }
        }

        if let Some(lower) = record.lower_bound(bias) {
            if lower.value.signed_gt(value) {
                return Arc::clone(record);
            }
            if lower.value == value {
                if primary && !lower.primary {
                    let mut copy = (**record).clone();
                    copy.lower
                        .insert(bias, ValueBound { value, primary: true }, self.ownership);
                    return Arc::new(copy);
                }
                return Arc::clone(record);
            }
        }

        self.add_refined_concrete_lower(record, bias, ValueBound { value, primary })
    }

    fn update_concrete_diseq(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        value: BvValue,
        primary: bool,
    ) -> Arc<BoundsConstraint> {
        if let Some(upper) = record.upper_bound(bias) {
            if upper.value.signed_lt(value) {
                return Arc::clone(record);
            }
        }
        if let Some(lower) = record.lower_bound(bias) {
            if lower.value.signed_gt(value) {
                return Arc::clone(record);
            }
        }

        // One disequality per bias: shift so the excluded value is zero.
        if !value.is_zero() {
            return self.rec_add_concrete_diseq(record, bias.wrapping_sub(value), self.zero(), primary);
        }

        if let Some(current) = record.diseq.get(&bias) {
            if current.primary || !primary {
                return Arc::clone(record);
            }
        }

        let mut copy = (**record).clone();
        copy.diseq
            .insert(bias, ValueBound { value, primary }, self.ownership);
        Arc::new(copy)
    }

    fn excluded_points(&self, record: &BoundsConstraint, bias: BvValue) -> Vec<BvValue> {
        record
            .diseq
            .iter()
            .map(|(diseq_bias, _)| bias.wrapping_sub(*diseq_bias))
            .collect()
    }

    // ------------------------------------------------------------------
    // Ground-bias refinement
    // ------------------------------------------------------------------

    /// Transfer bounds between the ground (zero) bias and `bias` when the
    /// shift cannot overflow. Overflow means no refinement, never a
    /// contradiction.
    fn refine_from_ground(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
    ) -> Arc<BoundsConstraint> {
        self.refine_bounds(record, self.zero(), bias, |value, bias| {
            value.checked_add_signed(bias)
        })
    }

    fn refine_ground(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
    ) -> Arc<BoundsConstraint> {
        self.refine_bounds(record, bias, self.zero(), |value, bias| {
            value.checked_sub_signed(bias)
        })
    }

    fn refine_bounds(
        &mut self,
        record: &Arc<BoundsConstraint>,
        source_bias: BvValue,
        target_bias: BvValue,
        shift: impl Fn(BvValue, BvValue) -> Option<BvValue>,
    ) -> Arc<BoundsConstraint> {
        if source_bias == target_bias {
            return Arc::clone(record);
        }

        let shift_bias = if source_bias == self.zero() {
            target_bias
        } else {
            source_bias
        };

        let (Some(source_lower), Some(source_upper)) = (
            record.lower_bound(source_bias),
            record.upper_bound(source_bias),
        ) else {
            return Arc::clone(record);
        };

        let (Some(target_lower), Some(target_upper)) = (
            shift(source_lower.value, shift_bias),
            shift(source_upper.value, shift_bias),
        ) else {
            return Arc::clone(record);
        };

        let mut kind = None;
        let refined_lower = self.refine_lower(record, target_bias, target_lower);
        if !Arc::ptr_eq(&refined_lower, record) {
            kind = Some(BoundsUpdate::Lower);
        }

        let refined = self.refine_upper(&refined_lower, target_bias, target_upper);
        if !Arc::ptr_eq(&refined, &refined_lower) {
            kind = Some(if kind == Some(BoundsUpdate::Lower) {
                BoundsUpdate::Both
            } else {
                BoundsUpdate::Upper
            });
        }

        let Some(kind) = kind else {
            return Arc::clone(record);
        };
        self.constraint_updated(record.terms, target_bias, kind);
        refined
    }

    fn refine_lower(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        bound: BvValue,
    ) -> Arc<BoundsConstraint> {
        let current = record.lower_bound(bias);
        if current.is_some_and(|c| c.value.signed_ge(bound)) {
            return Arc::clone(record);
        }
        let primary = current.map_or(false, |c| c.primary);
        let mut copy = (**record).clone();
        copy.lower
            .insert(bias, ValueBound { value: bound, primary }, self.ownership);
        Arc::new(copy)
    }

    fn refine_upper(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        bound: BvValue,
    ) -> Arc<BoundsConstraint> {
        let current = record.upper_bound(bias);
        if current.is_some_and(|c| c.value.signed_le(bound)) {
            return Arc::clone(record);
        }
        let primary = current.map_or(false, |c| c.primary);
        let mut copy = (**record).clone();
        copy.upper
            .insert(bias, ValueBound { value: bound, primary }, self.ownership);
        Arc::new(copy)
    }

    fn actualize(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
    ) -> Arc<BoundsConstraint> {
        let refined = self.refine_from_ground(record, bias);
        if !Arc::ptr_eq(&refined, record) {
            self.store_record(Arc::clone(&refined));
        }
        refined
    }

    // ------------------------------------------------------------------
    // Term relations on one record
    // ------------------------------------------------------------------

    fn rec_add_terms_upper<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        rhs: &Arc<BoundsConstraint>,
        rhs_bias: BvValue,
        strict: bool,
    ) -> Arc<BoundsConstraint> {
        let record = self.refine_from_ground(record, bias);
        let rhs = self.actualize(rhs, rhs_bias);
        self.update_terms_upper(store, &record, bias, &rhs, rhs_bias, strict)
    }

    fn rec_add_terms_inferred_lower<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        rhs: &Arc<BoundsConstraint>,
        rhs_bias: BvValue,
        strict: bool,
    ) -> Arc<BoundsConstraint> {
        let record = self.refine_from_ground(record, bias);
        let rhs = self.actualize(rhs, rhs_bias);
        self.update_terms_inferred_lower(store, &record, bias, &rhs, rhs_bias, strict)
    }

    fn rec_add_terms_diseq<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        rhs: &Arc<BoundsConstraint>,
        rhs_bias: BvValue,
    ) -> Arc<BoundsConstraint> {
        let record = self.refine_from_ground(record, bias);
        let rhs = self.actualize(rhs, rhs_bias);
        self.update_terms_diseq(store, &record, bias, &rhs, rhs_bias)
    }

    #[allow(clippy::too_many_arguments)]
    fn update_terms_upper<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        record: &Arc<BoundsConstraint>,
        lhs_bias: BvValue,
        rhs: &Arc<BoundsConstraint>,
        rhs_bias: BvValue,
        strict: bool,
    ) -> Arc<BoundsConstraint> {
        let rhs_lower = rhs.lower_bound(rhs_bias);
        let rhs_upper = rhs.upper_bound(rhs_bias);
        let lhs_lower = record.lower_bound(lhs_bias);
        let lhs_upper = record.upper_bound(lhs_bias);

        if let (Some(ru), Some(ll)) = (rhs_upper, lhs_lower) {
            if ll.value.signed_gt(ru.value) {
                self.contradiction();
                return Arc::clone(record);
            }
        }

        if let (Some(rl), Some(lu)) = (rhs_lower, lhs_upper) {
            if lu.value.signed_lt(rl.value) {
                // Already implied by the concrete bounds.
                return Arc::clone(record);
            }
        }

        let bound = TermBound {
            terms: rhs.terms,
            bias: rhs_bias,
            strict,
        };

        let tighter_concrete = rhs_upper
            .filter(|ru| lhs_upper.map_or(true, |lu| ru.value.signed_lt(lu.value)))
            .map(|ru| ru.value);

        let (mut result, skip) = self.eliminate_term_chain(
            record,
            lhs_bias,
            rhs,
            bound,
            rhs_upper.map(|b| b.value),
            BoundsUpdate::Upper,
        );
        if skip {
            return result;
        }

        self.add_watch(store, result.terms, bound.terms);
        let mut copy = (*result).clone();
        if copy.term_upper.add(lhs_bias, bound, self.ownership) {
            result = Arc::new(copy);
        }

        if let Some(value) = tighter_concrete {
            result = self.rec_add_concrete_upper_val(&result, lhs_bias, value, false);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn update_terms_inferred_lower<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        record: &Arc<BoundsConstraint>,
        lhs_bias: BvValue,
        rhs: &Arc<BoundsConstraint>,
        rhs_bias: BvValue,
        strict: bool,
    ) -> Arc<BoundsConstraint> {
        let rhs_lower = rhs.lower_bound(rhs_bias);
        let rhs_upper = rhs.upper_bound(rhs_bias);
        let lhs_lower = record.lower_bound(lhs_bias);
        let lhs_upper = record.upper_bound(lhs_bias);

        if let (Some(lu), Some(rl)) = (lhs_upper, rhs_lower) {
            if lu.value.signed_lt(rl.value) {
                self.contradiction();
                return Arc::clone(record);
            }
        }

        if let (Some(ru), Some(ll)) = (rhs_upper, lhs_lower) {
            if ll.value.signed_gt(ru.value) {
                return Arc::clone(record);
            }
        }

        let bound = TermBound {
            terms: rhs.terms,
            bias: rhs_bias,
            strict,
        };

        let tighter_concrete = rhs_lower
            .filter(|rl| lhs_lower.map_or(true, |ll| rl.value.signed_gt(ll.value)))
            .map(|rl| rl.value);

        let (mut result, skip) = self.eliminate_term_chain(
            record,
            lhs_bias,
            rhs,
            bound,
            rhs_lower.map(|b| b.value),
            BoundsUpdate::Lower,
        );
        if skip {
            return result;
        }

        self.add_watch(store, result.terms, bound.terms);
        let mut copy = (*result).clone();
        if copy.term_lower.add(lhs_bias, bound, self.ownership) {
            result = Arc::new(copy);
        }

        if let Some(value) = tighter_concrete {
            result = self.rec_add_concrete_lower_val(&result, lhs_bias, value, false);
        }
        result
    }

    fn update_terms_diseq<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        record: &Arc<BoundsConstraint>,
        lhs_bias: BvValue,
        rhs: &Arc<BoundsConstraint>,
        rhs_bias: BvValue,
    ) -> Arc<BoundsConstraint> {
        let rhs_lower = rhs.lower_bound(rhs_bias);
        let lhs_upper = record.upper_bound(lhs_bias);
        if let (Some(rl), Some(lu)) = (rhs_lower, lhs_upper) {
            if lu.value.signed_lt(rl.value) {
                // Ranges are disjoint: the disequality already holds.
                return Arc::clone(record);
            }
        }

        let rhs_upper = rhs.upper_bound(rhs_bias);
        let lhs_lower = record.lower_bound(lhs_bias);
        if let (Some(ru), Some(ll)) = (rhs_upper, lhs_lower) {
            if ru.value.signed_lt(ll.value) {
                return Arc::clone(record);
            }
        }

        // Fewer distinct relations, more biases: shift the rhs bias onto
        // the lhs side.
        if rhs_bias != self.zero() {
            return self.rec_add_terms_diseq(
                store,
                record,
                lhs_bias.wrapping_sub(rhs_bias),
                rhs,
                self.zero(),
            );
        }

        let bound = TermBound {
            terms: rhs.terms,
            bias: rhs_bias,
            strict: true,
        };
        self.add_watch(store, record.terms, bound.terms);
        let mut copy = (**record).clone();
        if copy.term_diseq.add(lhs_bias, bound, self.ownership) {
            Arc::new(copy)
        } else {
            Arc::clone(record)
        }
    }

    // ------------------------------------------------------------------
    // Bound-chain elimination
    // ------------------------------------------------------------------

    fn add_refined_concrete_upper(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        bound: ValueBound,
    ) -> Arc<BoundsConstraint> {
        let (result, skip) = self.eliminate_concrete_chain(record, bias, bound, BoundsUpdate::Upper);
        if skip {
            return result;
        }
        self.constraint_updated(result.terms, bias, BoundsUpdate::Upper);
        let mut copy = (*result).clone();
        copy.upper.insert(bias, bound, self.ownership);
        let updated = Arc::new(copy);
        self.refine_ground(&updated, bias)
    }

    fn add_refined_concrete_lower(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        bound: ValueBound,
    ) -> Arc<BoundsConstraint> {
        let (result, skip) = self.eliminate_concrete_chain(record, bias, bound, BoundsUpdate::Lower);
        if skip {
            return result;
        }
        self.constraint_updated(result.terms, bias, BoundsUpdate::Lower);
        let mut copy = (*result).clone();
        copy.lower.insert(bias, bound, self.ownership);
        let updated = Arc::new(copy);
        self.refine_ground(&updated, bias)
    }

    /// Pick the biases whose bounds are implied by their neighbors: with
    /// the relevant biases sorted, an inner bias can go whenever its two
    /// enclosing neighbors are closer than the distance at which the shared
    /// bound could overflow.
    fn chain_biases_to_remove(
        &self,
        mut relevant: Vec<BvValue>,
        bias: BvValue,
        rhs_bound: BvValue,
    ) -> Vec<BvValue> {
        let search_positive = bias.signed_ge(self.zero());
        relevant.retain(|b| {
            if search_positive {
                b.signed_ge(self.zero())
            } else {
                b.signed_lt(self.zero())
            }
        });
        if relevant.len() < 2 {
            return Vec::new();
        }

        relevant.push(bias);
        relevant.sort_unstable_by(|a, b| a.signed_cmp(b));

        let max = BvValue::max_signed(self.width);
        let delta = if rhs_bound.signed_ge(self.zero()) {
            max.wrapping_sub(rhs_bound)
        } else {
            max.wrapping_add(rhs_bound)
        };

        let mut to_remove = Vec::new();
        let mut left = 0;
        let mut right = 2;
        while right < relevant.len() {
            if relevant[right]
                .wrapping_sub(relevant[left])
                .signed_lt(delta)
            {
                to_remove.push(relevant[right - 1]);
                right += 1;
                continue;
            }
            left = right - 1;
            right += 1;
        }
        to_remove
    }

    #[allow(clippy::too_many_arguments)]
    fn eliminate_term_chain(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        rhs: &Arc<BoundsConstraint>,
        bound: TermBound,
        rhs_bound: Option<BvValue>,
        which: BoundsUpdate,
    ) -> (Arc<BoundsConstraint>, bool) {
        let Some(rhs_bound) = rhs_bound else {
            return (Arc::clone(record), false);
        };

        let relevant = match which {
            BoundsUpdate::Upper => record.term_upper.biases_of(&bound),
            BoundsUpdate::Lower => record.term_lower.biases_of(&bound),
            BoundsUpdate::Both => unreachable!("chains are one-sided"),
        };
        let to_remove = self.chain_biases_to_remove(relevant, bias, rhs_bound);
        if to_remove.is_empty() {
            return (Arc::clone(record), false);
        }

        let mut copy = (**record).clone();
        let mut rhs_copy = (**rhs).clone();
        let mut rhs_changed = false;
        let mut skip_current = false;

        for removed_bias in to_remove {
            if removed_bias == bias {
                skip_current = true;
                continue;
            }
            let opposite = TermBound {
                terms: record.terms,
                bias: removed_bias,
                strict: bound.strict,
            };
            match which {
                BoundsUpdate::Upper => {
                    copy.term_upper.remove(removed_bias, bound, self.ownership);
                    rhs_changed |= rhs_copy.term_lower.remove(bound.bias, opposite, self.ownership);
                }
                BoundsUpdate::Lower => {
                    copy.term_lower.remove(removed_bias, bound, self.ownership);
                    rhs_changed |= rhs_copy.term_upper.remove(bound.bias, opposite, self.ownership);
                }
                BoundsUpdate::Both => unreachable!(),
            }
        }

        if rhs_changed {
            self.store_record(Arc::new(rhs_copy));
        }
        (Arc::new(copy), skip_current)
    }

    fn eliminate_concrete_chain(
        &mut self,
        record: &Arc<BoundsConstraint>,
        bias: BvValue,
        bound: ValueBound,
        which: BoundsUpdate,
    ) -> (Arc<BoundsConstraint>, bool) {
        let table = match which {
            BoundsUpdate::Upper => &record.upper,
            BoundsUpdate::Lower => &record.lower,
            BoundsUpdate::Both => unreachable!("chains are one-sided"),
        };
        let relevant: Vec<BvValue> = table
            .iter()
            .filter(|(_, existing)| **existing == bound)
            .map(|(b, _)| *b)
            .collect();

        let to_remove = self.chain_biases_to_remove(relevant, bias, bound.value);
        if to_remove.is_empty() {
            return (Arc::clone(record), false);
        }

        let mut copy = (**record).clone();
        let mut skip_current = false;
        for removed_bias in to_remove {
            if removed_bias == bias {
                skip_current = true;
                continue;
            }
            match which {
                BoundsUpdate::Upper => copy.upper.remove(&removed_bias, self.ownership),
                BoundsUpdate::Lower => copy.lower.remove(&removed_bias, self.ownership),
                BoundsUpdate::Both => unreachable!(),
            };
        }
        (Arc::new(copy), skip_current)
    }

    // ------------------------------------------------------------------
    // Equality collapse replay
    // ------------------------------------------------------------------

    /// `source + replacement_bias == destination`: replay every fact of
    /// `source` onto `destination` and re-derive its dependents.
    fn replay_term_equality<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        source: &Arc<BoundsConstraint>,
        replacement_bias: BvValue,
        destination: &Arc<BoundsConstraint>,
    ) {
        let mut dest = Arc::clone(destination);

        for (bias, bound) in source.lower.iter() {
            let shifted = bias.wrapping_sub(replacement_bias);
            dest = self.rec_add_concrete_lower_val(&dest, shifted, bound.value, bound.primary);
        }
        for (bias, bound) in source.upper.iter() {
            let shifted = bias.wrapping_sub(replacement_bias);
            dest = self.rec_add_concrete_upper_val(&dest, shifted, bound.value, bound.primary);
        }
        for (bias, bound) in source.diseq.iter() {
            let shifted = bias.wrapping_sub(replacement_bias);
            dest = self.rec_add_concrete_diseq(&dest, shifted, bound.value, bound.primary);
        }

        // Term lower bounds are all derived; they are not copied.

        for (bound, biases) in source.term_upper.entries() {
            for bias in biases {
                dest = self.record_terms_upper_bound(
                    store,
                    &dest,
                    bias.wrapping_sub(replacement_bias),
                    bound.terms,
                    bound.bias,
                    bound.strict,
                    true,
                );
            }
        }
        for (bound, biases) in source.term_diseq.entries() {
            for bias in biases {
                dest = self.record_terms_disequality(
                    store,
                    &dest,
                    bias.wrapping_sub(replacement_bias),
                    bound.terms,
                    bound.bias,
                );
            }
        }

        self.store_record(Arc::clone(&dest));

        // Dependents watching the source now relate to the destination:
        // source == destination - replacement_bias.
        let dependents: Vec<TermId> = self
            .watch
            .get(&source.terms)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        let negated_bias = self.zero().wrapping_sub(replacement_bias);
        for dependent in dependents {
            if let Some(Resolved::Bounds(dep_record, _)) = self.resolve(dependent) {
                let updated =
                    self.substitute_terms(store, &dep_record, source.terms, &dest, negated_bias);
                self.store_record(updated);
            }
        }
    }

    /// `source == value`: check its concrete facts, push its term facts
    /// onto the related records, and re-derive its dependents.
    fn replay_value_equality(&mut self, source: &Arc<BoundsConstraint>, value: BvValue) {
        for (bias, bound) in source.lower.iter() {
            if value.wrapping_add(*bias).signed_lt(bound.value) {
                self.contradiction();
                return;
            }
        }
        for (bias, bound) in source.upper.iter() {
            if value.wrapping_add(*bias).signed_gt(bound.value) {
                self.contradiction();
                return;
            }
        }
        for (bias, bound) in source.diseq.iter() {
            if value.wrapping_add(*bias) == bound.value {
                self.contradiction();
                return;
            }
        }

        // value + bias >= target + bound.bias: an upper bound for target.
        if !self.replay_value_over_set(
            value,
            &source.term_lower,
            |lhs, rhs| lhs.signed_lt(rhs),
            |this, target, bias, bound_value, strict| {
                this.rec_add_concrete_upper(target, bias, bound_value, strict, false)
            },
        ) {
            return;
        }

        // value + bias <= target + bound.bias: a lower bound for target.
        if !self.replay_value_over_set(
            value,
            &source.term_upper,
            |lhs, rhs| lhs.signed_gt(rhs),
            |this, target, bias, bound_value, strict| {
                this.rec_add_concrete_lower(target, bias, bound_value, strict, true)
            },
        ) {
            return;
        }

        // value + bias != target + bound.bias.
        if !self.replay_value_over_set(
            value,
            &source.term_diseq,
            |lhs, rhs| lhs == rhs,
            |this, target, bias, bound_value, _strict| {
                this.rec_add_concrete_diseq(target, bias, bound_value, true)
            },
        ) {
            return;
        }

        let dependents: Vec<TermId> = self
            .watch
            .get(&source.terms)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for dependent in dependents {
            if let Some(Resolved::Bounds(dep_record, _)) = self.resolve(dependent) {
                let updated = self.substitute_value(&dep_record, source.terms, value);
                self.store_record(updated);
            }
        }
    }

    /// Replay one term-relation set of a collapsed record. Returns false
    /// if a contradiction was latched.
    fn replay_value_over_set(
        &mut self,
        value: BvValue,
        set: &TermBoundSet,
        conflicts: impl Fn(BvValue, BvValue) -> bool,
        apply: impl Fn(
            &mut Self,
            &Arc<BoundsConstraint>,
            BvValue,
            BvValue,
            bool,
        ) -> Arc<BoundsConstraint>,
    ) -> bool {
        for (bound, biases) in set.entries() {
            match self.resolve_or_create(bound.terms) {
                Resolved::Bounds(target, adjustment) => {
                    let mut target = target;
                    let constraint_bias = bound.bias.wrapping_add(adjustment);
                    for bias in biases {
                        let biased_value = value.wrapping_add(bias);
                        target = apply(self, &target, constraint_bias, biased_value, bound.strict);
                    }
                    self.store_record(target);
                }
                Resolved::Value(target_value) => {
                    let biased_bound = target_value.wrapping_add(bound.bias);
                    for bias in biases {
                        let biased_value = value.wrapping_add(bias);
                        if conflicts(biased_value, biased_bound)
                            || (bound.strict && biased_value == biased_bound)
                        {
                            self.contradiction();
                            return false;
                        }
                    }
                }
            }
            if self.contradicting {
                return false;
            }
        }
        true
    }

    /// Rewrite `record`'s relations on `terms` as concrete facts about
    /// `value`.
    fn substitute_value(
        &mut self,
        record: &Arc<BoundsConstraint>,
        terms: TermId,
        value: BvValue,
    ) -> Arc<BoundsConstraint> {
        let mut result = Arc::clone(record);

        for bound in record.term_lower.bounds_on(terms) {
            let constraint_value = value.wrapping_add(bound.bias);
            for bias in record.term_lower.biases_of(&bound) {
                result =
                    self.rec_add_concrete_lower(&result, bias, constraint_value, bound.strict, false);
            }
        }
        let mut copy = (*result).clone();
        if copy.term_lower.drop_terms(terms, self.ownership) {
            result = Arc::new(copy);
        }

        for bound in record.term_upper.bounds_on(terms) {
            let constraint_value = value.wrapping_add(bound.bias);
            for bias in record.term_upper.biases_of(&bound) {
                result =
                    self.rec_add_concrete_upper(&result, bias, constraint_value, bound.strict, true);
            }
        }
        let mut copy = (*result).clone();
        if copy.term_upper.drop_terms(terms, self.ownership) {
            result = Arc::new(copy);
        }

        for bound in record.term_diseq.bounds_on(terms) {
            let constraint_value = value.wrapping_add(bound.bias);
            for bias in record.term_diseq.biases_of(&bound) {
                result = self.rec_add_concrete_diseq(&result, bias, constraint_value, true);
            }
        }
        let mut copy = (*result).clone();
        if copy.term_diseq.drop_terms(terms, self.ownership) {
            result = Arc::new(copy);
        }

        result
    }

    /// Rewrite `record`'s relations on `terms` as relations on
    /// `replacement` (`terms == replacement + replacement_bias`).
    fn substitute_terms<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        record: &Arc<BoundsConstraint>,
        terms: TermId,
        replacement: &Arc<BoundsConstraint>,
        replacement_bias: BvValue,
    ) -> Arc<BoundsConstraint> {
        let mut result = Arc::clone(record);

        for bound in record.term_lower.bounds_on(terms) {
            let rhs_bias = replacement_bias.wrapping_add(bound.bias);
            for bias in record.term_lower.biases_of(&bound) {
                result = self.rec_add_terms_inferred_lower(
                    store, &result, bias, replacement, rhs_bias, bound.strict,
                );
            }
        }
        let mut copy = (*result).clone();
        if copy.term_lower.drop_terms(terms, self.ownership) {
            result = Arc::new(copy);
        }

        for bound in record.term_upper.bounds_on(terms) {
            let rhs_bias = replacement_bias.wrapping_add(bound.bias);
            for bias in record.term_upper.biases_of(&bound) {
                result = self.rec_add_terms_upper(
                    store, &result, bias, replacement, rhs_bias, bound.strict,
                );
            }
        }
        let mut copy = (*result).clone();
        if copy.term_upper.drop_terms(terms, self.ownership) {
            result = Arc::new(copy);
        }

        for bound in record.term_diseq.bounds_on(terms) {
            let rhs_bias = replacement_bias.wrapping_add(bound.bias);
            for bias in record.term_diseq.biases_of(&bound) {
                result = self.rec_add_terms_diseq(store, &result, bias, replacement, rhs_bias);
            }
        }
        let mut copy = (*result).clone();
        if copy.term_diseq.drop_terms(terms, self.ownership) {
            result = Arc::new(copy);
        }

        result
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    fn propagate<T: TypeName>(&mut self, store: &mut TermStore<T>) {
        while let Some(event) = self.queue.pop() {
            if self.contradicting {
                self.queue.clear();
                return;
            }
            let Some(watchers) = self.watch.get(&event.terms) else {
                continue;
            };
            let watchers: Vec<TermId> = watchers.iter().copied().collect();

            let Some(Resolved::Bounds(updated, adjustment)) = self.resolve(event.terms) else {
                // Collapsed to a value: already substituted everywhere.
                continue;
            };
            let updated_bias = adjustment.wrapping_add(event.bias);

            for watcher in watchers {
                let Some(Resolved::Bounds(dep_record, _)) = self.resolve(watcher) else {
                    continue;
                };
                let new_dep =
                    self.propagate_into(store, &dep_record, &updated, updated_bias, event.kind);
                if !Arc::ptr_eq(&new_dep, &dep_record) {
                    self.store_record(new_dep);
                }
            }
        }
    }

    fn propagate_into<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        record: &Arc<BoundsConstraint>,
        updated: &Arc<BoundsConstraint>,
        updated_bias: BvValue,
        kind: BoundsUpdate,
    ) -> Arc<BoundsConstraint> {
        let mut result = self.propagate_unit_sum(store, record, updated.terms);

        if matches!(kind, BoundsUpdate::Lower | BoundsUpdate::Both) {
            for strict in [true, false] {
                let bound = TermBound {
                    terms: updated.terms,
                    bias: updated_bias,
                    strict,
                };
                for bias in result.term_lower.biases_of(&bound) {
                    result = self.rec_add_terms_inferred_lower(
                        store, &result, bias, updated, updated_bias, strict,
                    );
                }
            }
        }

        if matches!(kind, BoundsUpdate::Upper | BoundsUpdate::Both) {
            for strict in [true, false] {
                let bound = TermBound {
                    terms: updated.terms,
                    bias: updated_bias,
                    strict,
                };
                for bias in result.term_upper.biases_of(&bound) {
                    result = self.rec_add_terms_upper(
                        store, &result, bias, updated, updated_bias, strict,
                    );
                }
            }
        }

        result
    }

    /// When a unit term of a multi-term sum tightens, re-derive the sum's
    /// bounds as the sum of its units' bounds (skipped entirely when any
    /// addition would overflow).
    fn propagate_unit_sum<T: TypeName>(
        &mut self,
        store: &mut TermStore<T>,
        record: &Arc<BoundsConstraint>,
        updated_terms: TermId,
    ) -> Arc<BoundsConstraint> {
        if Self::has_multiple_terms(store, updated_terms)
            || !Self::has_multiple_terms(store, record.terms)
        {
            return Arc::clone(record);
        }
        let units = Self::unit_terms(store, record.terms);
        if !units.contains(&updated_terms) {
            return Arc::clone(record);
        }

        let Some(sum_lower) = self.sum_unit_bounds(&units, |rec, bias| {
            rec.lower_bound(bias).map(|b| b.value)
        }) else {
            return Arc::clone(record);
        };
        let Some(sum_upper) = self.sum_unit_bounds(&units, |rec, bias| {
            rec.upper_bound(bias).map(|b| b.value)
        }) else {
            return Arc::clone(record);
        };

        let result = self.rec_add_concrete_lower_val(record, self.zero(), sum_lower, false);
        self.rec_add_concrete_upper_val(&result, self.zero(), sum_upper, false)
    }

    fn sum_unit_bounds(
        &mut self,
        units: &[TermId],
        bound_of: impl Fn(&BoundsConstraint, BvValue) -> Option<BvValue>,
    ) -> Option<BvValue> {
        let mut acc = self.zero();
        for &unit in units {
            let contribution = match self.resolve(unit)? {
                Resolved::Bounds(rec, adjustment) => bound_of(&rec, adjustment)?,
                Resolved::Value(value) => value,
            };
            acc = acc.checked_add_signed(contribution)?;
        }
        Some(acc)
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    /// The currently implied formula set (possibly simplified). Derived
    /// bounds are omitted; only primary facts and term relations appear.
    pub fn emit<T: TypeName>(&self, store: &mut TermStore<T>) -> Vec<TermId> {
        if self.contradicting {
            return vec![store.false_term()];
        }

        let mut out = Vec::new();
        let entries: Vec<(TermId, Constraint)> = self
            .constraints
            .iter()
            .map(|(terms, c)| (*terms, c.clone()))
            .collect();

        for (terms, constraint) in entries {
            match constraint {
                Constraint::Bounds(record) => self.emit_record(store, &record, &mut out),
                Constraint::EqConst { value } => {
                    let rhs = store.mk_bv_value(value);
                    out.push(store.mk_eq(terms, rhs));
                }
                Constraint::EqTerms { bias, equal } => {
                    let lhs = Self::biased_expr(store, terms, bias);
                    out.push(store.mk_eq(lhs, equal));
                }
            }
        }
        out
    }

    fn emit_record<T: TypeName>(
        &self,
        store: &mut TermStore<T>,
        record: &BoundsConstraint,
        out: &mut Vec<TermId>,
    ) {
        for (bias, bound) in record.lower.iter().filter(|(_, b)| b.primary) {
            let lhs = Self::biased_expr(store, record.terms, *bias);
            let rhs = store.mk_bv_value(bound.value);
            out.push(store.mk_bv_sge(lhs, rhs));
        }
        for (bias, bound) in record.upper.iter().filter(|(_, b)| b.primary) {
            let lhs = Self::biased_expr(store, record.terms, *bias);
            let rhs = store.mk_bv_value(bound.value);
            out.push(store.mk_bv_sle(lhs, rhs));
        }
        for (bias, bound) in record.diseq.iter().filter(|(_, b)| b.primary) {
            let lhs = Self::biased_expr(store, record.terms, *bias);
            let rhs = store.mk_bv_value(bound.value);
            let eq = store.mk_eq(lhs, rhs);
            out.push(store.mk_not(eq));
        }

        // Term lower bounds are derived from the mirrored uppers.

        for (bound, biases) in record.term_upper.entries() {
            let rhs = Self::biased_expr(store, bound.terms, bound.bias);
            for bias in biases {
                let lhs = Self::biased_expr(store, record.terms, bias);
                out.push(if bound.strict {
                    store.mk_bv_slt(lhs, rhs)
                } else {
                    store.mk_bv_sle(lhs, rhs)
                });
            }
        }
        for (bound, biases) in record.term_diseq.entries() {
            let rhs = Self::biased_expr(store, bound.terms, bound.bias);
            for bias in biases {
                let lhs = Self::biased_expr(store, record.terms, bias);
                let eq = store.mk_eq(lhs, rhs);
                out.push(store.mk_not(eq));
            }
        }
    }

    fn biased_expr<T: TypeName>(store: &mut TermStore<T>, terms: TermId, bias: BvValue) -> TermId {
        if bias.is_zero() {
            terms
        } else {
            let bias_term = store.mk_bv_value(bias);
            store.mk_bv_add(terms, bias_term)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestTy;

    type Store = TermStore<TestTy>;

    const W: u32 = 32;

    fn setup() -> (NumericConstraints, Store) {
        (NumericConstraints::new(W, Ownership::new()), Store::new())
    }

    fn bv(store: &mut Store, value: i64) -> TermId {
        store.mk_bv(W, value)
    }

    #[test]
    fn recognizes_numeric_shapes() {
        let (nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let five = bv(&mut store, 5);
        let le = store.mk_bv_sle(x, five);
        let lt = store.mk_bv_slt(x, five);
        let eq = store.mk_eq(x, five);
        assert!(nc.is_numeric_constraint(&store, le));
        assert!(nc.is_numeric_constraint(&store, lt));
        assert!(nc.is_numeric_constraint(&store, eq));

        let y = store.mk_bv_var("y", 8);
        let other_width = store.mk_bv(8, 1);
        let wrong = store.mk_bv_sle(y, other_width);
        assert!(!nc.is_numeric_constraint(&store, wrong));

        let r = store.mk_ref(symbex_core::HeapRef::Symbolic(0));
        let s = store.mk_ref(symbex_core::HeapRef::Symbolic(1));
        let ref_eq = store.mk_eq(r, s);
        assert!(!nc.is_numeric_constraint(&store, ref_eq));
    }

    #[test]
    fn point_interval_round_trip() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let five = bv(&mut store, 5);
        let ge = store.mk_bv_sge(x, five);
        let le = store.mk_bv_sle(x, five);
        nc.add_numeric_constraint(&mut store, ge);
        nc.add_numeric_constraint(&mut store, le);
        assert!(!nc.is_contradicting());

        let interval = nc.eval_interval(&mut store, x);
        assert_eq!(interval.as_point(), Some(5));
    }

    #[test]
    fn disequality_excludes_point() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let zero = bv(&mut store, 0);
        let ten = bv(&mut store, 10);
        let seven = bv(&mut store, 7);

        let ge = store.mk_bv_sge(x, zero);
        let le = store.mk_bv_sle(x, ten);
        let eq7 = store.mk_eq(x, seven);
        nc.add_numeric_constraint(&mut store, ge);
        nc.add_numeric_constraint(&mut store, le);
        nc.add_negated_numeric_constraint(&mut store, eq7);
        assert!(!nc.is_contradicting());

        let interval = nc.eval_interval(&mut store, x);
        let expected = IntIntervals::closed(0, 10).subtract(&IntIntervals::point(7));
        assert_eq!(interval, expected);
    }

    #[test]
    fn biased_interval_evaluation() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let lo = bv(&mut store, -5);
        let hi = bv(&mut store, 5);
        let zero = bv(&mut store, 0);

        let ge = store.mk_bv_sge(x, lo);
        let le = store.mk_bv_sle(x, hi);
        let eq0 = store.mk_eq(x, zero);
        nc.add_numeric_constraint(&mut store, ge);
        nc.add_numeric_constraint(&mut store, le);
        nc.add_negated_numeric_constraint(&mut store, eq0);

        // x + 3 ranges over [-2, 8] minus {3}.
        let three = bv(&mut store, 3);
        let shifted = store.mk_bv_add(x, three);
        let interval = nc.eval_interval(&mut store, shifted);
        let expected = IntIntervals::closed(-2, 8).subtract(&IntIntervals::point(3));
        assert_eq!(interval, expected);
    }

    #[test]
    fn conflicting_bounds_contradict() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let ten = bv(&mut store, 10);
        let five = bv(&mut store, 5);
        let ge = store.mk_bv_sge(x, ten);
        let le = store.mk_bv_sle(x, five);
        nc.add_numeric_constraint(&mut store, ge);
        nc.add_numeric_constraint(&mut store, le);
        assert!(nc.is_contradicting());
    }

    #[test]
    fn strict_self_comparison_contradicts() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let lt = store.mk_bv_slt(x, x);
        nc.add_numeric_constraint(&mut store, lt);
        assert!(nc.is_contradicting());
    }

    #[test]
    fn conflicting_value_equalities_contradict() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let three = bv(&mut store, 3);
        let four = bv(&mut store, 4);

        let eq3 = store.mk_eq(x, three);
        nc.add_numeric_constraint(&mut store, eq3);
        assert!(!nc.is_contradicting());

        let eq4 = store.mk_eq(x, four);
        nc.add_numeric_constraint(&mut store, eq4);
        assert!(nc.is_contradicting());
    }

    #[test]
    fn repeated_value_equality_is_accepted() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let three = bv(&mut store, 3);
        let eq3 = store.mk_eq(x, three);
        nc.add_numeric_constraint(&mut store, eq3);
        nc.add_numeric_constraint(&mut store, eq3);
        assert!(!nc.is_contradicting());
        let interval = nc.eval_interval(&mut store, x);
        assert_eq!(interval.as_point(), Some(3));
    }

    #[test]
    fn equality_collapse_propagates_to_dependents() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let y = store.mk_bv_var("y", W);

        // x <= y, then y == 3: x must end up bounded by 3.
        let le = store.mk_bv_sle(x, y);
        nc.add_numeric_constraint(&mut store, le);
        let three = bv(&mut store, 3);
        let eq = store.mk_eq(y, three);
        nc.add_numeric_constraint(&mut store, eq);
        assert!(!nc.is_contradicting());

        let interval = nc.eval_interval(&mut store, x);
        assert!(!interval.contains(4));
        assert!(interval.contains(3));
        assert!(interval.contains(BvValue::min_signed(W).as_i64()));

        let y_interval = nc.eval_interval(&mut store, y);
        assert_eq!(y_interval.as_point(), Some(3));
    }

    #[test]
    fn value_equality_conflicting_with_bounds_contradicts() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let ten = bv(&mut store, 10);
        let three = bv(&mut store, 3);
        let ge = store.mk_bv_sge(x, ten);
        nc.add_numeric_constraint(&mut store, ge);
        let eq = store.mk_eq(x, three);
        nc.add_numeric_constraint(&mut store, eq);
        assert!(nc.is_contradicting());
    }

    #[test]
    fn term_merge_links_aliases() {
        let (mut nc, mut store) = setup();
        let a = store.mk_bv_var("a", W);
        let b = store.mk_bv_var("b", W);

        let eq = store.mk_eq(a, b);
        nc.add_numeric_constraint(&mut store, eq);

        let five = bv(&mut store, 5);
        let ge = store.mk_bv_sge(a, five);
        nc.add_numeric_constraint(&mut store, ge);

        // The bound asserted through one alias is visible through the other.
        let b_interval = nc.eval_interval(&mut store, b);
        assert!(!b_interval.contains(4));
        assert!(b_interval.contains(5));
    }

    #[test]
    fn biased_term_merge() {
        let (mut nc, mut store) = setup();
        let a = store.mk_bv_var("a", W);
        let b = store.mk_bv_var("b", W);
        let one = bv(&mut store, 1);

        // a + 1 == b and a == 4: b must be exactly 5.
        let a_plus_one = store.mk_bv_add(a, one);
        let eq = store.mk_eq(a_plus_one, b);
        nc.add_numeric_constraint(&mut store, eq);
        let four = bv(&mut store, 4);
        let eq4 = store.mk_eq(a, four);
        nc.add_numeric_constraint(&mut store, eq4);
        assert!(!nc.is_contradicting());

        let b_interval = nc.eval_interval(&mut store, b);
        assert_eq!(b_interval.as_point(), Some(5));
    }

    #[test]
    fn normalization_joins_sums() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let y = store.mk_bv_var("y", W);
        let two = bv(&mut store, 2);
        let five = bv(&mut store, 5);

        // (x + 2) + y and (2 + y) + x normalize to the same (sum, bias)
        // pair, so the bounds land on one record.
        let lhs_a = store.mk_bv_add(x, two);
        let lhs_a = store.mk_bv_add(lhs_a, y);
        let le = store.mk_bv_sle(lhs_a, five);
        nc.add_numeric_constraint(&mut store, le);

        let lhs_b = store.mk_bv_add(two, y);
        let lhs_b = store.mk_bv_add(lhs_b, x);
        let ge = store.mk_bv_sge(lhs_b, five);
        nc.add_numeric_constraint(&mut store, ge);
        assert!(!nc.is_contradicting());

        let interval = nc.eval_interval(&mut store, lhs_a);
        assert_eq!(interval.as_point(), Some(5));

        // A conflicting bound through yet another spelling contradicts.
        let lhs_c = store.mk_bv_add(y, x);
        let lhs_c = store.mk_bv_add(lhs_c, two);
        let four = bv(&mut store, 4);
        let bad = store.mk_bv_sle(lhs_c, four);
        nc.add_numeric_constraint(&mut store, bad);
        assert!(nc.is_contradicting());
    }

    #[test]
    fn unit_bounds_propagate_to_sum() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let y = store.mk_bv_var("y", W);
        let z = store.mk_bv_var("z", W);
        let sum = store.mk_bv_add(x, y);

        // z <= x + y sets up watch edges from the units to the sum.
        let le = store.mk_bv_sle(z, sum);
        nc.add_numeric_constraint(&mut store, le);

        let zero = bv(&mut store, 0);
        let ten = bv(&mut store, 10);
        for var in [x, y] {
            let ge = store.mk_bv_sge(var, zero);
            let le = store.mk_bv_sle(var, ten);
            nc.add_numeric_constraint(&mut store, ge);
            nc.add_numeric_constraint(&mut store, le);
        }
        assert!(!nc.is_contradicting());

        // The sum's bounds are re-derived from the units.
        let interval = nc.eval_interval(&mut store, sum);
        assert!(!interval.contains(21));
        assert!(!interval.contains(-1));
        assert!(interval.contains(0));
        assert!(interval.contains(20));

        // And flow on to the dependent term.
        let z_interval = nc.eval_interval(&mut store, z);
        assert!(!z_interval.contains(21));
        assert!(z_interval.contains(20));
    }

    #[test]
    fn strict_bound_against_min_contradicts() {
        let mut nc = NumericConstraints::new(8, Ownership::new());
        let mut store = Store::new();
        let x = store.mk_bv_var("x", 8);
        let min = store.mk_bv(8, -128);
        let lt = store.mk_bv_slt(x, min);
        nc.add_numeric_constraint(&mut store, lt);
        assert!(nc.is_contradicting());
    }

    #[test]
    fn emitted_constraints_skip_derived_bounds() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let y = store.mk_bv_var("y", W);

        let le = store.mk_bv_sle(x, y);
        nc.add_numeric_constraint(&mut store, le);
        let five = bv(&mut store, 5);
        let ge = store.mk_bv_sge(y, five);
        nc.add_numeric_constraint(&mut store, ge);

        let formulas = nc.emit(&mut store);
        // One term upper bound (x <= y) and one primary lower bound
        // (y >= 5); the inferred lower bound of y against x is derived and
        // must not be emitted.
        assert_eq!(formulas.len(), 2);
        assert!(formulas.contains(&le));
        let emitted_ge = store.mk_bv_sle(five, y);
        assert!(formulas.contains(&emitted_ge));
    }

    #[test]
    fn contradiction_emits_false() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let lt = store.mk_bv_slt(x, x);
        nc.add_numeric_constraint(&mut store, lt);
        let formulas = nc.emit(&mut store);
        assert_eq!(formulas, vec![store.false_term()]);
    }

    #[test]
    fn clone_independence() {
        let (mut nc, mut store) = setup();
        let x = store.mk_bv_var("x", W);
        let five = bv(&mut store, 5);
        let ge = store.mk_bv_sge(x, five);
        nc.add_numeric_constraint(&mut store, ge);

        let mut fork = nc.clone_with(Ownership::new(), Ownership::new());
        let three = bv(&mut store, 3);
        let le = store.mk_bv_sle(x, three);
        fork.add_numeric_constraint(&mut store, le);

        assert!(fork.is_contradicting());
        assert!(!nc.is_contradicting());
        let interval = nc.eval_interval(&mut store, x);
        assert!(interval.contains(5));
        assert!(!interval.contains(4));
    }

    #[test]
    fn repeated_relative_bounds_stay_bounded() {
        let (mut nc, mut store) = setup();
        let bound = store.mk_bv_var("bound", W);
        let five = bv(&mut store, 5);
        let upper = store.mk_bv_slt(bound, five);
        nc.add_numeric_constraint(&mut store, upper);

        // x < bound, x+1 < bound, ... : the loop-induction pattern. Once
        // the bound has a concrete cap, the chain eliminator keeps the
        // per-record list from growing with the number of iterations.
        let mut x = store.mk_bv_var("x", W);
        for _ in 0..20 {
            let check = store.mk_bv_slt(x, bound);
            nc.add_numeric_constraint(&mut store, check);
            assert!(!nc.is_contradicting());
            let one = bv(&mut store, 1);
            x = store.mk_bv_add(x, one);
        }

        let x0 = store.mk_bv_var("x", W);
        match nc.resolve(x0) {
            Some(Resolved::Bounds(record, _)) => {
                let relation = TermBound {
                    terms: bound,
                    bias: BvValue::zero(W),
                    strict: true,
                };
                let term_biases = record.term_upper.biases_of(&relation).len();
                let concrete_biases = record.upper.len();
                assert!(
                    term_biases <= 3 && concrete_biases <= 3,
                    "chain elimination failed: {term_biases} term biases, \
                     {concrete_biases} concrete biases"
                );
            }
            _ => panic!("x should carry a bounds record"),
        }
    }
}
