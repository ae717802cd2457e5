//! Benchmarks for the hot incremental paths: disequality-clique growth
//! and the loop-induction bound pattern.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use symbex_constraints::{EqualityConstraints, NumericConstraints, Ownership};
use symbex_core::{HeapRef, TermStore};

fn clique_growth(c: &mut Criterion) {
    c.bench_function("clique_growth_64", |b| {
        b.iter_batched(
            || EqualityConstraints::new(Ownership::new()),
            |mut eq| {
                for i in 0..64u32 {
                    for j in (i + 1)..64 {
                        eq.make_non_equal(HeapRef::Symbolic(i), HeapRef::Symbolic(j));
                    }
                }
                eq
            },
            BatchSize::SmallInput,
        );
    });
}

fn loop_induction_bounds(c: &mut Criterion) {
    c.bench_function("loop_induction_bounds_128", |b| {
        b.iter_batched(
            || {
                let mut store = TermStore::<&'static str>::new();
                let mut nc = NumericConstraints::new(32, Ownership::new());
                let bound = store.mk_bv_var("bound", 32);
                let cap = store.mk_bv(32, 1000);
                let capped = store.mk_bv_slt(bound, cap);
                nc.add_numeric_constraint(&mut store, capped);
                (store, nc, bound)
            },
            |(mut store, mut nc, bound)| {
                let mut x = store.mk_bv_var("x", 32);
                for _ in 0..128 {
                    let check = store.mk_bv_slt(x, bound);
                    nc.add_numeric_constraint(&mut store, check);
                    let one = store.mk_bv(32, 1);
                    x = store.mk_bv_add(x, one);
                }
                nc
            },
            BatchSize::SmallInput,
        );
    });
}

fn state_forking(c: &mut Criterion) {
    c.bench_function("fork_after_1k_disequalities", |b| {
        let mut eq = EqualityConstraints::new(Ownership::new());
        for i in 0..1000u32 {
            eq.make_non_equal(HeapRef::Symbolic(i), HeapRef::Symbolic(i + 1000));
        }
        b.iter(|| eq.clone_with(Ownership::new(), Ownership::new()));
    });
}

criterion_group!(benches, clique_growth, loop_induction_bounds, state_forking);
criterion_main!(benches);
