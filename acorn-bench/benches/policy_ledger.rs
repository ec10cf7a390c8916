//! Ledger performance targets at a 10k-entry log: append under 5 ms,
//! lookup under 10 ms, uncached full verification under 100 ms, cached
//! under 1 ms.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use time::Duration;

use acorn_bench::seeded_ledger;
use acorn_core::policy::{DenyAllPolicy, PolicyLog};

const LEDGER_SIZE: usize = 10_000;

fn bench_append(c: &mut Criterion) {
    c.bench_function("ledger_append_at_10k", |b| {
        b.iter_batched(
            || seeded_ledger(LEDGER_SIZE),
            |(log, base)| {
                log.append(
                    Arc::new(DenyAllPolicy::new(1)),
                    base + Duration::seconds(LEDGER_SIZE as i64 + 1),
                )
                .unwrap();
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_get_policy_at(c: &mut Criterion) {
    let (log, base) = seeded_ledger(LEDGER_SIZE);
    c.bench_function("ledger_get_policy_at_10k", |b| {
        b.iter(|| {
            log.get_policy_at(base + Duration::seconds(LEDGER_SIZE as i64 / 2))
                .unwrap()
        })
    });
}

fn bench_verify_chain_uncached(c: &mut Criterion) {
    c.bench_function("ledger_verify_chain_uncached_10k", |b| {
        b.iter_batched(
            || seeded_ledger(LEDGER_SIZE).0,
            |log| assert!(log.verify_chain().is_valid()),
            BatchSize::LargeInput,
        )
    });
}

fn bench_verify_chain_cached(c: &mut Criterion) {
    let (log, _) = seeded_ledger(LEDGER_SIZE);
    assert!(log.verify_chain().is_valid());
    c.bench_function("ledger_verify_chain_cached_10k", |b| {
        b.iter(|| assert!(log.verify_chain().is_valid()))
    });
}

criterion_group!(
    ledger,
    bench_append,
    bench_get_policy_at,
    bench_verify_chain_uncached,
    bench_verify_chain_cached
);
criterion_main!(ledger);
