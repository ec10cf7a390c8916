//! Benchmark fixtures shared by the criterion benches.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use acorn_core::policy::{DenyAllPolicy, MemoryPolicyLog, PolicyLog, Sha256Signer};

/// A memory ledger preloaded with `entries` sequential seals.
pub fn seeded_ledger(entries: usize) -> (MemoryPolicyLog, OffsetDateTime) {
    let log = MemoryPolicyLog::new(Arc::new(Sha256Signer));
    let base = OffsetDateTime::from_unix_timestamp(1_000_000).unwrap();
    for i in 0..entries {
        log.append(
            Arc::new(DenyAllPolicy::new((i % 100) as u8)),
            base + Duration::seconds(i as i64),
        )
        .expect("seeding the ledger");
    }
    (log, base)
}
