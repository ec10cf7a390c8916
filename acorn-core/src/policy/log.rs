use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;

use super::seal::{PolicySeal, GENESIS_HASH};
use super::signer::Signer;
use super::Policy;
use crate::error::AcornResult;

/// Result of walking the full hash chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerification {
    Valid,
    Invalid { index: usize, reason: String },
}

impl ChainVerification {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainVerification::Valid)
    }
}

/// Walks every seal: index continuity, hash links, effective_at monotony,
/// and signatures. Reports the first broken entry.
pub(crate) fn verify_seals(seals: &[PolicySeal], signer: &dyn Signer) -> ChainVerification {
    let mut previous_signature = GENESIS_HASH;
    let mut previous_at: Option<OffsetDateTime> = None;
    for (i, seal) in seals.iter().enumerate() {
        if seal.index != i as u64 {
            return ChainVerification::Invalid {
                index: i,
                reason: format!("expected index {i}, found {}", seal.index),
            };
        }
        if seal.previous_hash != previous_signature {
            return ChainVerification::Invalid {
                index: i,
                reason: "previous_hash does not match the prior signature".into(),
            };
        }
        if previous_at.is_some_and(|at| seal.effective_at < at) {
            return ChainVerification::Invalid {
                index: i,
                reason: "effective_at regressed".into(),
            };
        }
        if !seal.verify_with(signer) {
            return ChainVerification::Invalid {
                index: i,
                reason: "signature does not match the canonical payload".into(),
            };
        }
        previous_signature = seal.signature;
        previous_at = Some(seal.effective_at);
    }
    ChainVerification::Valid
}

/// Finds the latest entry effective at or before `at`.
pub(crate) fn policy_index_at(
    entries: &[(PolicySeal, Arc<dyn Policy>)],
    at: OffsetDateTime,
) -> Option<usize> {
    let count = entries.partition_point(|(seal, _)| seal.effective_at <= at);
    count.checked_sub(1)
}

/// The append-only governance ledger. Concurrent readers are allowed;
/// appends are serialized.
pub trait PolicyLog: Send + Sync {
    fn append(
        &self,
        policy: Arc<dyn Policy>,
        effective_at: OffsetDateTime,
    ) -> AcornResult<PolicySeal>;
    fn get_policy_at(&self, at: OffsetDateTime) -> Option<Arc<dyn Policy>>;
    fn get_all_seals(&self) -> Vec<PolicySeal>;
    /// Every appended policy in seal order, paired with `get_all_seals`.
    fn get_all_policies(&self) -> Vec<Arc<dyn Policy>>;
    fn verify_chain(&self) -> ChainVerification;
}

/// Entirely in-memory ledger; the verification result is cached until the
/// next append.
pub struct MemoryPolicyLog {
    signer: Arc<dyn Signer>,
    entries: RwLock<Vec<(PolicySeal, Arc<dyn Policy>)>>,
    verification: Mutex<Option<ChainVerification>>,
}

impl MemoryPolicyLog {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        MemoryPolicyLog {
            signer,
            entries: RwLock::new(Vec::new()),
            verification: Mutex::new(None),
        }
    }

    /// Swaps a seal in place, bypassing every integrity check. Exists so
    /// tamper detection can be exercised.
    #[doc(hidden)]
    pub fn corrupt_seal_for_tests(&self, index: usize, seal: PolicySeal) {
        self.entries.write()[index].0 = seal;
        *self.verification.lock() = None;
    }
}

impl PolicyLog for MemoryPolicyLog {
    fn append(
        &self,
        policy: Arc<dyn Policy>,
        effective_at: OffsetDateTime,
    ) -> AcornResult<PolicySeal> {
        let seal = {
            let mut entries = self.entries.write();
            let seal = PolicySeal::create(
                policy.as_ref(),
                effective_at,
                entries.last().map(|(seal, _)| seal),
                self.signer.as_ref(),
                None,
            )?;
            entries.push((seal.clone(), policy));
            seal
        };
        *self.verification.lock() = None;
        Ok(seal)
    }

    fn get_policy_at(&self, at: OffsetDateTime) -> Option<Arc<dyn Policy>> {
        let entries = self.entries.read();
        policy_index_at(&entries, at).map(|i| Arc::clone(&entries[i].1))
    }

    fn get_all_seals(&self) -> Vec<PolicySeal> {
        self.entries.read().iter().map(|(seal, _)| seal.clone()).collect()
    }

    fn get_all_policies(&self) -> Vec<Arc<dyn Policy>> {
        self.entries
            .read()
            .iter()
            .map(|(_, policy)| Arc::clone(policy))
            .collect()
    }

    fn verify_chain(&self) -> ChainVerification {
        if let Some(result) = self.verification.lock().as_ref() {
            return result.clone();
        }
        // Verify outside the cache lock; entries are append-only so a
        // racing append at worst recomputes.
        let seals = self.get_all_seals();
        let result = verify_seals(&seals, self.signer.as_ref());
        *self.verification.lock() = Some(result.clone());
        result
    }
}
