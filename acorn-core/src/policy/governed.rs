use std::sync::Arc;

use parking_lot::Mutex;
use time::OffsetDateTime;

use super::engine::PolicyEngine;
use super::log::{ChainVerification, PolicyLog};
use super::seal::PolicySeal;
use super::{Policy, PolicyEvaluation};
use crate::error::{AcornError, AcornResult};

/// A policy engine whose active set is governed by an append-only ledger.
/// Construction can verify the ledger chain and aborts on tampering; every
/// later append lands in the log and the engine together.
pub struct GovernedPolicyEngine {
    engine: PolicyEngine,
    log: Arc<dyn PolicyLog>,
    append_gate: Mutex<()>,
}

impl GovernedPolicyEngine {
    pub fn new(
        engine: PolicyEngine,
        log: Arc<dyn PolicyLog>,
        verify_on_load: bool,
    ) -> AcornResult<Arc<Self>> {
        if verify_on_load {
            if let ChainVerification::Invalid { index, reason } = log.verify_chain() {
                return Err(AcornError::ChainIntegrity { index, reason });
            }
        }

        // The active set is everything effective by now; the engine keeps
        // the latest entry per policy name.
        let now = OffsetDateTime::now_utc();
        let effective = log
            .get_all_seals()
            .iter()
            .zip(log.get_all_policies())
            .filter(|(seal, _)| seal.effective_at <= now)
            .map(|(_, policy)| policy)
            .collect();
        engine.load_policies(effective);

        Ok(Arc::new(GovernedPolicyEngine {
            engine,
            log,
            append_gate: Mutex::new(()),
        }))
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    pub fn log(&self) -> &Arc<dyn PolicyLog> {
        &self.log
    }

    pub fn append_policy(
        &self,
        policy: Arc<dyn Policy>,
        effective_at: OffsetDateTime,
    ) -> AcornResult<PolicySeal> {
        let _gate = self.append_gate.lock();
        let seal = self.log.append(Arc::clone(&policy), effective_at)?;
        if effective_at <= OffsetDateTime::now_utc() {
            self.engine.add_policy(policy);
        }
        Ok(seal)
    }

    pub fn enforce(&self, eval: &PolicyEvaluation<'_>) -> AcornResult<()> {
        self.engine.enforce(eval)
    }

    pub fn verify_chain(&self) -> ChainVerification {
        self.log.verify_chain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DenyAllPolicy, MemoryPolicyLog, Sha256Signer};
    use crate::root::Operation;
    use time::Duration;

    fn governed_with_deny() -> Arc<GovernedPolicyEngine> {
        let log = Arc::new(MemoryPolicyLog::new(Arc::new(Sha256Signer)));
        log.append(
            Arc::new(DenyAllPolicy::new(100)),
            OffsetDateTime::now_utc() - Duration::minutes(1),
        )
        .unwrap();
        GovernedPolicyEngine::new(PolicyEngine::default(), log, true).unwrap()
    }

    #[test]
    fn loads_effective_policies_on_construction() {
        let governed = governed_with_deny();
        let payload = serde_json::json!({});
        let err = governed
            .enforce(&PolicyEvaluation {
                operation: Operation::Write,
                caller: None,
                document_id: "d1",
                payload: &payload,
            })
            .unwrap_err();
        assert!(matches!(err, AcornError::PolicyViolation { .. }));
    }

    #[test]
    fn construction_aborts_on_a_tampered_chain() {
        let log = Arc::new(MemoryPolicyLog::new(Arc::new(Sha256Signer)));
        log.append(Arc::new(DenyAllPolicy::new(1)), OffsetDateTime::now_utc())
            .unwrap();
        let mut seal = log.get_all_seals()[0].clone();
        seal.policy_body = serde_json::json!({"priority": 42});
        log.corrupt_seal_for_tests(0, seal);

        let result = GovernedPolicyEngine::new(PolicyEngine::default(), log, true);
        assert!(matches!(result, Err(AcornError::ChainIntegrity { .. })));
    }

    #[test]
    fn future_policies_are_logged_but_not_yet_active() {
        let log = Arc::new(MemoryPolicyLog::new(Arc::new(Sha256Signer)));
        let governed = GovernedPolicyEngine::new(PolicyEngine::default(), log, true).unwrap();
        governed
            .append_policy(
                Arc::new(DenyAllPolicy::new(100)),
                OffsetDateTime::now_utc() + Duration::hours(1),
            )
            .unwrap();
        assert_eq!(governed.log().get_all_seals().len(), 1);
        assert!(governed.engine().active_policies().is_empty());
    }
}
