use std::sync::Arc;

use parking_lot::Mutex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::{Operation, Root, RootContext, POLICY_ENFORCEMENT_SEQUENCE};
use crate::error::{AcornError, AcornResult};
use crate::policy::{ChainState, ChainVerification, GovernedPolicyEngine, PolicyEvaluation};

/// Gates the pipeline on the governed policy engine. Sits at the lowest
/// sequence so it always sees the plain serialized envelope: first on
/// stash, last on crack.
pub struct PolicyEnforcementRoot {
    governed: Arc<GovernedPolicyEngine>,
    chain_cache: Mutex<Option<ChainState>>,
}

impl PolicyEnforcementRoot {
    pub fn new(governed: Arc<GovernedPolicyEngine>) -> Self {
        PolicyEnforcementRoot {
            governed,
            chain_cache: Mutex::new(None),
        }
    }

    /// Forces the next operation to re-verify the ledger chain.
    pub fn invalidate_chain_cache(&self) {
        *self.chain_cache.lock() = None;
    }

    /// The ledger is validated once per process and the result cached;
    /// invalidation is explicit.
    fn ensure_chain(&self) -> AcornResult<ChainState> {
        let mut cache = self.chain_cache.lock();
        if let Some(state) = cache.as_ref() {
            return Ok(state.clone());
        }
        let verification = self.governed.verify_chain();
        if let ChainVerification::Invalid { index, reason } = verification {
            return Err(AcornError::ChainIntegrity { index, reason });
        }
        let state = ChainState {
            verified_at: OffsetDateTime::now_utc(),
            seal_count: self.governed.log().get_all_seals().len(),
            valid: true,
        };
        *cache = Some(state.clone());
        Ok(state)
    }

    fn enforce(&self, envelope: &serde_json::Value, ctx: &RootContext) -> AcornResult<()> {
        let payload = envelope
            .get("payload")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        self.governed.enforce(&PolicyEvaluation {
            operation: ctx.operation,
            caller: ctx.caller.as_deref(),
            document_id: &ctx.document_id,
            payload: &payload,
        })
    }
}

fn parse_envelope(bytes: &[u8]) -> AcornResult<serde_json::Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| AcornError::Deserialization(format!("unreadable envelope: {e}")))
}

fn envelope_expired(envelope: &serde_json::Value) -> bool {
    envelope
        .get("expires_at")
        .and_then(|v| v.as_str())
        .and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())
        .is_some_and(|at| at < OffsetDateTime::now_utc())
}

impl Root for PolicyEnforcementRoot {
    fn name(&self) -> &str {
        "policy-enforcement"
    }

    fn sequence(&self) -> i32 {
        POLICY_ENFORCEMENT_SEQUENCE
    }

    fn on_stash(&self, bytes: Vec<u8>, ctx: &mut RootContext) -> AcornResult<Vec<u8>> {
        ctx.chain_state = Some(self.ensure_chain()?);
        let envelope = parse_envelope(&bytes)?;
        self.enforce(&envelope, ctx)?;
        ctx.transformation_signatures.push("policy:enforced".to_string());
        Ok(bytes)
    }

    fn on_crack(&self, bytes: Vec<u8>, ctx: &mut RootContext) -> AcornResult<Vec<u8>> {
        ctx.chain_state = Some(self.ensure_chain()?);
        let envelope = parse_envelope(&bytes)?;
        if envelope_expired(&envelope) {
            // Expired documents read as absent, not as an error.
            return Err(AcornError::MissingKey(ctx.document_id.clone()));
        }
        self.enforce(&envelope, ctx)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{
        DenyAllPolicy, MemoryPolicyLog, PolicyEngine, PolicyLog, Sha256Signer, TagAccessPolicy,
    };
    use std::collections::BTreeSet;
    use time::Duration;

    fn governed(policies: Vec<Arc<dyn crate::policy::Policy>>) -> Arc<GovernedPolicyEngine> {
        let log = Arc::new(MemoryPolicyLog::new(Arc::new(Sha256Signer)));
        let effective = OffsetDateTime::now_utc() - Duration::minutes(1);
        for policy in policies {
            log.append(policy, effective).unwrap();
        }
        GovernedPolicyEngine::new(PolicyEngine::default(), log, true).unwrap()
    }

    fn envelope_bytes(payload: serde_json::Value) -> Vec<u8> {
        serde_json::json!({
            "id": "d1",
            "payload": payload,
            "timestamp": "2024-05-01T12:00:00Z",
            "version": 1
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn write_denied_by_enforced_policy() {
        let root = PolicyEnforcementRoot::new(governed(vec![Arc::new(DenyAllPolicy::new(100))]));
        let result = root.on_stash(envelope_bytes(serde_json::json!({})), &mut RootContext::write("d1"));
        match result {
            Err(AcornError::PolicyViolation { policy, .. }) => assert_eq!(policy, "DenyAllPolicy"),
            other => panic!("expected policy violation, got {other:?}"),
        }
    }

    #[test]
    fn allowed_write_passes_bytes_through_and_caches_chain_state() {
        let root = PolicyEnforcementRoot::new(governed(vec![]));
        let bytes = envelope_bytes(serde_json::json!({"name": "alice"}));
        let mut ctx = RootContext::write("d1");
        let out = root.on_stash(bytes.clone(), &mut ctx).unwrap();
        assert_eq!(out, bytes);
        assert!(ctx.chain_state.as_ref().unwrap().valid);
        assert_eq!(ctx.transformation_signatures, vec!["policy:enforced"]);
    }

    #[test]
    fn read_of_expired_envelope_is_missing() {
        let root = PolicyEnforcementRoot::new(governed(vec![]));
        let bytes = serde_json::json!({
            "id": "d1",
            "payload": {},
            "timestamp": "2020-01-01T00:00:00Z",
            "version": 1,
            "expires_at": "2020-01-02T00:00:00Z"
        })
        .to_string()
        .into_bytes();
        let result = root.on_crack(bytes, &mut RootContext::read("d1"));
        assert!(matches!(result, Err(AcornError::MissingKey(_))));
    }

    #[test]
    fn read_tag_access_enforced_per_caller() {
        let root = PolicyEnforcementRoot::new(governed(vec![Arc::new(TagAccessPolicy {
            protected_tag: "secret".into(),
            allowed_callers: BTreeSet::from(["auditor".to_string()]),
            priority: 100,
        })]));
        let bytes = envelope_bytes(serde_json::json!({"tags": ["secret"]}));

        let denied = root.on_crack(bytes.clone(), &mut RootContext::read("d1"));
        assert!(matches!(denied, Err(AcornError::PolicyViolation { .. })));

        let allowed = root.on_crack(bytes, &mut RootContext::read("d1").with_caller("auditor"));
        assert!(allowed.is_ok());
    }
}
