//! Policy governance: the policies that gate reads and writes, the engine
//! that evaluates them, and the tamper-evident ledger they are appended to.

mod engine;
mod file_log;
mod governed;
mod log;
mod seal;
mod signer;

pub use engine::{PolicyEngine, DEFAULT_ENFORCEMENT_THRESHOLD};
pub use file_log::FilePolicyLog;
pub use governed::GovernedPolicyEngine;
pub use log::{ChainVerification, MemoryPolicyLog, PolicyLog};
pub use seal::PolicySeal;
pub use signer::{Sha256Signer, Signer};

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{AcornError, AcornResult};
use crate::root::Operation;

/// Snapshot of the last ledger verification, cached by the policy root and
/// carried through the root pipeline context.
#[derive(Debug, Clone)]
pub struct ChainState {
    pub verified_at: OffsetDateTime,
    pub seal_count: usize,
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
}

impl PolicyDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        PolicyDecision::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, PolicyDecision::Deny { .. })
    }
}

/// Everything a policy may inspect when judging one operation.
#[derive(Debug, Clone, Copy)]
pub struct PolicyEvaluation<'a> {
    pub operation: Operation,
    pub caller: Option<&'a str>,
    pub document_id: &'a str,
    pub payload: &'a serde_json::Value,
}

/// A governance rule. The type id is stable and part of the signed seal
/// payload, so two policy types with identical bodies still sign differently.
pub trait Policy: Send + Sync + Debug {
    fn name(&self) -> &str;
    fn description(&self) -> &str {
        ""
    }
    fn priority(&self) -> u8;
    fn policy_type_id(&self) -> &'static str;
    fn evaluate(&self, eval: &PolicyEvaluation<'_>) -> PolicyDecision;
    /// Canonical serialized body, stored in and signed into the ledger.
    fn body(&self) -> AcornResult<serde_json::Value>;
}

fn body_of<P: Serialize>(policy: &P) -> AcornResult<serde_json::Value> {
    serde_json::to_value(policy).map_err(|e| AcornError::Serialization(e.to_string()))
}

/// Denies every write. Useful as a circuit stop and in governance tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenyAllPolicy {
    pub priority: u8,
}

impl DenyAllPolicy {
    pub const TYPE_ID: &'static str = "acorn.policy.deny-all";

    pub fn new(priority: u8) -> Self {
        DenyAllPolicy { priority }
    }
}

impl Policy for DenyAllPolicy {
    fn name(&self) -> &str {
        "DenyAllPolicy"
    }

    fn description(&self) -> &str {
        "denies every write"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn policy_type_id(&self) -> &'static str {
        DenyAllPolicy::TYPE_ID
    }

    fn evaluate(&self, eval: &PolicyEvaluation<'_>) -> PolicyDecision {
        match eval.operation {
            Operation::Write => PolicyDecision::deny("all writes are denied"),
            Operation::Read => PolicyDecision::Allow,
        }
    }

    fn body(&self) -> AcornResult<serde_json::Value> {
        body_of(self)
    }
}

/// Restricts documents tagged with `protected_tag` to the listed callers.
/// Applies to reads and writes; untagged documents pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagAccessPolicy {
    pub protected_tag: String,
    pub allowed_callers: BTreeSet<String>,
    pub priority: u8,
}

impl TagAccessPolicy {
    pub const TYPE_ID: &'static str = "acorn.policy.tag-access";

    fn document_tags(payload: &serde_json::Value) -> Vec<&str> {
        payload
            .get("tags")
            .and_then(|tags| tags.as_array())
            .map(|tags| tags.iter().filter_map(|t| t.as_str()).collect())
            .unwrap_or_default()
    }
}

impl Policy for TagAccessPolicy {
    fn name(&self) -> &str {
        "TagAccessPolicy"
    }

    fn description(&self) -> &str {
        "restricts tagged documents to an allow-list of callers"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn policy_type_id(&self) -> &'static str {
        TagAccessPolicy::TYPE_ID
    }

    fn evaluate(&self, eval: &PolicyEvaluation<'_>) -> PolicyDecision {
        if !Self::document_tags(eval.payload).contains(&self.protected_tag.as_str()) {
            return PolicyDecision::Allow;
        }
        match eval.caller {
            Some(caller) if self.allowed_callers.contains(caller) => PolicyDecision::Allow,
            Some(caller) => PolicyDecision::deny(format!(
                "caller {caller} may not touch documents tagged {}",
                self.protected_tag
            )),
            None => PolicyDecision::deny(format!(
                "anonymous access to documents tagged {} is denied",
                self.protected_tag
            )),
        }
    }

    fn body(&self) -> AcornResult<serde_json::Value> {
        body_of(self)
    }
}

/// Caps the serialized payload size on writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxPayloadBytesPolicy {
    pub max_bytes: usize,
    pub priority: u8,
}

impl MaxPayloadBytesPolicy {
    pub const TYPE_ID: &'static str = "acorn.policy.max-payload-bytes";
}

impl Policy for MaxPayloadBytesPolicy {
    fn name(&self) -> &str {
        "MaxPayloadBytesPolicy"
    }

    fn description(&self) -> &str {
        "caps the serialized payload size"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn policy_type_id(&self) -> &'static str {
        MaxPayloadBytesPolicy::TYPE_ID
    }

    fn evaluate(&self, eval: &PolicyEvaluation<'_>) -> PolicyDecision {
        if eval.operation != Operation::Write {
            return PolicyDecision::Allow;
        }
        let size = eval.payload.to_string().len();
        if size > self.max_bytes {
            PolicyDecision::deny(format!(
                "payload is {size} bytes, limit is {}",
                self.max_bytes
            ))
        } else {
            PolicyDecision::Allow
        }
    }

    fn body(&self) -> AcornResult<serde_json::Value> {
        body_of(self)
    }
}

type PolicyDecoder = fn(&serde_json::Value) -> AcornResult<Arc<dyn Policy>>;

fn decode_as<P>(body: &serde_json::Value) -> AcornResult<Arc<dyn Policy>>
where
    P: Policy + serde::de::DeserializeOwned + 'static,
{
    let policy: P = serde_json::from_value(body.clone())
        .map_err(|e| AcornError::Deserialization(e.to_string()))?;
    Ok(Arc::new(policy))
}

/// Maps stable policy type ids to deserializers so ledgers can be reloaded
/// from disk. Custom policy types register themselves here.
#[derive(Clone)]
pub struct PolicyCodex {
    decoders: HashMap<&'static str, PolicyDecoder>,
}

impl PolicyCodex {
    pub fn empty() -> Self {
        PolicyCodex {
            decoders: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut codex = PolicyCodex::empty();
        codex.register(DenyAllPolicy::TYPE_ID, decode_as::<DenyAllPolicy>);
        codex.register(TagAccessPolicy::TYPE_ID, decode_as::<TagAccessPolicy>);
        codex.register(
            MaxPayloadBytesPolicy::TYPE_ID,
            decode_as::<MaxPayloadBytesPolicy>,
        );
        codex
    }

    pub fn register(&mut self, type_id: &'static str, decoder: PolicyDecoder) {
        self.decoders.insert(type_id, decoder);
    }

    pub fn decode(&self, type_id: &str, body: &serde_json::Value) -> AcornResult<Arc<dyn Policy>> {
        match self.decoders.get(type_id) {
            Some(decoder) => decoder(body),
            None => Err(AcornError::Deserialization(format!(
                "unknown policy type id: {type_id}"
            ))),
        }
    }
}

impl Default for PolicyCodex {
    fn default() -> Self {
        PolicyCodex::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval<'a>(
        operation: Operation,
        caller: Option<&'a str>,
        payload: &'a serde_json::Value,
    ) -> PolicyEvaluation<'a> {
        PolicyEvaluation {
            operation,
            caller,
            document_id: "d1",
            payload,
        }
    }

    #[test]
    fn deny_all_blocks_writes_but_not_reads() {
        let policy = DenyAllPolicy::new(100);
        let payload = serde_json::json!({"name": "alice"});
        assert!(policy.evaluate(&eval(Operation::Write, None, &payload)).is_deny());
        assert!(!policy.evaluate(&eval(Operation::Read, None, &payload)).is_deny());
    }

    #[test]
    fn tag_access_gates_tagged_documents_only() {
        let policy = TagAccessPolicy {
            protected_tag: "secret".into(),
            allowed_callers: BTreeSet::from(["auditor".to_string()]),
            priority: 90,
        };
        let tagged = serde_json::json!({"tags": ["secret"], "name": "x"});
        let untagged = serde_json::json!({"name": "x"});

        assert!(!policy.evaluate(&eval(Operation::Read, None, &untagged)).is_deny());
        assert!(policy.evaluate(&eval(Operation::Read, None, &tagged)).is_deny());
        assert!(policy
            .evaluate(&eval(Operation::Read, Some("intern"), &tagged))
            .is_deny());
        assert!(!policy
            .evaluate(&eval(Operation::Read, Some("auditor"), &tagged))
            .is_deny());
    }

    #[test]
    fn codex_round_trips_builtin_policies() {
        let codex = PolicyCodex::builtin();
        let original = DenyAllPolicy::new(77);
        let body = original.body().unwrap();
        let decoded = codex.decode(DenyAllPolicy::TYPE_ID, &body).unwrap();
        assert_eq!(decoded.name(), "DenyAllPolicy");
        assert_eq!(decoded.priority(), 77);
    }

    #[test]
    fn codex_rejects_unknown_type_ids() {
        let codex = PolicyCodex::builtin();
        let result = codex.decode("acorn.policy.unknown", &serde_json::json!({}));
        assert!(matches!(result, Err(AcornError::Deserialization(_))));
    }
}
