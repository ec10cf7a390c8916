use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Policy, PolicyDecision, PolicyEvaluation};
use crate::error::{AcornError, AcornResult};

pub const DEFAULT_ENFORCEMENT_THRESHOLD: u8 = 50;

/// Holds the active policy set and turns deny decisions into errors. A deny
/// only blocks the operation when the policy's priority reaches the
/// enforcement threshold; lower-priority denials are advisory and logged.
pub struct PolicyEngine {
    policies: RwLock<Vec<Arc<dyn Policy>>>,
    enforcement_threshold: u8,
}

impl PolicyEngine {
    pub fn new(enforcement_threshold: u8) -> Self {
        PolicyEngine {
            policies: RwLock::new(Vec::new()),
            enforcement_threshold,
        }
    }

    pub fn enforcement_threshold(&self) -> u8 {
        self.enforcement_threshold
    }

    /// Adds or replaces (by name) an active policy.
    pub fn add_policy(&self, policy: Arc<dyn Policy>) {
        let mut policies = self.policies.write();
        policies.retain(|existing| existing.name() != policy.name());
        policies.push(policy);
    }

    pub fn active_policies(&self) -> Vec<Arc<dyn Policy>> {
        self.policies.read().clone()
    }

    /// Replaces the whole active set, keeping the latest policy per name.
    pub fn load_policies(&self, loaded: Vec<Arc<dyn Policy>>) {
        let mut by_name: HashMap<String, Arc<dyn Policy>> = HashMap::new();
        for policy in loaded {
            by_name.insert(policy.name().to_string(), policy);
        }
        *self.policies.write() = by_name.into_values().collect();
    }

    pub fn enforce(&self, eval: &PolicyEvaluation<'_>) -> AcornResult<()> {
        for policy in self.policies.read().iter() {
            if let PolicyDecision::Deny { reason } = policy.evaluate(eval) {
                if policy.priority() >= self.enforcement_threshold {
                    return Err(AcornError::PolicyViolation {
                        policy: policy.name().to_string(),
                        reason,
                    });
                }
                tracing::debug!(
                    policy = policy.name(),
                    priority = policy.priority(),
                    %reason,
                    "advisory policy denial below enforcement threshold"
                );
            }
        }
        Ok(())
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        PolicyEngine::new(DEFAULT_ENFORCEMENT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DenyAllPolicy;
    use crate::root::Operation;

    fn write_eval<'a>(payload: &'a serde_json::Value) -> PolicyEvaluation<'a> {
        PolicyEvaluation {
            operation: Operation::Write,
            caller: None,
            document_id: "d1",
            payload,
        }
    }

    #[test]
    fn denial_below_threshold_is_advisory() {
        let engine = PolicyEngine::new(50);
        engine.add_policy(Arc::new(DenyAllPolicy::new(10)));
        let payload = serde_json::json!({});
        assert!(engine.enforce(&write_eval(&payload)).is_ok());
    }

    #[test]
    fn denial_at_threshold_blocks_and_names_the_policy() {
        let engine = PolicyEngine::new(50);
        engine.add_policy(Arc::new(DenyAllPolicy::new(50)));
        let payload = serde_json::json!({});
        let err = engine.enforce(&write_eval(&payload)).unwrap_err();
        assert!(err.to_string().contains("DenyAllPolicy"));
    }

    #[test]
    fn add_policy_replaces_by_name() {
        let engine = PolicyEngine::default();
        engine.add_policy(Arc::new(DenyAllPolicy::new(1)));
        engine.add_policy(Arc::new(DenyAllPolicy::new(2)));
        let active = engine.active_policies();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].priority(), 2);
    }
}
