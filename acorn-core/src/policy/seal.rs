use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::signer::Signer;
use super::Policy;
use crate::error::{AcornError, AcornResult};

pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// One entry of the append-only governance ledger. Seals are hash-chained:
/// each seal's `previous_hash` is the prior seal's signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySeal {
    pub index: u64,
    pub policy_type_id: String,
    pub policy_body: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub effective_at: OffsetDateTime,
    #[serde(with = "hash_hex")]
    pub previous_hash: [u8; 32],
    #[serde(with = "hash_hex")]
    pub root_chain_hash: [u8; 32],
    #[serde(with = "hash_hex")]
    pub signature: [u8; 32],
}

/// Field order here is the canonical signing layout; changing it breaks
/// every existing ledger.
#[derive(Serialize)]
struct SealPayload<'a> {
    index: u64,
    policy_type_id: &'a str,
    policy_body: &'a serde_json::Value,
    effective_at: String,
    previous_hash: String,
    root_chain_hash: String,
}

impl PolicySeal {
    pub fn create(
        policy: &dyn Policy,
        effective_at: OffsetDateTime,
        previous: Option<&PolicySeal>,
        signer: &dyn Signer,
        root_chain_hash: Option<[u8; 32]>,
    ) -> AcornResult<PolicySeal> {
        let (index, previous_hash) = match previous {
            Some(prev) => {
                if effective_at < prev.effective_at {
                    return Err(AcornError::ChainIntegrity {
                        index: prev.index as usize + 1,
                        reason: format!(
                            "effective_at {effective_at} regresses behind {}",
                            prev.effective_at
                        ),
                    });
                }
                (prev.index + 1, prev.signature)
            }
            None => (0, GENESIS_HASH),
        };

        let mut seal = PolicySeal {
            index,
            policy_type_id: policy.policy_type_id().to_string(),
            policy_body: policy.body()?,
            effective_at,
            previous_hash,
            root_chain_hash: root_chain_hash.unwrap_or(GENESIS_HASH),
            signature: [0u8; 32],
        };
        seal.signature = signer.sign(&seal.canonical_payload()?);
        Ok(seal)
    }

    pub fn canonical_payload(&self) -> AcornResult<Vec<u8>> {
        let effective_at = self
            .effective_at
            .format(&Rfc3339)
            .map_err(|e| AcornError::Serialization(e.to_string()))?;
        let payload = SealPayload {
            index: self.index,
            policy_type_id: &self.policy_type_id,
            policy_body: &self.policy_body,
            effective_at,
            previous_hash: hex::encode(self.previous_hash),
            root_chain_hash: hex::encode(self.root_chain_hash),
        };
        serde_json::to_vec(&payload).map_err(|e| AcornError::Serialization(e.to_string()))
    }

    pub fn verify_with(&self, signer: &dyn Signer) -> bool {
        match self.canonical_payload() {
            Ok(payload) => signer.verify(&payload, &self.signature),
            Err(_) => false,
        }
    }
}

mod hash_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let raw = hex::decode(&text).map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom("hash must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DenyAllPolicy, MaxPayloadBytesPolicy, Sha256Signer};

    fn at(unix: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(unix).unwrap()
    }

    #[test]
    fn genesis_seal_links_to_zero_hash() {
        let signer = Sha256Signer;
        let seal =
            PolicySeal::create(&DenyAllPolicy::new(1), at(1_000), None, &signer, None).unwrap();
        assert_eq!(seal.index, 0);
        assert_eq!(seal.previous_hash, GENESIS_HASH);
        assert!(seal.verify_with(&signer));
    }

    #[test]
    fn successor_links_to_previous_signature() {
        let signer = Sha256Signer;
        let first =
            PolicySeal::create(&DenyAllPolicy::new(1), at(1_000), None, &signer, None).unwrap();
        let second = PolicySeal::create(
            &DenyAllPolicy::new(2),
            at(2_000),
            Some(&first),
            &signer,
            None,
        )
        .unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.previous_hash, first.signature);
    }

    #[test]
    fn effective_at_must_not_regress() {
        let signer = Sha256Signer;
        let first =
            PolicySeal::create(&DenyAllPolicy::new(1), at(2_000), None, &signer, None).unwrap();
        let result = PolicySeal::create(
            &DenyAllPolicy::new(2),
            at(1_000),
            Some(&first),
            &signer,
            None,
        );
        assert!(matches!(result, Err(AcornError::ChainIntegrity { .. })));
    }

    #[test]
    fn swapping_the_policy_type_id_breaks_the_signature() {
        let signer = Sha256Signer;
        let mut seal =
            PolicySeal::create(&DenyAllPolicy::new(5), at(1_000), None, &signer, None).unwrap();
        assert!(seal.verify_with(&signer));
        seal.policy_type_id = MaxPayloadBytesPolicy::TYPE_ID.to_string();
        assert!(!seal.verify_with(&signer));
    }

    #[test]
    fn serde_round_trip_preserves_signature() {
        let signer = Sha256Signer;
        let seal =
            PolicySeal::create(&DenyAllPolicy::new(1), at(1_000), None, &signer, None).unwrap();
        let line = serde_json::to_string(&seal).unwrap();
        let back: PolicySeal = serde_json::from_str(&line).unwrap();
        assert_eq!(back, seal);
        assert!(back.verify_with(&signer));
    }
}
