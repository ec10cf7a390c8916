use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Integrity primitive for the policy ledger. `verify` must compare in
/// constant time.
pub trait Signer: Send + Sync {
    fn sign(&self, payload: &[u8]) -> [u8; 32];
    fn verify(&self, payload: &[u8], signature: &[u8; 32]) -> bool;
}

/// Keyless SHA-256 integrity signer, the reference implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Signer;

impl Signer for Sha256Signer {
    fn sign(&self, payload: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        hasher.finalize().into()
    }

    fn verify(&self, payload: &[u8], signature: &[u8; 32]) -> bool {
        let computed = self.sign(payload);
        computed.as_slice().ct_eq(signature.as_slice()).into()
    }
}
