use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::Sha256;

use super::{Root, RootContext, ENCRYPTION_SEQUENCE};
use crate::error::{AcornError, AcornResult};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Key material for the encryption root: either a caller-supplied key or a
/// password run through PBKDF2-HMAC-SHA256.
#[derive(Clone)]
pub enum EncryptionOptions {
    Key([u8; KEY_LEN]),
    Password {
        password: String,
        salt: Vec<u8>,
        iterations: u32,
    },
}

impl EncryptionOptions {
    fn derive(&self) -> AcornResult<[u8; KEY_LEN]> {
        match self {
            EncryptionOptions::Key(key) => Ok(*key),
            EncryptionOptions::Password {
                password,
                salt,
                iterations,
            } => {
                if salt.is_empty() {
                    return Err(AcornError::Serialization(
                        "encryption salt must not be empty".into(),
                    ));
                }
                let mut key = [0u8; KEY_LEN];
                pbkdf2::pbkdf2_hmac::<Sha256>(
                    password.as_bytes(),
                    salt,
                    (*iterations).max(MIN_PBKDF2_ITERATIONS),
                    &mut key,
                );
                Ok(key)
            }
        }
    }
}

/// AES-256-GCM byte transform. The ciphertext layout is `nonce || sealed`.
pub struct EncryptionRoot {
    cipher: Aes256Gcm,
}

impl EncryptionRoot {
    pub fn new(options: EncryptionOptions) -> AcornResult<Self> {
        let key = options.derive()?;
        Ok(EncryptionRoot {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        })
    }

    pub fn with_key(key: [u8; KEY_LEN]) -> Self {
        EncryptionRoot {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    pub fn from_password(password: &str, salt: &[u8]) -> AcornResult<Self> {
        EncryptionRoot::new(EncryptionOptions::Password {
            password: password.to_string(),
            salt: salt.to_vec(),
            iterations: MIN_PBKDF2_ITERATIONS,
        })
    }
}

impl Root for EncryptionRoot {
    fn name(&self) -> &str {
        "encryption"
    }

    fn sequence(&self) -> i32 {
        ENCRYPTION_SEQUENCE
    }

    fn on_stash(&self, bytes: Vec<u8>, ctx: &mut RootContext) -> AcornResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), bytes.as_slice())
            .map_err(|_| AcornError::Serialization("encryption failed".into()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        ctx.transformation_signatures.push("aes-256-gcm".to_string());
        Ok(out)
    }

    fn on_crack(&self, bytes: Vec<u8>, _ctx: &mut RootContext) -> AcornResult<Vec<u8>> {
        if bytes.len() <= NONCE_LEN {
            return Err(AcornError::Deserialization(
                "ciphertext shorter than nonce".into(),
            ));
        }
        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| AcornError::Deserialization("ciphertext authentication failed".into()))
    }
}
