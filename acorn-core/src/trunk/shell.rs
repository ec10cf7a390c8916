use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{de::DeserializeOwned, Serialize};

use crate::codec::{JsonCodec, NutCodec};
use crate::error::{AcornError, AcornResult};
use crate::nut::Nut;
use crate::root::{Root, RootContext, RootDescriptor, RootPipeline};

/// Turns nuts into their stored form (the "shell") and back: codec first,
/// then the root pipeline. Every trunk owns one.
pub struct ShellCodec<T> {
    codec: Arc<dyn NutCodec<T>>,
    pipeline: RootPipeline,
}

impl<T> ShellCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn json() -> Self {
        ShellCodec {
            codec: Arc::new(JsonCodec),
            pipeline: RootPipeline::new(),
        }
    }

    pub fn with_codec(codec: Arc<dyn NutCodec<T>>) -> Self {
        ShellCodec {
            codec,
            pipeline: RootPipeline::new(),
        }
    }

    pub fn add_root(&self, root: Arc<dyn Root>) {
        self.pipeline.add(root);
    }

    pub fn remove_root(&self, name: &str) -> bool {
        self.pipeline.remove(name)
    }

    pub fn roots(&self) -> Vec<RootDescriptor> {
        self.pipeline.descriptors()
    }

    pub fn encode(&self, nut: &Nut<T>) -> AcornResult<Vec<u8>> {
        let bytes = self.codec.encode(nut)?;
        let mut ctx = RootContext::write(&nut.id);
        self.pipeline.stash(bytes, &mut ctx)
    }

    pub fn decode(&self, id: &str, blob: &[u8]) -> AcornResult<Nut<T>> {
        let mut ctx = RootContext::read(id);
        let bytes = self.pipeline.crack(blob.to_vec(), &mut ctx)?;
        self.codec.decode(&bytes)
    }

    /// Stored form for text-only slots: raw serialized bytes while no root
    /// is registered, base64-wrapped once the pipeline transforms them.
    pub fn encode_text(&self, nut: &Nut<T>) -> AcornResult<String> {
        let blob = self.encode(nut)?;
        if self.pipeline.is_empty() {
            String::from_utf8(blob)
                .map_err(|e| AcornError::Serialization(format!("shell is not utf-8: {e}")))
        } else {
            Ok(BASE64.encode(blob))
        }
    }

    /// Base64 is attempted first; raw UTF-8 is the backward-compatibility
    /// fallback for shells written before any root was registered.
    pub fn decode_text(&self, id: &str, slot: &str) -> AcornResult<Nut<T>> {
        if let Ok(blob) = BASE64.decode(slot.trim()) {
            match self.decode(id, &blob) {
                Ok(nut) => return Ok(nut),
                Err(AcornError::PolicyViolation { policy, reason }) => {
                    return Err(AcornError::PolicyViolation { policy, reason })
                }
                Err(AcornError::MissingKey(id)) => return Err(AcornError::MissingKey(id)),
                Err(_) => {}
            }
        }
        self.codec.decode(slot.as_bytes())
    }
}
