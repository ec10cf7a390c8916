use serde::{de::DeserializeOwned, Serialize};

use crate::error::{AcornError, AcornResult};
use crate::nut::Nut;

/// Serialization hook between the document model and trunk storage.
pub trait NutCodec<T>: Send + Sync {
    fn encode(&self, nut: &Nut<T>) -> AcornResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> AcornResult<Nut<T>>;
}

#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl<T> NutCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, nut: &Nut<T>) -> AcornResult<Vec<u8>> {
        serde_json::to_vec(nut).map_err(|e| AcornError::Serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> AcornResult<Nut<T>> {
        serde_json::from_slice(bytes).map_err(|e| AcornError::Deserialization(e.to_string()))
    }
}
