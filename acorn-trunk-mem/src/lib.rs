//! In-memory trunk: shells live in a process-local map. Nothing survives a
//! restart, which makes it the reference backend for tests and caches.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use acorn_core::root::{Root, RootDescriptor};
use acorn_core::{AcornError, AcornResult, Nut, ShellCodec, Trunk, TrunkCapabilities};

pub struct MemoryTrunk<T> {
    shells: RwLock<HashMap<String, Vec<u8>>>,
    io: ShellCodec<T>,
}

impl<T> MemoryTrunk<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new() -> Self {
        MemoryTrunk {
            shells: RwLock::new(HashMap::new()),
            io: ShellCodec::json(),
        }
    }

    pub fn with_shell(io: ShellCodec<T>) -> Self {
        MemoryTrunk {
            shells: RwLock::new(HashMap::new()),
            io,
        }
    }

    pub fn len(&self) -> usize {
        self.shells.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shells.read().is_empty()
    }

    fn decode(&self, id: &str, shell: &[u8]) -> AcornResult<Option<Nut<T>>> {
        match self.io.decode(id, shell) {
            Ok(nut) if nut.is_expired() => Ok(None),
            Ok(nut) => Ok(Some(nut)),
            Err(AcornError::Deserialization(message)) => {
                warn!(%id, %message, "undecodable shell treated as absent");
                Ok(None)
            }
            Err(AcornError::MissingKey(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl<T> Default for MemoryTrunk<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn default() -> Self {
        MemoryTrunk::new()
    }
}

impl<T> Trunk<T> for MemoryTrunk<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn stash(&self, id: &str, nut: &Nut<T>) -> AcornResult<()> {
        let shell = self.io.encode(nut)?;
        self.shells.write().insert(id.to_string(), shell);
        Ok(())
    }

    fn crack(&self, id: &str) -> AcornResult<Option<Nut<T>>> {
        let shells = self.shells.read();
        match shells.get(id) {
            Some(shell) => {
                let shell = shell.clone();
                drop(shells);
                self.decode(id, &shell)
            }
            None => Ok(None),
        }
    }

    fn toss(&self, id: &str) -> AcornResult<()> {
        self.shells.write().remove(id);
        Ok(())
    }

    fn crack_all(&self) -> AcornResult<Vec<Nut<T>>> {
        let shells: Vec<(String, Vec<u8>)> = self
            .shells
            .read()
            .iter()
            .map(|(id, shell)| (id.clone(), shell.clone()))
            .collect();
        let mut nuts = Vec::with_capacity(shells.len());
        for (id, shell) in shells {
            if let Some(nut) = self.decode(&id, &shell)? {
                nuts.push(nut);
            }
        }
        Ok(nuts)
    }

    fn roots(&self) -> Vec<RootDescriptor> {
        self.io.roots()
    }

    fn add_root(&self, root: Arc<dyn Root>) {
        self.io.add_root(root);
    }

    fn remove_root(&self, name: &str) -> bool {
        self.io.remove_root(name)
    }

    fn capabilities(&self) -> TrunkCapabilities {
        TrunkCapabilities::volatile("memory")
    }

    fn dispose(&self) {
        self.shells.write().clear();
    }
}
