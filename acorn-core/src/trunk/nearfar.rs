use std::sync::Arc;

use tracing::warn;

use super::{Trunk, TrunkCapabilities};
use crate::error::AcornResult;
use crate::nut::Nut;

/// How writes treat the two cache levels. The backing store always gets
/// the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FarWritePolicy {
    /// Update near and far alongside the backing store.
    WriteThrough,
    /// Drop the entry from both levels; the next read repopulates.
    Invalidate,
    /// Leave the caches alone entirely.
    WriteAround,
}

/// Two-level cache composition: a fast local level, a shared far level, and
/// the durable backing store. Reads fall through near, far, backing.
pub struct NearFarTrunk<T> {
    near: Arc<dyn Trunk<T>>,
    far: Arc<dyn Trunk<T>>,
    backing: Arc<dyn Trunk<T>>,
    policy: FarWritePolicy,
}

impl<T> NearFarTrunk<T> {
    pub fn new(
        near: Arc<dyn Trunk<T>>,
        far: Arc<dyn Trunk<T>>,
        backing: Arc<dyn Trunk<T>>,
        policy: FarWritePolicy,
    ) -> Self {
        NearFarTrunk {
            near,
            far,
            backing,
            policy,
        }
    }

    fn drop_cached(&self, id: &str) {
        if let Err(err) = self.near.toss(id) {
            warn!(%id, %err, "near-level invalidation failed");
        }
        if let Err(err) = self.far.toss(id) {
            warn!(%id, %err, "far-level invalidation failed");
        }
    }
}

impl<T> Trunk<T> for NearFarTrunk<T>
where
    T: Clone + Send + Sync,
{
    fn stash(&self, id: &str, nut: &Nut<T>) -> AcornResult<()> {
        self.backing.stash(id, nut)?;
        match self.policy {
            FarWritePolicy::WriteThrough => {
                self.near.stash(id, nut)?;
                self.far.stash(id, nut)?;
            }
            FarWritePolicy::Invalidate => self.drop_cached(id),
            FarWritePolicy::WriteAround => {}
        }
        Ok(())
    }

    fn crack(&self, id: &str) -> AcornResult<Option<Nut<T>>> {
        if let Some(nut) = self.near.crack(id)? {
            return Ok(Some(nut));
        }
        if let Some(nut) = self.far.crack(id)? {
            self.near.stash(id, &nut)?;
            return Ok(Some(nut));
        }
        match self.backing.crack(id)? {
            Some(nut) => {
                self.far.stash(id, &nut)?;
                self.near.stash(id, &nut)?;
                Ok(Some(nut))
            }
            None => Ok(None),
        }
    }

    fn toss(&self, id: &str) -> AcornResult<()> {
        self.drop_cached(id);
        self.backing.toss(id)
    }

    fn crack_all(&self) -> AcornResult<Vec<Nut<T>>> {
        self.backing.crack_all()
    }

    fn get_history(&self, id: &str) -> AcornResult<Vec<Nut<T>>> {
        self.backing.get_history(id)
    }

    fn flush(&self) -> AcornResult<()> {
        self.backing.flush()
    }

    fn capabilities(&self) -> TrunkCapabilities {
        TrunkCapabilities {
            trunk_type: "near-far",
            ..self.backing.capabilities()
        }
    }

    fn dispose(&self) {
        self.near.dispose();
        self.far.dispose();
        self.backing.dispose();
    }
}
