//! The trunk contract shared by every backend, plus the plumbing common to
//! all of them: shell encoding through the root pipeline, write batching,
//! and the composed wrapper trunks.

mod batch;
mod cached;
mod nearfar;
mod resilient;
mod shell;
#[cfg(test)]
pub(crate) mod test_support;
mod tiered;

pub use batch::{BatchBuffer, BatchOptions, PendingWrite};
pub use cached::{CacheOptions, CachedTrunk};
pub use nearfar::{FarWritePolicy, NearFarTrunk};
pub use resilient::{BreakerState, ResilientTrunk, RetryOptions};
pub use shell::ShellCodec;
pub use tiered::{TierOptions, TieredTrunk};

use std::sync::Arc;

use time::OffsetDateTime;

use crate::error::{AcornError, AcornResult};
use crate::nut::Nut;
use crate::root::{Root, RootDescriptor};

/// What a backend can and cannot do, declared up front so composition and
/// sync can dispatch without probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrunkCapabilities {
    pub supports_history: bool,
    pub supports_sync: bool,
    pub is_durable: bool,
    pub supports_async: bool,
    pub supports_native_indexes: bool,
    pub supports_full_text_search: bool,
    pub supports_computed_indexes: bool,
    pub trunk_type: &'static str,
}

impl TrunkCapabilities {
    /// Baseline for a synchronous, non-durable backend.
    pub const fn volatile(trunk_type: &'static str) -> Self {
        TrunkCapabilities {
            supports_history: false,
            supports_sync: true,
            is_durable: false,
            supports_async: false,
            supports_native_indexes: false,
            supports_full_text_search: false,
            supports_computed_indexes: false,
            trunk_type,
        }
    }

    pub const fn durable(trunk_type: &'static str) -> Self {
        let mut caps = TrunkCapabilities::volatile(trunk_type);
        caps.is_durable = true;
        caps
    }
}

/// The durable backend behind a tree.
pub trait Trunk<T>: Send + Sync {
    fn stash(&self, id: &str, nut: &Nut<T>) -> AcornResult<()>;
    fn crack(&self, id: &str) -> AcornResult<Option<Nut<T>>>;
    fn toss(&self, id: &str) -> AcornResult<()>;
    fn crack_all(&self) -> AcornResult<Vec<Nut<T>>>;

    fn get_history(&self, _id: &str) -> AcornResult<Vec<Nut<T>>> {
        Err(AcornError::HistoryUnsupported {
            trunk_type: self.capabilities().trunk_type,
        })
    }

    fn export_changes(&self) -> AcornResult<Vec<Nut<T>>> {
        self.crack_all()
    }

    fn export_changes_since(&self, since: OffsetDateTime) -> AcornResult<Vec<Nut<T>>> {
        Ok(self
            .crack_all()?
            .into_iter()
            .filter(|nut| nut.timestamp > since)
            .collect())
    }

    /// Adopts foreign nuts, keeping whichever side has the later timestamp.
    fn import_changes(&self, nuts: Vec<Nut<T>>) -> AcornResult<()> {
        for nut in nuts {
            let keep_incoming = match self.crack(&nut.id)? {
                Some(existing) => nut.timestamp > existing.timestamp,
                None => true,
            };
            if keep_incoming {
                self.stash(&nut.id, &nut)?;
            }
        }
        Ok(())
    }

    fn roots(&self) -> Vec<RootDescriptor> {
        Vec::new()
    }

    fn add_root(&self, _root: Arc<dyn Root>) {}

    fn remove_root(&self, _name: &str) -> bool {
        false
    }

    /// Pushes any buffered writes down to the backend.
    fn flush(&self) -> AcornResult<()> {
        Ok(())
    }

    fn capabilities(&self) -> TrunkCapabilities;

    /// Idempotent. Flushes, stops background work, releases backend handles.
    fn dispose(&self) {}
}
