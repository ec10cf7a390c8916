use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{Trunk, TrunkCapabilities};
use crate::error::AcornResult;
use crate::nut::Nut;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    pub ttl: Option<Duration>,
    pub max_entries: Option<usize>,
}

struct CacheEntry<T> {
    nut: Nut<T>,
    cached_at: Instant,
}

/// Read-through, write-through cache in front of a backing trunk. Eviction
/// approximates LRU by dropping the oldest cached_at when over capacity.
pub struct CachedTrunk<T> {
    backing: Arc<dyn Trunk<T>>,
    options: CacheOptions,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T> CachedTrunk<T> {
    pub fn new(backing: Arc<dyn Trunk<T>>, options: CacheOptions) -> Self {
        CachedTrunk {
            backing,
            options,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.entries.lock().len()
    }

    fn remember(&self, nut: Nut<T>) {
        let mut entries = self.entries.lock();
        entries.insert(
            nut.id.clone(),
            CacheEntry {
                nut,
                cached_at: Instant::now(),
            },
        );
        if let Some(cap) = self.options.max_entries {
            while entries.len() > cap {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.cached_at)
                    .map(|(id, _)| id.clone());
                match oldest {
                    Some(id) => entries.remove(&id),
                    None => break,
                };
            }
        }
    }

    fn fresh(&self, entry: &CacheEntry<T>) -> bool {
        match self.options.ttl {
            Some(ttl) => entry.cached_at.elapsed() <= ttl,
            None => true,
        }
    }
}

impl<T> Trunk<T> for CachedTrunk<T>
where
    T: Clone + Send + Sync,
{
    fn stash(&self, id: &str, nut: &Nut<T>) -> AcornResult<()> {
        self.backing.stash(id, nut)?;
        self.remember(nut.clone());
        Ok(())
    }

    fn crack(&self, id: &str) -> AcornResult<Option<Nut<T>>> {
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get(id) {
                if self.fresh(entry) && !entry.nut.is_expired() {
                    return Ok(Some(entry.nut.clone()));
                }
                entries.remove(id);
            }
        }
        let loaded = self.backing.crack(id)?;
        if let Some(nut) = &loaded {
            self.remember(nut.clone());
        }
        Ok(loaded)
    }

    fn toss(&self, id: &str) -> AcornResult<()> {
        self.entries.lock().remove(id);
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
            trunk_type: "cached",
            ..self.backing.capabilities()
        }
    }

    fn dispose(&self) {
        self.entries.lock().clear();
        self.backing.dispose();
    }
}
