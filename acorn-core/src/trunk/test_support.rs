//! A minimal instrumented trunk for exercising wrappers and the tree
//! without pulling in a real backend crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{Trunk, TrunkCapabilities};
use crate::error::{AcornError, AcornResult};
use crate::nut::Nut;

pub(crate) struct ProbeTrunk<T = u32> {
    store: Mutex<HashMap<String, Nut<T>>>,
    history: Mutex<HashMap<String, Vec<Nut<T>>>>,
    with_history: bool,
    crack_calls: AtomicUsize,
    stash_calls: AtomicUsize,
    fail_stashes: AtomicUsize,
    fail_cracks: AtomicUsize,
}

impl<T> Default for ProbeTrunk<T> {
    fn default() -> Self {
        ProbeTrunk {
            store: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            with_history: false,
            crack_calls: AtomicUsize::new(0),
            stash_calls: AtomicUsize::new(0),
            fail_stashes: AtomicUsize::new(0),
            fail_cracks: AtomicUsize::new(0),
        }
    }
}

impl<T> ProbeTrunk<T> {
    pub(crate) fn with_history() -> Self {
        ProbeTrunk {
            with_history: true,
            ..ProbeTrunk::default()
        }
    }

    pub(crate) fn crack_calls(&self) -> usize {
        self.crack_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn stash_calls(&self) -> usize {
        self.stash_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_next_stashes(&self, n: usize) {
        self.fail_stashes.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_cracks(&self, n: usize) {
        self.fail_cracks.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<T> Trunk<T> for ProbeTrunk<T>
where
    T: Clone + Send + Sync,
{
    fn stash(&self, id: &str, nut: &Nut<T>) -> AcornResult<()> {
        self.stash_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_stashes) {
            return Err(AcornError::Transient("probe stash failure".into()));
        }
        let previous = self.store.lock().insert(id.to_string(), nut.clone());
        if let Some(previous) = previous {
            self.history.lock().entry(id.to_string()).or_default().push(previous);
        }
        Ok(())
    }

    fn crack(&self, id: &str) -> AcornResult<Option<Nut<T>>> {
        self.crack_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_cracks) {
            return Err(AcornError::Transient("probe crack failure".into()));
        }
        Ok(self
            .store
            .lock()
            .get(id)
            .filter(|nut| !nut.is_expired())
            .cloned())
    }

    fn toss(&self, id: &str) -> AcornResult<()> {
        if let Some(previous) = self.store.lock().remove(id) {
            self.history.lock().entry(id.to_string()).or_default().push(previous);
        }
        Ok(())
    }

    fn crack_all(&self) -> AcornResult<Vec<Nut<T>>> {
        Ok(self
            .store
            .lock()
            .values()
            .filter(|nut| !nut.is_expired())
            .cloned()
            .collect())
    }

    fn get_history(&self, id: &str) -> AcornResult<Vec<Nut<T>>> {
        if !self.with_history {
            return Err(AcornError::HistoryUnsupported {
                trunk_type: "probe",
            });
        }
        Ok(self.history.lock().get(id).cloned().unwrap_or_default())
    }

    fn capabilities(&self) -> TrunkCapabilities {
        let mut caps = TrunkCapabilities::volatile("probe");
        caps.supports_history = self.with_history;
        caps
    }
}
