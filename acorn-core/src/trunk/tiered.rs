use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::{Trunk, TrunkCapabilities};
use crate::error::AcornResult;
use crate::nut::Nut;

#[derive(Debug, Clone)]
pub struct TierOptions {
    /// Documents older than this migrate from hot to cold.
    pub hot_for: Duration,
    pub sweep_interval: Duration,
}

impl Default for TierOptions {
    fn default() -> Self {
        TierOptions {
            hot_for: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

type DemotionPredicate<T> = Arc<dyn Fn(&Nut<T>) -> bool + Send + Sync>;

struct TierShared<T> {
    hot: Arc<dyn Trunk<T>>,
    cold: Arc<dyn Trunk<T>>,
    options: TierOptions,
    predicate: Option<DemotionPredicate<T>>,
    stop: Mutex<bool>,
    stop_signal: Condvar,
}

impl<T: Clone + Send + Sync> TierShared<T> {
    fn should_demote(&self, nut: &Nut<T>, now: OffsetDateTime) -> bool {
        if let Some(predicate) = &self.predicate {
            return predicate(nut);
        }
        let age = now - nut.timestamp;
        age >= time::Duration::try_from(self.options.hot_for).unwrap_or(time::Duration::MAX)
    }

    fn sweep(&self) {
        let now = OffsetDateTime::now_utc();
        let aged: Vec<Nut<T>> = match self.hot.crack_all() {
            Ok(nuts) => nuts
                .into_iter()
                .filter(|nut| self.should_demote(nut, now))
                .collect(),
            Err(err) => {
                warn!(%err, "tier sweep could not enumerate the hot trunk");
                return;
            }
        };
        for nut in aged {
            if let Err(err) = self.cold.stash(&nut.id, &nut) {
                warn!(id = %nut.id, %err, "demotion to cold trunk failed");
                continue;
            }
            if let Err(err) = self.hot.toss(&nut.id) {
                warn!(id = %nut.id, %err, "removing demoted document from hot trunk failed");
            } else {
                debug!(id = %nut.id, "demoted to cold tier");
            }
        }
    }
}

/// Hot/cold composition. Fresh writes land hot; a background sweeper
/// migrates aged (or predicate-selected) documents to the cold trunk.
pub struct TieredTrunk<T> {
    shared: Arc<TierShared<T>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<T> TieredTrunk<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(hot: Arc<dyn Trunk<T>>, cold: Arc<dyn Trunk<T>>, options: TierOptions) -> Self {
        TieredTrunk::build(hot, cold, options, None)
    }

    pub fn with_predicate(
        hot: Arc<dyn Trunk<T>>,
        cold: Arc<dyn Trunk<T>>,
        options: TierOptions,
        predicate: impl Fn(&Nut<T>) -> bool + Send + Sync + 'static,
    ) -> Self {
        TieredTrunk::build(hot, cold, options, Some(Arc::new(predicate)))
    }

    fn build(
        hot: Arc<dyn Trunk<T>>,
        cold: Arc<dyn Trunk<T>>,
        options: TierOptions,
        predicate: Option<DemotionPredicate<T>>,
    ) -> Self {
        let interval = options.sweep_interval;
        let shared = Arc::new(TierShared {
            hot,
            cold,
            options,
            predicate,
            stop: Mutex::new(false),
            stop_signal: Condvar::new(),
        });

        let sweeper_shared = Arc::clone(&shared);
        let sweeper = std::thread::Builder::new()
            .name("acorn-tier-sweep".into())
            .spawn(move || loop {
                {
                    let mut stop = sweeper_shared.stop.lock();
                    if *stop {
                        break;
                    }
                    sweeper_shared.stop_signal.wait_for(&mut stop, interval);
                    if *stop {
                        break;
                    }
                }
                sweeper_shared.sweep();
            })
            .expect("spawning the tier sweeper");

        TieredTrunk {
            shared,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Runs one migration pass immediately.
    pub fn sweep_now(&self) {
        self.shared.sweep();
    }
}

impl<T> Trunk<T> for TieredTrunk<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn stash(&self, id: &str, nut: &Nut<T>) -> AcornResult<()> {
        self.shared.hot.stash(id, nut)
    }

    fn crack(&self, id: &str) -> AcornResult<Option<Nut<T>>> {
        if let Some(nut) = self.shared.hot.crack(id)? {
            return Ok(Some(nut));
        }
        self.shared.cold.crack(id)
    }

    fn toss(&self, id: &str) -> AcornResult<()> {
        self.shared.hot.toss(id)?;
        self.shared.cold.toss(id)
    }

    fn crack_all(&self) -> AcornResult<Vec<Nut<T>>> {
        // Hot entries shadow cold ones with the same id.
        let mut by_id: HashMap<String, Nut<T>> = HashMap::new();
        for nut in self.shared.cold.crack_all()? {
            by_id.insert(nut.id.clone(), nut);
        }
        for nut in self.shared.hot.crack_all()? {
            by_id.insert(nut.id.clone(), nut);
        }
        Ok(by_id.into_values().collect())
    }

    fn flush(&self) -> AcornResult<()> {
        self.shared.hot.flush()?;
        self.shared.cold.flush()
    }

    fn capabilities(&self) -> TrunkCapabilities {
        TrunkCapabilities {
            trunk_type: "tiered",
            ..self.shared.cold.capabilities()
        }
    }

    fn dispose(&self) {
        {
            let mut stop = self.shared.stop.lock();
            *stop = true;
            self.shared.stop_signal.notify_all();
        }
        if let Some(sweeper) = self.sweeper.lock().take() {
            let _ = sweeper.join();
        }
        self.shared.hot.dispose();
        self.shared.cold.dispose();
    }
}

impl<T> Drop for TieredTrunk<T> {
    fn drop(&mut self) {
        {
            let mut stop = self.shared.stop.lock();
            *stop = true;
            self.shared.stop_signal.notify_all();
        }
        if let Some(sweeper) = self.sweeper.lock().take() {
            let _ = sweeper.join();
        }
    }
}
