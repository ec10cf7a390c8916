//! The tree: a typed collection of nuts over one trunk, with an in-memory
//! cache, reactive subscriptions, secondary indexes, conflict resolution,
//! and leaf-based replication to entangled peers.

mod events;
mod strategy;

pub use events::{SubscriptionId, TreeEvent};
pub use strategy::{CacheStrategy, KeepAll, LruEviction};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AcornError, AcornResult};
use crate::index::{IndexKey, IndexSet, IndexStatistics, TreeIndex};
use crate::judge::{Judge, TimestampJudge, Verdict};
use crate::leaf::{Branch, Leaf, LeafDedupCache, LeafKind, TreeId, MAX_HOPS};
use crate::nut::{Nut, Stem};
use crate::trunk::Trunk;

/// How `squabble` picks a winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquabbleDirection {
    PreferLocal,
    PreferRemote,
    UseJudge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquabbleOutcome {
    /// The id was unknown locally; the incoming nut was adopted.
    Adopted,
    KeptExisting,
    ReplacedWithIncoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStatsSnapshot {
    pub stashes: u64,
    pub cracks: u64,
    pub tosses: u64,
    pub squabbles: u64,
    pub leaves_accepted: u64,
    pub leaves_dropped: u64,
}

#[derive(Default)]
struct TreeStats {
    stashes: AtomicU64,
    cracks: AtomicU64,
    tosses: AtomicU64,
    squabbles: AtomicU64,
    leaves_accepted: AtomicU64,
    leaves_dropped: AtomicU64,
}

impl TreeStats {
    fn snapshot(&self) -> TreeStatsSnapshot {
        TreeStatsSnapshot {
            stashes: self.stashes.load(Ordering::Relaxed),
            cracks: self.cracks.load(Ordering::Relaxed),
            tosses: self.tosses.load(Ordering::Relaxed),
            squabbles: self.squabbles.load(Ordering::Relaxed),
            leaves_accepted: self.leaves_accepted.load(Ordering::Relaxed),
            leaves_dropped: self.leaves_dropped.load(Ordering::Relaxed),
        }
    }
}

type Subscriber<T> = Arc<dyn Fn(&TreeEvent<T>) + Send + Sync>;

struct CacheState<T> {
    map: HashMap<String, Nut<T>>,
    strategy: Box<dyn CacheStrategy>,
}

impl<T> CacheState<T> {
    fn insert(&mut self, nut: Nut<T>) {
        let id = nut.id.clone();
        self.map.insert(id.clone(), nut);
        self.strategy.on_insert(&id);
        while let Some(victim) = self.strategy.evict_candidate(self.map.len()) {
            self.map.remove(&victim);
        }
    }

    fn remove(&mut self, id: &str) {
        self.map.remove(id);
        self.strategy.on_remove(id);
    }
}

struct TreeInner<T> {
    tree_id: TreeId,
    node_id: String,
    trunk: Arc<dyn Trunk<T>>,
    cache: Mutex<CacheState<T>>,
    // Separate from the cache lock; always taken after it, never before.
    indexes: Mutex<IndexSet<T>>,
    judge: RwLock<Arc<dyn Judge<T>>>,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber<T>)>>,
    next_subscription: AtomicU64,
    branches: RwLock<Vec<Arc<dyn Branch<T>>>>,
    dedup: Mutex<LeafDedupCache>,
    leaf_seq: AtomicU64,
    last_sync: Mutex<Option<OffsetDateTime>>,
    stats: TreeStats,
    disposed: AtomicBool,
}

/// Cloneable handle to one tree; clones share all state.
pub struct Tree<T> {
    inner: Arc<TreeInner<T>>,
}

impl<T> Clone for Tree<T> {
    fn clone(&self) -> Self {
        Tree {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Tree<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(trunk: Arc<dyn Trunk<T>>) -> Self {
        Tree::with_node_id(trunk, format!("node-{}", Uuid::new_v4()))
    }

    pub fn with_node_id(trunk: Arc<dyn Trunk<T>>, node_id: impl Into<String>) -> Self {
        Tree {
            inner: Arc::new(TreeInner {
                tree_id: Uuid::new_v4(),
                node_id: node_id.into(),
                trunk,
                cache: Mutex::new(CacheState {
                    map: HashMap::new(),
                    strategy: Box::new(KeepAll),
                }),
                indexes: Mutex::new(IndexSet::new()),
                judge: RwLock::new(Arc::new(TimestampJudge)),
                subscribers: RwLock::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
                branches: RwLock::new(Vec::new()),
                dedup: Mutex::new(LeafDedupCache::default()),
                leaf_seq: AtomicU64::new(0),
                last_sync: Mutex::new(None),
                stats: TreeStats::default(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn tree_id(&self) -> TreeId {
        self.inner.tree_id
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn trunk(&self) -> &Arc<dyn Trunk<T>> {
        &self.inner.trunk
    }

    pub fn stats(&self) -> TreeStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn set_judge(&self, judge: Arc<dyn Judge<T>>) {
        *self.inner.judge.write() = judge;
    }

    pub fn set_cache_strategy(&self, strategy: Box<dyn CacheStrategy>) {
        self.inner.cache.lock().strategy = strategy;
    }

    // ---- write path -----------------------------------------------------

    /// Stashes a payload that knows its own id.
    pub fn stash(&self, item: T) -> AcornResult<Nut<T>>
    where
        T: Stem,
    {
        let id = item.stem_id();
        if id.is_empty() {
            return Err(AcornError::IdUndetectable(
                "payload produced an empty stem id".into(),
            ));
        }
        self.stash_with_id(&id, item)
    }

    pub fn stash_with_id(&self, id: &str, item: T) -> AcornResult<Nut<T>> {
        self.stash_prepared(id, item, None)
    }

    pub fn stash_with_expiry(
        &self,
        id: &str,
        item: T,
        expires_at: OffsetDateTime,
    ) -> AcornResult<Nut<T>> {
        self.stash_prepared(id, item, Some(expires_at))
    }

    fn stash_prepared(
        &self,
        id: &str,
        item: T,
        expires_at: Option<OffsetDateTime>,
    ) -> AcornResult<Nut<T>> {
        if id.is_empty() {
            return Err(AcornError::IdInvalid("empty id".into()));
        }
        let mut cache = self.inner.cache.lock();
        let previous = self.lookup_current(&mut cache, id)?;
        let nut = Nut {
            id: id.to_string(),
            payload: item,
            timestamp: OffsetDateTime::now_utc(),
            version: previous.as_ref().map(|p| p.version + 1).unwrap_or(1),
            expires_at,
            change_id: Uuid::new_v4(),
            origin_node_id: self.inner.node_id.clone(),
            hop_count: 0,
        };
        self.commit(&mut cache, nut.clone(), previous, CommitKind::Stash)?;
        drop(cache);

        self.inner.stats.stashes.fetch_add(1, Ordering::Relaxed);
        self.emit(TreeEvent::Stash { nut: nut.clone() });
        self.sprout(LeafKind::Stash, &nut.id, Some(nut.clone()));
        Ok(nut)
    }

    /// The current (non-expired) nut for an id, consulting cache then trunk.
    fn lookup_current(
        &self,
        cache: &mut CacheState<T>,
        id: &str,
    ) -> AcornResult<Option<Nut<T>>> {
        if let Some(nut) = cache.map.get(id) {
            if nut.is_expired() {
                cache.remove(id);
                return Ok(None);
            }
            return Ok(Some(nut.clone()));
        }
        match self.inner.trunk.crack(id) {
            Ok(found) => Ok(found.filter(|nut| !nut.is_expired())),
            Err(AcornError::Deserialization(message)) => {
                warn!(%id, %message, "undecodable document treated as absent");
                Ok(None)
            }
            Err(AcornError::MissingKey(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Shared tail of every write: unique indexes first (a violation
    /// prevents the write), then the trunk, then cache and the remaining
    /// indexes. Runs under the cache lock.
    fn commit(
        &self,
        cache: &mut CacheState<T>,
        nut: Nut<T>,
        previous: Option<Nut<T>>,
        kind: CommitKind,
    ) -> AcornResult<()> {
        let previous_payload = previous.as_ref().map(|p| &p.payload);
        self.inner
            .indexes
            .lock()
            .admit(&nut.id, previous_payload, &nut.payload)?;

        if let Err(err) = self.inner.trunk.stash(&nut.id, &nut) {
            self.inner
                .indexes
                .lock()
                .revert(&nut.id, previous_payload);
            return Err(err);
        }

        let id = nut.id.clone();
        let payload = nut.payload.clone();
        cache.insert(nut);
        self.inner.indexes.lock().update_non_unique(&id, &payload);
        debug!(%id, ?kind, "committed");
        Ok(())
    }

    // ---- read path ------------------------------------------------------

    pub fn crack(&self, id: &str) -> AcornResult<Option<Nut<T>>> {
        self.inner.stats.cracks.fetch_add(1, Ordering::Relaxed);
        let mut cache = self.inner.cache.lock();
        if let Some(nut) = cache.map.get(id) {
            if nut.is_expired() {
                cache.remove(id);
                return Ok(None);
            }
            let nut = nut.clone();
            cache.strategy.on_access(id);
            return Ok(Some(nut));
        }
        let loaded = self.lookup_current(&mut cache, id)?;
        if let Some(nut) = &loaded {
            cache.insert(nut.clone());
        }
        Ok(loaded)
    }

    /// Every current, non-expired nut.
    pub fn crack_all(&self) -> AcornResult<Vec<Nut<T>>> {
        Ok(self
            .inner
            .trunk
            .crack_all()?
            .into_iter()
            .filter(|nut| !nut.is_expired())
            .collect())
    }

    // ---- removal --------------------------------------------------------

    pub fn toss(&self, id: &str) -> AcornResult<()> {
        self.toss_inner(id, true)
    }

    /// Removal without replication, used when applying a received leaf.
    pub fn toss_local(&self, id: &str) -> AcornResult<()> {
        self.toss_inner(id, false)
    }

    fn toss_inner(&self, id: &str, propagate: bool) -> AcornResult<()> {
        {
            let mut cache = self.inner.cache.lock();
            cache.remove(id);
            self.inner.trunk.toss(id)?;
            self.inner.indexes.lock().remove_everywhere(id);
        }
        self.inner.stats.tosses.fetch_add(1, Ordering::Relaxed);
        self.emit(TreeEvent::Toss { id: id.to_string() });
        if propagate {
            self.sprout(LeafKind::Toss, id, None);
        }
        Ok(())
    }

    // ---- conflict resolution --------------------------------------------

    pub fn squabble(
        &self,
        id: &str,
        incoming: Nut<T>,
        direction: SquabbleDirection,
    ) -> AcornResult<SquabbleOutcome> {
        self.inner.stats.squabbles.fetch_add(1, Ordering::Relaxed);

        let mut cache = self.inner.cache.lock();
        let existing = self.lookup_current(&mut cache, id)?;
        let Some(existing) = existing else {
            self.commit(&mut cache, incoming.clone(), None, CommitKind::Squabble)?;
            drop(cache);
            self.emit(TreeEvent::Squabble { winner: incoming });
            return Ok(SquabbleOutcome::Adopted);
        };

        let take_incoming = match direction {
            SquabbleDirection::PreferLocal => false,
            SquabbleDirection::PreferRemote => true,
            SquabbleDirection::UseJudge => {
                let judge = Arc::clone(&self.inner.judge.read());
                judge.judge(&existing, &incoming) == Verdict::TakeIncoming
            }
        };
        if !take_incoming {
            return Ok(SquabbleOutcome::KeptExisting);
        }

        self.commit(
            &mut cache,
            incoming.clone(),
            Some(existing),
            CommitKind::Squabble,
        )?;
        drop(cache);
        self.emit(TreeEvent::Squabble { winner: incoming });
        Ok(SquabbleOutcome::ReplacedWithIncoming)
    }

    /// Restores the most recent historical version when the trunk keeps
    /// history; a quiet no-op when it does not.
    pub fn undo_squabble(&self, id: &str) -> AcornResult<Option<Nut<T>>> {
        let history = match self.inner.trunk.get_history(id) {
            Ok(history) => history,
            Err(AcornError::HistoryUnsupported { trunk_type }) => {
                debug!(%id, trunk_type, "undo requested on a history-less trunk");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let Some(restored) = history.last().cloned() else {
            return Ok(None);
        };

        let mut cache = self.inner.cache.lock();
        let current = self.lookup_current(&mut cache, id)?;
        self.commit(&mut cache, restored.clone(), current, CommitKind::Squabble)?;
        drop(cache);
        self.emit(TreeEvent::Squabble {
            winner: restored.clone(),
        });
        Ok(Some(restored))
    }

    // ---- change export --------------------------------------------------

    pub fn export_changes(&self) -> AcornResult<Vec<Nut<T>>> {
        self.crack_all()
    }

    pub fn export_changes_since(&self, since: OffsetDateTime) -> AcornResult<Vec<Nut<T>>> {
        Ok(self
            .crack_all()?
            .into_iter()
            .filter(|nut| nut.timestamp > since)
            .collect())
    }

    /// Changes since the last completed sync. The watermark only moves on
    /// `mark_sync_completed`, so a crash between export and delivery means
    /// re-sending, never losing.
    pub fn export_delta_changes(&self) -> AcornResult<Vec<Nut<T>>> {
        match *self.inner.last_sync.lock() {
            Some(watermark) => self.export_changes_since(watermark),
            None => self.export_changes(),
        }
    }

    pub fn mark_sync_completed(&self) {
        *self.inner.last_sync.lock() = Some(OffsetDateTime::now_utc());
    }

    // ---- subscriptions --------------------------------------------------

    pub fn subscribe(
        &self,
        callback: impl Fn(&TreeEvent<T>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .write()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    fn emit(&self, event: TreeEvent<T>) {
        let subscribers: Vec<Subscriber<T>> = self
            .inner
            .subscribers
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in subscribers {
            callback(&event);
        }
    }

    // ---- indexes --------------------------------------------------------

    /// Registers an index and builds it from the current documents.
    pub fn add_index(&self, mut index: Box<dyn TreeIndex<T>>) -> AcornResult<()> {
        let docs = self.crack_all()?;
        index.build(&docs)?;
        self.inner.indexes.lock().insert(index)
    }

    pub fn drop_index(&self, name: &str) -> bool {
        self.inner.indexes.lock().drop_index(name)
    }

    pub fn lookup_by_index(&self, name: &str, key: &IndexKey) -> AcornResult<Vec<String>> {
        let mut indexes = self.inner.indexes.lock();
        let index = indexes
            .get_mut(name)
            .ok_or_else(|| AcornError::MissingKey(format!("index {name}")))?;
        Ok(index.lookup(key))
    }

    pub fn range_by_index(
        &self,
        name: &str,
        low: &IndexKey,
        high: &IndexKey,
    ) -> AcornResult<Vec<String>> {
        let mut indexes = self.inner.indexes.lock();
        let index = indexes
            .get_mut(name)
            .ok_or_else(|| AcornError::MissingKey(format!("index {name}")))?;
        Ok(index.range(low, high))
    }

    pub fn index_statistics(&self, name: &str) -> Option<IndexStatistics> {
        self.inner.indexes.lock().statistics(name)
    }

    // ---- replication ----------------------------------------------------

    pub fn entangle(&self, branch: Arc<dyn Branch<T>>) {
        self.inner.branches.write().push(branch);
    }

    pub fn detangle(&self, branch_id: &str) -> bool {
        let mut branches = self.inner.branches.write();
        let before = branches.len();
        branches.retain(|branch| branch.branch_id() != branch_id);
        branches.len() != before
    }

    fn sprout(&self, kind: LeafKind, key: &str, data: Option<Nut<T>>) {
        let seq = self.inner.leaf_seq.fetch_add(1, Ordering::Relaxed);
        let leaf = Leaf::sprout(self.inner.tree_id, seq, kind, key, data);
        // Remember our own leaf so a late echo cannot re-apply it, and
        // count the local application.
        self.inner.dedup.lock().insert(leaf.leaf_id.clone());
        self.inner
            .stats
            .leaves_accepted
            .fetch_add(1, Ordering::Relaxed);
        self.fan_out(&leaf, None);
    }

    /// Never called with any tree lock held; branch delivery may reenter
    /// other trees.
    fn fan_out(&self, leaf: &Leaf<T>, skip_remote: Option<TreeId>) {
        let branches = self.inner.branches.read().clone();
        for branch in branches {
            if !branch.carries(leaf.kind) {
                continue;
            }
            if skip_remote.is_some() && branch.remote_tree_id() == skip_remote {
                continue;
            }
            if let Err(err) = branch.deliver(leaf) {
                warn!(
                    branch = branch.branch_id(),
                    leaf = %leaf.leaf_id,
                    %err,
                    "leaf delivery failed"
                );
            }
        }
    }

    /// Applies the anti-loop decision table, then the change, then
    /// re-propagates. Returns whether the leaf was accepted.
    pub fn receive_leaf(&self, mut leaf: Leaf<T>) -> AcornResult<bool> {
        let tree_id = self.inner.tree_id;
        let drop_reason = {
            let dedup = self.inner.dedup.lock();
            if dedup.contains(&leaf.leaf_id) {
                Some("duplicate")
            } else if leaf.origin_tree_id == tree_id {
                Some("loopback")
            } else if leaf.visited.contains(&tree_id) {
                Some("revisit")
            } else if leaf.hop_count > MAX_HOPS {
                Some("hop cap exceeded")
            } else {
                None
            }
        };
        if let Some(reason) = drop_reason {
            debug!(leaf = %leaf.leaf_id, reason, "leaf dropped");
            self.inner
                .stats
                .leaves_dropped
                .fetch_add(1, Ordering::Relaxed);
            return Ok(false);
        }

        match leaf.kind {
            LeafKind::Stash | LeafKind::Update | LeafKind::Squabble => {
                if let Some(nut) = leaf.data.clone() {
                    self.squabble(&leaf.key, nut, SquabbleDirection::UseJudge)?;
                }
            }
            LeafKind::Toss => {
                self.toss_inner(&leaf.key, false)?;
            }
        }

        self.inner.dedup.lock().insert(leaf.leaf_id.clone());
        self.inner
            .stats
            .leaves_accepted
            .fetch_add(1, Ordering::Relaxed);

        leaf.visited.insert(tree_id);
        leaf.hop_count += 1;
        self.fan_out(&leaf, Some(leaf.origin_tree_id));
        Ok(true)
    }

    // ---- lifecycle ------------------------------------------------------

    /// Idempotent: flushes pending trunk writes and releases the backend.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.inner.trunk.flush() {
            warn!(%err, "flush on dispose failed");
        }
        self.inner.trunk.dispose();
        self.inner.branches.write().clear();
    }
}

#[derive(Debug, Clone, Copy)]
enum CommitKind {
    Stash,
    Squabble,
}
