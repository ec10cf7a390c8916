use std::collections::{HashSet, VecDeque};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AcornResult;
use crate::nut::Nut;

/// Stable identity of a tree instance for the lifetime of its process.
pub type TreeId = Uuid;

/// A leaf is dropped outright once it has taken more than this many hops.
pub const MAX_HOPS: u32 = 10;

/// Default capacity of a tree's leaf deduplication cache.
pub const DEDUP_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeafId {
    pub origin: TreeId,
    pub seq: u64,
}

impl std::fmt::Display for LeafId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.origin, self.seq)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafKind {
    Stash,
    Toss,
    Squabble,
    Update,
}

/// One change in flight between trees. The visited set, hop count, and the
/// receiver-side dedup cache together guarantee propagation terminates on
/// arbitrary (cyclic) meshes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub struct Leaf<T> {
    pub leaf_id: LeafId,
    pub origin_tree_id: TreeId,
    pub kind: LeafKind,
    pub key: String,
    pub data: Option<Nut<T>>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub hop_count: u32,
    pub visited: HashSet<TreeId>,
}

impl<T> Leaf<T> {
    pub fn sprout(
        origin: TreeId,
        seq: u64,
        kind: LeafKind,
        key: impl Into<String>,
        data: Option<Nut<T>>,
    ) -> Self {
        Leaf {
            leaf_id: LeafId { origin, seq },
            origin_tree_id: origin,
            kind,
            key: key.into(),
            data,
            timestamp: OffsetDateTime::now_utc(),
            hop_count: 0,
            visited: HashSet::from([origin]),
        }
    }
}

/// A registered sync sink: a peer tree, a transport, or any listener that
/// consumes leaves. Delivery failures are isolated per branch.
pub trait Branch<T>: Send + Sync {
    fn branch_id(&self) -> &str;

    /// The peer tree on the other end, when known. Used to avoid echoing a
    /// leaf straight back at its origin.
    fn remote_tree_id(&self) -> Option<TreeId> {
        None
    }

    /// Capability filter; sinks only receive the kinds they declare.
    fn carries(&self, kind: LeafKind) -> bool {
        let _ = kind;
        true
    }

    fn deliver(&self, leaf: &Leaf<T>) -> AcornResult<()>;
}

/// Bounded set of recently seen leaf ids with FIFO eviction.
#[derive(Debug)]
pub struct LeafDedupCache {
    capacity: usize,
    seen: HashSet<LeafId>,
    order: VecDeque<LeafId>,
}

impl LeafDedupCache {
    pub fn new(capacity: usize) -> Self {
        LeafDedupCache {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&self, id: &LeafId) -> bool {
        self.seen.contains(id)
    }

    /// Records a leaf id, evicting the oldest entry when full. Returns
    /// false when the id was already present.
    pub fn insert(&mut self, id: LeafId) -> bool {
        if !self.seen.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        while self.seen.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for LeafDedupCache {
    fn default() -> Self {
        LeafDedupCache::new(DEDUP_CAPACITY)
    }
}
