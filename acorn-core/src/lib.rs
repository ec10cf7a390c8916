//! AcornDB core: the document model, the trunk abstraction and its byte
//! pipeline, conflict resolution and replication primitives, the policy
//! governance ledger, and secondary indexes. Backend crates plug in
//! through the [`trunk::Trunk`] trait.

pub mod codec;
pub mod error;
pub mod grove;
pub mod index;
pub mod judge;
pub mod leaf;
pub mod nut;
pub mod policy;
pub mod root;
pub mod tree;
pub mod trunk;

pub use codec::{JsonCodec, NutCodec};
pub use error::{AcornError, AcornResult};
pub use grove::{Grove, GroveTree};
pub use index::{IndexKey, IndexStatistics, MemoryIndex, TreeIndex};
pub use judge::{CustomJudge, Judge, TimestampJudge, Verdict, VersionJudge};
pub use leaf::{Branch, Leaf, LeafDedupCache, LeafId, LeafKind, TreeId, MAX_HOPS};
pub use nut::{Nut, Stem};
pub use tree::{
    CacheStrategy, KeepAll, LruEviction, SquabbleDirection, SquabbleOutcome, SubscriptionId,
    Tree, TreeEvent, TreeStatsSnapshot,
};
pub use trunk::{
    BatchBuffer, BatchOptions, BreakerState, CacheOptions, CachedTrunk, FarWritePolicy,
    NearFarTrunk, PendingWrite, ResilientTrunk, RetryOptions, ShellCodec, TierOptions,
    TieredTrunk, Trunk, TrunkCapabilities,
};
