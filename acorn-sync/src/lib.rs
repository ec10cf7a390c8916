//! Sync sinks and sessions: in-process entanglement between trees, delta
//! export sessions, and the serialized-leaf boundary a remote transport
//! plugs into. The transport itself (HTTP, websockets) lives outside the
//! engine core.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::instrument;

use acorn_core::{
    AcornResult, Branch, Leaf, LeafKind, SquabbleDirection, SquabbleOutcome, Tree, TreeId,
};

/// In-process branch: delivers leaves straight into a peer tree.
pub struct Entangler<T> {
    id: String,
    target: Tree<T>,
}

impl<T> Entangler<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn to(target: &Tree<T>) -> Arc<Self> {
        Arc::new(Entangler {
            id: format!("entangle:{}", target.tree_id()),
            target: target.clone(),
        })
    }

    /// Entangles two trees bidirectionally.
    pub fn between(a: &Tree<T>, b: &Tree<T>) {
        a.entangle(Entangler::to(b));
        b.entangle(Entangler::to(a));
    }

    /// Fully meshes every pair in the slice.
    pub fn mesh(trees: &[Tree<T>]) {
        for (i, a) in trees.iter().enumerate() {
            for b in trees.iter().skip(i + 1) {
                Entangler::between(a, b);
            }
        }
    }
}

impl<T> Branch<T> for Entangler<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn branch_id(&self) -> &str {
        &self.id
    }

    fn remote_tree_id(&self) -> Option<TreeId> {
        Some(self.target.tree_id())
    }

    fn deliver(&self, leaf: &Leaf<T>) -> AcornResult<()> {
        self.target.receive_leaf(leaf.clone()).map(|_| ())
    }
}

/// Where serialized leaves leave the process. Concrete transports are
/// external collaborators; tests and tools provide their own.
pub trait LeafTransport: Send + Sync {
    fn send(&self, leaf_json: &[u8]) -> AcornResult<()>;
}

/// Branch that serializes leaves and hands them to a transport, filtered by
/// the capability set the remote end declared.
pub struct TransportBranch<T> {
    id: String,
    remote_tree_id: Option<TreeId>,
    carries: Option<HashSet<LeafKind>>,
    transport: Arc<dyn LeafTransport>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> TransportBranch<T> {
    pub fn new(id: impl Into<String>, transport: Arc<dyn LeafTransport>) -> Self {
        TransportBranch {
            id: id.into(),
            remote_tree_id: None,
            carries: None,
            transport,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_remote_tree(mut self, remote: TreeId) -> Self {
        self.remote_tree_id = Some(remote);
        self
    }

    /// Restricts the branch to the declared leaf kinds.
    pub fn with_capabilities(mut self, kinds: impl IntoIterator<Item = LeafKind>) -> Self {
        self.carries = Some(kinds.into_iter().collect());
        self
    }
}

impl<T> Branch<T> for TransportBranch<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn branch_id(&self) -> &str {
        &self.id
    }

    fn remote_tree_id(&self) -> Option<TreeId> {
        self.remote_tree_id
    }

    fn carries(&self, kind: LeafKind) -> bool {
        self.carries.as_ref().map(|set| set.contains(&kind)).unwrap_or(true)
    }

    fn deliver(&self, leaf: &Leaf<T>) -> AcornResult<()> {
        let payload = serde_json::to_vec(leaf)
            .map_err(|e| acorn_core::AcornError::Serialization(e.to_string()))?;
        self.transport.send(&payload)
    }
}

/// Outcome counts for one delta push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub exported: usize,
    pub adopted: usize,
    pub replaced: usize,
    pub kept: usize,
}

/// Pushes the source tree's delta into the target, squabbling each change
/// through the target's judge. The source watermark advances only after
/// every change was offered.
#[instrument(skip(source, target), fields(source = %source.tree_id(), target = %target.tree_id()))]
pub fn push_delta<T>(source: &Tree<T>, target: &Tree<T>) -> AcornResult<SyncReport>
where
    T: Clone + Send + Sync + 'static,
{
    let changes = source.export_delta_changes()?;
    let mut report = SyncReport {
        exported: changes.len(),
        ..SyncReport::default()
    };
    for nut in changes {
        match target.squabble(&nut.id.clone(), nut, SquabbleDirection::UseJudge)? {
            SquabbleOutcome::Adopted => report.adopted += 1,
            SquabbleOutcome::ReplacedWithIncoming => report.replaced += 1,
            SquabbleOutcome::KeptExisting => report.kept += 1,
        }
    }
    source.mark_sync_completed();
    Ok(report)
}

/// Two-way delta reconciliation.
pub fn reconcile<T>(a: &Tree<T>, b: &Tree<T>) -> AcornResult<(SyncReport, SyncReport)>
where
    T: Clone + Send + Sync + 'static,
{
    let a_to_b = push_delta(a, b)?;
    let b_to_a = push_delta(b, a)?;
    Ok((a_to_b, b_to_a))
}
