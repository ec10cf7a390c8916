//! The grove: a registry of heterogeneous trees addressed by payload type
//! and name, so applications can hold one handle over many collections.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::leaf::TreeId;
use crate::tree::{Tree, TreeStatsSnapshot};

/// Object-safe view of a planted tree; the grove dispatches on it without
/// knowing payload types.
pub trait GroveTree: Send + Sync {
    fn tree_id(&self) -> TreeId;
    fn payload_type(&self) -> &'static str;
    fn stats(&self) -> TreeStatsSnapshot;
    fn dispose(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<T> GroveTree for Tree<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn tree_id(&self) -> TreeId {
        Tree::tree_id(self)
    }

    fn payload_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn stats(&self) -> TreeStatsSnapshot {
        Tree::stats(self)
    }

    fn dispose(&self) {
        Tree::dispose(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
pub struct Grove {
    trees: RwLock<HashMap<(TypeId, String), Arc<dyn GroveTree>>>,
}

impl Grove {
    pub fn new() -> Self {
        Grove::default()
    }

    /// Registers a tree under a name; replaces any previous tree planted
    /// under the same (type, name) slot.
    pub fn plant<T>(&self, name: impl Into<String>, tree: Tree<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.trees
            .write()
            .insert((TypeId::of::<T>(), name.into()), Arc::new(tree));
    }

    pub fn tree<T>(&self, name: &str) -> Option<Tree<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let trees = self.trees.read();
        let handle = trees.get(&(TypeId::of::<T>(), name.to_string()))?;
        handle.as_any().downcast_ref::<Tree<T>>().cloned()
    }

    pub fn uproot<T>(&self, name: &str) -> bool
    where
        T: 'static,
    {
        self.trees
            .write()
            .remove(&(TypeId::of::<T>(), name.to_string()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.trees.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.read().is_empty()
    }

    /// Per-tree statistics, fanned out across every planted tree.
    pub fn stats(&self) -> Vec<(String, &'static str, TreeStatsSnapshot)> {
        self.trees
            .read()
            .iter()
            .map(|((_, name), tree)| (name.clone(), tree.payload_type(), tree.stats()))
            .collect()
    }

    pub fn dispose_all(&self) {
        for tree in self.trees.write().drain().map(|(_, tree)| tree) {
            tree.dispose();
        }
    }
}
