//! Secondary indexes maintained by the tree: an implicit identity index
//! over the primary key plus any number of projected-value indexes.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::warn;

use crate::error::{AcornError, AcornResult};
use crate::nut::Nut;

/// A projected property value with a total order, so range queries and
/// min/max work across every supported scalar shape.
#[derive(Debug, Clone)]
pub enum IndexKey {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl IndexKey {
    fn rank(&self) -> u8 {
        match self {
            IndexKey::Bool(_) => 0,
            IndexKey::Int(_) => 1,
            IndexKey::Float(_) => 2,
            IndexKey::Str(_) => 3,
        }
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexKey::Bool(a), IndexKey::Bool(b)) => a.cmp(b),
            (IndexKey::Int(a), IndexKey::Int(b)) => a.cmp(b),
            (IndexKey::Float(a), IndexKey::Float(b)) => a.total_cmp(b),
            (IndexKey::Str(a), IndexKey::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<&str> for IndexKey {
    fn from(value: &str) -> Self {
        IndexKey::Str(value.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(value: String) -> Self {
        IndexKey::Str(value)
    }
}

impl From<i64> for IndexKey {
    fn from(value: i64) -> Self {
        IndexKey::Int(value)
    }
}

impl From<bool> for IndexKey {
    fn from(value: bool) -> Self {
        IndexKey::Bool(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexStatistics {
    pub entries: usize,
    pub distinct_keys: usize,
    pub lookups: usize,
}

/// The index surface the tree maintains on every stash and toss.
pub trait TreeIndex<T>: Send + Sync {
    fn name(&self) -> &str;
    fn unique(&self) -> bool;
    fn add(&mut self, id: &str, payload: &T) -> AcornResult<()>;
    fn remove(&mut self, id: &str);
    fn clear(&mut self);
    fn statistics(&self) -> IndexStatistics;

    fn build(&mut self, docs: &[Nut<T>]) -> AcornResult<()> {
        self.clear();
        for nut in docs {
            self.add(&nut.id, &nut.payload)?;
        }
        Ok(())
    }

    fn lookup(&mut self, key: &IndexKey) -> Vec<String>;

    /// Inclusive range scan in key order.
    fn range(&mut self, low: &IndexKey, high: &IndexKey) -> Vec<String> {
        let _ = (low, high);
        Vec::new()
    }

    fn min_key(&self) -> Option<IndexKey> {
        None
    }

    fn max_key(&self) -> Option<IndexKey> {
        None
    }
}

type Projector<T> = Arc<dyn Fn(&T) -> Option<IndexKey> + Send + Sync>;

/// In-memory scalar index: projected value to the set of ids carrying it.
pub struct MemoryIndex<T> {
    name: String,
    unique: bool,
    project: Projector<T>,
    forward: BTreeMap<IndexKey, BTreeSet<String>>,
    reverse: HashMap<String, IndexKey>,
    lookups: usize,
}

impl<T> MemoryIndex<T> {
    pub fn new(
        name: impl Into<String>,
        project: impl Fn(&T) -> Option<IndexKey> + Send + Sync + 'static,
    ) -> Self {
        MemoryIndex {
            name: name.into(),
            unique: false,
            project: Arc::new(project),
            forward: BTreeMap::new(),
            reverse: HashMap::new(),
            lookups: 0,
        }
    }

    pub fn unique(
        name: impl Into<String>,
        project: impl Fn(&T) -> Option<IndexKey> + Send + Sync + 'static,
    ) -> Self {
        let mut index = MemoryIndex::new(name, project);
        index.unique = true;
        index
    }

    fn detach(&mut self, id: &str) {
        if let Some(key) = self.reverse.remove(id) {
            if let Some(ids) = self.forward.get_mut(&key) {
                ids.remove(id);
                if ids.is_empty() {
                    self.forward.remove(&key);
                }
            }
        }
    }
}

impl<T> TreeIndex<T> for MemoryIndex<T>
where
    T: Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn unique(&self) -> bool {
        self.unique
    }

    fn add(&mut self, id: &str, payload: &T) -> AcornResult<()> {
        let Some(key) = (self.project)(payload) else {
            // Nothing projected: the document simply leaves the index.
            self.detach(id);
            return Ok(());
        };
        if self.unique {
            if let Some(ids) = self.forward.get(&key) {
                if ids.iter().any(|existing| existing != id) {
                    return Err(AcornError::UniqueConstraintViolation {
                        index: self.name.clone(),
                        key: id.to_string(),
                    });
                }
            }
        }
        self.detach(id);
        self.forward.entry(key.clone()).or_default().insert(id.to_string());
        self.reverse.insert(id.to_string(), key);
        Ok(())
    }

    fn remove(&mut self, id: &str) {
        self.detach(id);
    }

    fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    fn statistics(&self) -> IndexStatistics {
        IndexStatistics {
            entries: self.reverse.len(),
            distinct_keys: self.forward.len(),
            lookups: self.lookups,
        }
    }

    fn lookup(&mut self, key: &IndexKey) -> Vec<String> {
        self.lookups += 1;
        self.forward
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn range(&mut self, low: &IndexKey, high: &IndexKey) -> Vec<String> {
        self.lookups += 1;
        self.forward
            .range(low.clone()..=high.clone())
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    fn min_key(&self) -> Option<IndexKey> {
        self.forward.keys().next().cloned()
    }

    fn max_key(&self) -> Option<IndexKey> {
        self.forward.keys().next_back().cloned()
    }
}

/// The implicit primary-key index every tree registers at construction.
pub struct IdentityIndex {
    ids: BTreeSet<String>,
    lookups: usize,
}

pub const IDENTITY_INDEX_NAME: &str = "identity";

impl IdentityIndex {
    pub fn new() -> Self {
        IdentityIndex {
            ids: BTreeSet::new(),
            lookups: 0,
        }
    }
}

impl Default for IdentityIndex {
    fn default() -> Self {
        IdentityIndex::new()
    }
}

impl<T> TreeIndex<T> for IdentityIndex
where
    T: Send + Sync,
{
    fn name(&self) -> &str {
        IDENTITY_INDEX_NAME
    }

    fn unique(&self) -> bool {
        // Re-stashing an id is an update, never a violation.
        false
    }

    fn add(&mut self, id: &str, _payload: &T) -> AcornResult<()> {
        self.ids.insert(id.to_string());
        Ok(())
    }

    fn remove(&mut self, id: &str) {
        self.ids.remove(id);
    }

    fn clear(&mut self) {
        self.ids.clear();
    }

    fn statistics(&self) -> IndexStatistics {
        IndexStatistics {
            entries: self.ids.len(),
            distinct_keys: self.ids.len(),
            lookups: self.lookups,
        }
    }

    fn lookup(&mut self, key: &IndexKey) -> Vec<String> {
        self.lookups += 1;
        match key {
            IndexKey::Str(id) if self.ids.contains(id) => vec![id.clone()],
            _ => Vec::new(),
        }
    }

    fn min_key(&self) -> Option<IndexKey> {
        self.ids.iter().next().cloned().map(IndexKey::Str)
    }

    fn max_key(&self) -> Option<IndexKey> {
        self.ids.iter().next_back().cloned().map(IndexKey::Str)
    }
}

/// The per-tree index collection. Unique indexes are updated first so a
/// violation prevents the stash; non-unique maintenance is best-effort.
pub(crate) struct IndexSet<T> {
    indexes: Vec<Box<dyn TreeIndex<T>>>,
}

impl<T> IndexSet<T>
where
    T: Send + Sync,
{
    pub(crate) fn new() -> Self {
        IndexSet {
            indexes: vec![Box::new(IdentityIndex::new())],
        }
    }

    pub(crate) fn insert(&mut self, index: Box<dyn TreeIndex<T>>) -> AcornResult<()> {
        if self.indexes.iter().any(|i| i.name() == index.name()) {
            return Err(AcornError::Trunk(format!(
                "index {} is already registered",
                index.name()
            )));
        }
        self.indexes.push(index);
        Ok(())
    }

    pub(crate) fn drop_index(&mut self, name: &str) -> bool {
        if name == IDENTITY_INDEX_NAME {
            return false;
        }
        let before = self.indexes.len();
        self.indexes.retain(|i| i.name() != name);
        self.indexes.len() != before
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Box<dyn TreeIndex<T>>> {
        self.indexes.iter_mut().find(|i| i.name() == name)
    }

    pub(crate) fn statistics(&self, name: &str) -> Option<IndexStatistics> {
        self.indexes
            .iter()
            .find(|i| i.name() == name)
            .map(|i| i.statistics())
    }

    /// Applies the unique indexes for a stash. Any violation rolls back the
    /// updates already made and restores the previous payload's entries.
    pub(crate) fn admit(&mut self, id: &str, previous: Option<&T>, next: &T) -> AcornResult<()> {
        let unique_positions: Vec<usize> = self
            .indexes
            .iter()
            .enumerate()
            .filter(|(_, index)| index.unique())
            .map(|(i, _)| i)
            .collect();

        let mut applied: Vec<usize> = Vec::new();
        for &pos in &unique_positions {
            match self.indexes[pos].add(id, next) {
                Ok(()) => applied.push(pos),
                Err(err) => {
                    // A failed unique add leaves its own index untouched;
                    // unwind the ones already updated.
                    for &done in &applied {
                        let index = &mut self.indexes[done];
                        index.remove(id);
                        if let Some(previous) = previous {
                            let _ = index.add(id, previous);
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Undoes `admit` when the trunk write fails afterwards.
    pub(crate) fn revert(&mut self, id: &str, previous: Option<&T>) {
        for index in self.indexes.iter_mut().filter(|i| i.unique()) {
            index.remove(id);
            if let Some(previous) = previous {
                let _ = index.add(id, previous);
            }
        }
    }

    /// Best-effort maintenance of the non-unique indexes after commit.
    pub(crate) fn update_non_unique(&mut self, id: &str, next: &T) {
        for index in self.indexes.iter_mut().filter(|i| !i.unique()) {
            if let Err(err) = index.add(id, next) {
                warn!(index = index.name(), %id, %err, "index maintenance failed");
            }
        }
    }

    pub(crate) fn remove_everywhere(&mut self, id: &str) {
        for index in self.indexes.iter_mut() {
            index.remove(id);
        }
    }

    pub(crate) fn rebuild(&mut self, docs: &[Nut<T>]) -> AcornResult<()> {
        for index in self.indexes.iter_mut() {
            index.build(docs)?;
        }
        Ok(())
    }
}
