//! The root pipeline: ordered byte transforms applied between the codec and
//! the backend. Stashes run roots in ascending sequence, cracks in
//! descending sequence, and a chain with every root reversed restores the
//! original bytes.

mod compression;
mod encryption;
mod policy_enforcement;

pub use compression::{CompressionAlgorithm, CompressionOptions, CompressionRoot};
pub use encryption::{EncryptionOptions, EncryptionRoot};
pub use policy_enforcement::PolicyEnforcementRoot;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::AcornResult;
use crate::policy::ChainState;

pub const POLICY_ENFORCEMENT_SEQUENCE: i32 = 10;
pub const COMPRESSION_SEQUENCE: i32 = 100;
pub const ENCRYPTION_SEQUENCE: i32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

/// Travels alongside the bytes through the pipeline. The metadata map is
/// scratch space between roots and is never persisted.
#[derive(Debug, Clone)]
pub struct RootContext {
    pub operation: Operation,
    pub caller: Option<String>,
    pub document_id: String,
    pub transformation_signatures: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub chain_state: Option<ChainState>,
}

impl RootContext {
    pub fn write(document_id: impl Into<String>) -> Self {
        Self::with_operation(Operation::Write, document_id)
    }

    pub fn read(document_id: impl Into<String>) -> Self {
        Self::with_operation(Operation::Read, document_id)
    }

    fn with_operation(operation: Operation, document_id: impl Into<String>) -> Self {
        RootContext {
            operation,
            caller: None,
            document_id: document_id.into(),
            transformation_signatures: Vec::new(),
            metadata: HashMap::new(),
            chain_state: None,
        }
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }
}

/// A pure byte transform. Roots must not touch storage; everything they need
/// travels in the context.
pub trait Root: Send + Sync {
    fn name(&self) -> &str;
    fn sequence(&self) -> i32;
    fn on_stash(&self, bytes: Vec<u8>, ctx: &mut RootContext) -> AcornResult<Vec<u8>>;
    fn on_crack(&self, bytes: Vec<u8>, ctx: &mut RootContext) -> AcornResult<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootDescriptor {
    pub name: String,
    pub sequence: i32,
}

/// The ordered root collection owned by a trunk. Adding or removing a root
/// at runtime takes effect on the next operation.
#[derive(Default)]
pub struct RootPipeline {
    roots: RwLock<Vec<Arc<dyn Root>>>,
}

impl RootPipeline {
    pub fn new() -> Self {
        RootPipeline::default()
    }

    pub fn add(&self, root: Arc<dyn Root>) {
        let mut roots = self.roots.write();
        roots.push(root);
        roots.sort_by_key(|r| r.sequence());
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut roots = self.roots.write();
        let before = roots.len();
        roots.retain(|r| r.name() != name);
        roots.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.roots.read().is_empty()
    }

    pub fn descriptors(&self) -> Vec<RootDescriptor> {
        self.roots
            .read()
            .iter()
            .map(|r| RootDescriptor {
                name: r.name().to_string(),
                sequence: r.sequence(),
            })
            .collect()
    }

    /// Ascending pass used on the write path.
    pub fn stash(&self, bytes: Vec<u8>, ctx: &mut RootContext) -> AcornResult<Vec<u8>> {
        let roots = self.roots.read().clone();
        let mut bytes = bytes;
        for root in &roots {
            bytes = root.on_stash(bytes, ctx)?;
        }
        Ok(bytes)
    }

    /// Descending pass used on the read path.
    pub fn crack(&self, bytes: Vec<u8>, ctx: &mut RootContext) -> AcornResult<Vec<u8>> {
        let roots = self.roots.read().clone();
        let mut bytes = bytes;
        for root in roots.iter().rev() {
            bytes = root.on_crack(bytes, ctx)?;
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TagRoot {
        name: &'static str,
        sequence: i32,
    }

    impl Root for TagRoot {
        fn name(&self) -> &str {
            self.name
        }

        fn sequence(&self) -> i32 {
            self.sequence
        }

        fn on_stash(&self, mut bytes: Vec<u8>, ctx: &mut RootContext) -> AcornResult<Vec<u8>> {
            ctx.transformation_signatures.push(self.name.to_string());
            bytes.extend_from_slice(self.name.as_bytes());
            Ok(bytes)
        }

        fn on_crack(&self, mut bytes: Vec<u8>, _ctx: &mut RootContext) -> AcornResult<Vec<u8>> {
            bytes.truncate(bytes.len() - self.name.len());
            Ok(bytes)
        }
    }

    #[test]
    fn runs_ascending_on_stash_and_descending_on_crack() {
        let pipeline = RootPipeline::new();
        pipeline.add(Arc::new(TagRoot { name: "outer", sequence: 200 }));
        pipeline.add(Arc::new(TagRoot { name: "inner", sequence: 100 }));

        let mut ctx = RootContext::write("d1");
        let stashed = pipeline.stash(b"seed".to_vec(), &mut ctx).unwrap();
        assert_eq!(stashed, b"seedinnerouter".to_vec());
        assert_eq!(ctx.transformation_signatures, vec!["inner", "outer"]);

        let mut read_ctx = RootContext::read("d1");
        let cracked = pipeline.crack(stashed, &mut read_ctx).unwrap();
        assert_eq!(cracked, b"seed".to_vec());
    }

    #[test]
    fn removing_a_root_changes_the_next_chain() {
        let pipeline = RootPipeline::new();
        pipeline.add(Arc::new(TagRoot { name: "only", sequence: 100 }));
        assert!(pipeline.remove("only"));
        assert!(!pipeline.remove("only"));
        assert!(pipeline.is_empty());

        let mut ctx = RootContext::write("d1");
        let out = pipeline.stash(b"seed".to_vec(), &mut ctx).unwrap();
        assert_eq!(out, b"seed".to_vec());
    }
}
