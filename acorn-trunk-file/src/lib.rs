//! File-backed trunks: one shell file per document, and the append-log
//! document store with full history.

mod document_store;
mod file_trunk;

pub use document_store::{DocumentStoreTrunk, LogAction};
pub use file_trunk::FileTrunk;

use acorn_core::{AcornError, AcornResult};

/// Ids become file names and log keys; anything that could escape the
/// per-type directory is rejected outright.
pub(crate) fn validate_id(id: &str) -> AcornResult<()> {
    if id.is_empty() {
        return Err(AcornError::IdInvalid("empty id".into()));
    }
    if id.contains(['/', '\\', '\0']) || id == "." || id == ".." {
        return Err(AcornError::IdInvalid(format!(
            "id {id:?} cannot be used as a file name"
        )));
    }
    Ok(())
}
