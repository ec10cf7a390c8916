//! SQL-backed trunk over sqlx: one table per document type with upsert
//! semantics, batched transactional writes, and native JSON indexes.

mod dialect;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use dialect::SqlDialect;
#[cfg(feature = "sqlite")]
pub use sqlite::{NativeIndexSpec, RdbmsOptions, RdbmsTrunk};

use acorn_core::{AcornError, AcornResult};

/// Table and index names are spliced into DDL, so only identifier
/// characters are allowed through.
pub(crate) fn validate_identifier(name: &str) -> AcornResult<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(AcornError::IdInvalid(format!(
            "{name:?} is not a valid SQL identifier"
        )))
    }
}
