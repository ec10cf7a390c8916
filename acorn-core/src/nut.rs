use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AcornError, AcornResult};

/// A stored document envelope: the payload plus the metadata the engine
/// needs for versioning, expiry, and replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub struct Nut<T> {
    pub id: String,
    pub payload: T,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub version: u64,
    #[serde(
        with = "time::serde::rfc3339::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(default = "Uuid::new_v4")]
    pub change_id: Uuid,
    #[serde(default)]
    pub origin_node_id: String,
    #[serde(default)]
    pub hop_count: u32,
}

impl<T> Nut<T> {
    /// Builds a version-1 nut stamped with the current UTC time.
    pub fn new(id: impl Into<String>, payload: T) -> AcornResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(AcornError::IdInvalid("empty id".into()));
        }
        Ok(Nut {
            id,
            payload,
            timestamp: OffsetDateTime::now_utc(),
            version: 1,
            expires_at: None,
            change_id: Uuid::new_v4(),
            origin_node_id: String::new(),
            hop_count: 0,
        })
    }

    pub fn with_expiry(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    /// An expired nut must read as absent everywhere.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

/// Identity capability for payloads that carry their own key. Payloads that
/// do not implement it must be stashed with an explicit id.
pub trait Stem {
    fn stem_id(&self) -> String;
}
