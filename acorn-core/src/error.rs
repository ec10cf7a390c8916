pub type AcornResult<T> = Result<T, AcornError>;

#[derive(Debug, thiserror::Error)]
pub enum AcornError {
    #[error("missing key: {0}")]
    MissingKey(String),
    #[error("no id could be detected for payload: {0}")]
    IdUndetectable(String),
    #[error("invalid id: {0}")]
    IdInvalid(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("deserialization failed: {0}")]
    Deserialization(String),
    #[error("history not supported by {trunk_type} trunk")]
    HistoryUnsupported { trunk_type: &'static str },
    #[error("unique constraint violated on index {index} for key {key}")]
    UniqueConstraintViolation { index: String, key: String },
    #[error("policy {policy} denied the operation: {reason}")]
    PolicyViolation { policy: String, reason: String },
    #[error("policy chain integrity failure at seal {index}: {reason}")]
    ChainIntegrity { index: usize, reason: String },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("trunk operation failed: {0}")]
    Trunk(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl AcornError {
    /// Whether a resilient wrapper is allowed to retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AcornError::Transient(_) | AcornError::Io(_) | AcornError::Trunk(_)
        )
    }
}
