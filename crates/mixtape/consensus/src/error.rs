use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for engine operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;

/// Errors surfaced by [`crate::SignatureConsensusEngine`].
///
/// Everything except [`ConsensusError::Storage`] is an expected outcome that
/// callers should present to the member as-is.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The track already has an active challenge.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The referenced track, member or challenge does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The member lacks administrator capability.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The challenge lapsed before the vote could be counted.
    #[error("challenge expired: {0}")]
    Expired(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// Storage was unavailable or returned an unexpected failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ConsensusError {
    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusError::Conflict(_) => "conflict",
            ConsensusError::NotFound(_) => "not_found",
            ConsensusError::Forbidden(_) => "forbidden",
            ConsensusError::Expired(_) => "expired",
            ConsensusError::Validation(_) => "validation",
            ConsensusError::Storage(_) => "internal",
        }
    }
}
