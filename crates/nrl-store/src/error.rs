/// Errors from store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A stored value could not be decoded into the expected record type,
    /// or a record could not be encoded.
    #[error("serialization error at {key}: {reason}")]
    Serialization { key: String, reason: String },

    /// A conditional write kept losing races and the retry bound was hit.
    #[error("conflict on {key}: gave up after {attempts} attempts")]
    ConflictRetryExhausted { key: String, attempts: u32 },

    /// The backing store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The key is empty or malformed.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// An internal lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Whether retrying the whole operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConflictRetryExhausted { .. } | Self::Unavailable(_))
    }

    pub fn serialization(key: &str, err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
