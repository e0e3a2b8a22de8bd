use nrl_store::StoreError;
use nrl_types::Timestamp;

/// Errors produced by the round engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundError {
    #[error("stake for the round closing at {round} arrived after it was replaced (current round closes at {current})")]
    StaleRound { round: Timestamp, current: Timestamp },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl RoundError {
    /// Whether the caller may retry the same operation later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

pub type RoundResult<T> = Result<T, RoundError>;
