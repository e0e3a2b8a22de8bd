use thiserror::Error;

/// Errors produced by type construction and parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid digit {0}: must be 0-9")]
    InvalidDigit(i64),

    #[error("invalid account id {id:?}: {reason}")]
    InvalidAccountId { id: String, reason: String },

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}
