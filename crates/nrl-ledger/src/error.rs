use nrl_store::StoreError;
use nrl_types::{AccountId, Coins, Timestamp, TypeError};

/// Errors produced by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds in {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        balance: Coins,
        requested: Coins,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("{account} already has a bet in the round closing at {round}")]
    DuplicateBet { account: AccountId, round: Timestamp },

    #[error("{account} has an unsettled bet from the round closing at {round}")]
    UnsettledBet { account: AccountId, round: Timestamp },

    #[error("betting closed for the round closing at {round}")]
    RoundClosed { round: Timestamp },

    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<TypeError> for LedgerError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidAmount(msg) => Self::InvalidAmount(msg),
            other => Self::Invalid(other.to_string()),
        }
    }
}

impl LedgerError {
    /// Whether the caller may retry the same operation later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
