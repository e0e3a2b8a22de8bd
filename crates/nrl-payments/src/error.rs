use nrl_ledger::LedgerError;
use nrl_store::StoreError;
use nrl_types::{AccountId, Coins};

/// Errors produced by the payment request queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid {field}: {reason}")]
    InvalidReference { field: &'static str, reason: String },

    #[error("{account} is not allowed to administer payments")]
    CapabilityDenied { account: AccountId },

    #[error("withdrawal of {amount} by {account} was debited but not queued ({queue}) and the refund failed ({refund})")]
    RefundFailed {
        account: AccountId,
        amount: Coins,
        queue: StoreError,
        refund: LedgerError,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PaymentError {
    /// Whether the caller may retry the same operation later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_transient(),
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;
