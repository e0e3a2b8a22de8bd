use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("no round is open yet")]
    NoActiveRound,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot read config {path}: {reason}")]
    ConfigIo { path: String, reason: String },

    #[error("invalid input: {0}")]
    Types(#[from] nrl_types::TypeError),

    #[error("store error: {0}")]
    Store(#[from] nrl_store::StoreError),

    #[error("ledger error: {0}")]
    Ledger(#[from] nrl_ledger::LedgerError),

    #[error("round error: {0}")]
    Round(#[from] nrl_round::RoundError),

    #[error("payment error: {0}")]
    Payment(#[from] nrl_payments::PaymentError),

    #[error("subscription closed")]
    SubscriptionClosed,
}

impl SdkError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Ledger(e) => e.is_transient(),
            Self::Round(e) => e.is_transient(),
            Self::Payment(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
