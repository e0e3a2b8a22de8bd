use nrl_store::RetryPolicy;
use serde::{Deserialize, Serialize};

use nrl_types::Coins;

/// Ledger parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Balance credited to a freshly opened account.
    pub starting_balance: Coins,
    /// Winning stake is paid back this many times.
    pub payout_multiplier: Coins,
    /// Optimistic retry bound for account mutations.
    pub retry: RetryPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starting_balance: 1000,
            payout_multiplier: 10,
            retry: RetryPolicy::default(),
        }
    }
}
