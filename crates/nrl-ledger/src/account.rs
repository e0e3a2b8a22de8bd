use std::fmt;

use serde::{Deserialize, Serialize};

use nrl_types::{AccountId, Coins, Digit, Timestamp, Wager};

/// A wager recorded against one round.
///
/// The slip is the single source of truth for settlement. `debited` records
/// whether the stake has actually left the balance; a client that died
/// between writing the slip and debiting leaves it `false`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetSlip {
    /// `closes_at` of the round the bet was placed in.
    pub round: Timestamp,
    pub wager: Wager,
    pub placed_at: Timestamp,
    pub debited: bool,
}

impl BetSlip {
    pub fn total(&self) -> Coins {
        self.wager.total()
    }

    /// Gross payout if `winner` wins, before netting any undebited stake.
    pub fn payout(&self, winner: Digit, multiplier: Coins) -> Coins {
        self.wager.stake_on(winner).saturating_mul(multiplier)
    }
}

/// Which kind of payment request a pending flag tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PendingKind {
    Deposit,
    Withdrawal,
}

impl fmt::Display for PendingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit => write!(f, "Deposit"),
            Self::Withdrawal => write!(f, "Withdrawal"),
        }
    }
}

/// One user's ledger record, stored at `accounts/{id}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    pub balance: Coins,
    pub current_bet: Option<BetSlip>,
    pub pending_deposit: bool,
    pub pending_withdrawal: bool,
    pub created_at: Timestamp,
}

impl Account {
    pub fn new(id: AccountId, display_name: impl Into<String>, balance: Coins, now: Timestamp) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            balance,
            current_bet: None,
            pending_deposit: false,
            pending_withdrawal: false,
            created_at: now,
        }
    }

    pub fn pending_flag(&self, kind: PendingKind) -> bool {
        match kind {
            PendingKind::Deposit => self.pending_deposit,
            PendingKind::Withdrawal => self.pending_withdrawal,
        }
    }

    pub fn set_pending_flag(&mut self, kind: PendingKind, on: bool) {
        match kind {
            PendingKind::Deposit => self.pending_deposit = on,
            PendingKind::Withdrawal => self.pending_withdrawal = on,
        }
    }

    /// Whether a bet for the given round is already recorded.
    pub fn has_bet_in(&self, round: Timestamp) -> bool {
        self.current_bet.as_ref().is_some_and(|s| s.round == round)
    }
}
