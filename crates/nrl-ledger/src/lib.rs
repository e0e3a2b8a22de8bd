//! Balance and bet ledger for the Number Round Ledger (NRL).
//!
//! Each account is one record at `accounts/{id}` holding the balance, the
//! current bet slip and the pending-payment flags. Every mutation of that
//! record is a single optimistic transaction, so concurrent clients never
//! lose each other's updates; there is no cross-account atomicity.
//!
//! - [`BalanceLedger`]: open accounts, credit, debit, pending flags
//! - [`BetLedger`]: place a bet (slip → tally → debit), settle, void
//! - [`StakeRecorder`]: seam to the round engine's tally
//! - [`reconcile`]: repair interrupted bet placements and audit tallies

pub mod account;
pub mod balance;
pub mod bets;
pub mod config;
pub mod error;
pub mod reconcile;

pub use account::{Account, BetSlip, PendingKind};
pub use balance::BalanceLedger;
pub use bets::{BetLedger, BetReceipt, Settlement, StakeRecorder};
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use reconcile::{Reconciled, TallyAudit};
