//! Leaderless round engine for the Number Round Ledger (NRL).
//!
//! There is no coordinator. Every client polls the single round record and,
//! once it has expired, races to replace it with a compare-and-swap. The
//! store accepts exactly one replacement per boundary; only that winner
//! records the finished round in the history log and clears the tally.
//!
//! - [`Round`]: the active betting period at `round/current`
//! - [`select_winner`] / [`LeastStakedSelector`]: least-staked digit wins
//! - [`TallyStore`]: per-digit aggregate stakes, stamped with their round
//! - [`RoundEngine`]: `advance_if_expired`, the one state transition
//! - [`HistoryLog`]: numbered, bounded log of finished rounds and its stats

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod round;
pub mod selector;
pub mod tally;

pub use config::RoundConfig;
pub use engine::{Advance, RoundEngine};
pub use error::{RoundError, RoundResult};
pub use history::{HistoryEntry, HistoryFilter, HistoryLog, HistoryStats};
pub use round::{Round, RoundPhase};
pub use selector::{
    select_winner, select_winner_with, LeastStakedSelector, OutcomeSelector, SelectionRule, Tally,
};
pub use tally::{TallyCell, TallyStore};
