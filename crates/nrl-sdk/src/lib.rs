//! High-level SDK for the Number Round Ledger (NRL).
//!
//! [`Nrl`] wires the round engine, the bet and balance ledger and the
//! payment queue over one shared store. [`Player`] is one client session:
//! it polls the round, advances it when expired and settles its own bet,
//! exactly as every independent client process does.

pub mod clock;
pub mod config;
pub mod error;
pub mod nrl;
pub mod player;
pub mod watch;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{SdkError, SdkResult};
pub use nrl::Nrl;
pub use player::{Player, Tick};
pub use watch::{Change, Subscription};

// Re-export key types
pub use nrl_ledger::{Account, BetReceipt, BetSlip, Reconciled, Settlement, TallyAudit};
pub use nrl_payments::{AdminCapability, Identity, PaymentKind, PaymentRequest, Resolution};
pub use nrl_round::{Advance, HistoryEntry, HistoryFilter, HistoryStats, Round, Tally};
pub use nrl_store::{InMemoryKvStore, KvStore};
pub use nrl_types::{AccountId, Coins, Digit, RequestId, Timestamp, Wager};
