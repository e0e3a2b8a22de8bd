//! Foundation types for the Number Round Ledger (NRL).
//!
//! This crate provides the identity, temporal, and value types shared by every
//! other NRL crate, plus the logical key layout of the shared store.
//!
//! # Key Types
//!
//! - [`AccountId`]: Stable account identifier supplied by the identity provider
//! - [`RequestId`] / [`EntryId`]: UUID v7 identifiers for payment requests and history rows
//! - [`Digit`]: A betting number, 0 through 9
//! - [`Coins`]: Non-negative coin amount
//! - [`Wager`]: A validated digit → stake distribution
//! - [`Timestamp`]: Wall-clock milliseconds since the UNIX epoch
//! - [`keys`]: Canonical store paths (`accounts/{id}`, `round/current`, ...)

pub mod digit;
pub mod error;
pub mod identity;
pub mod keys;
pub mod temporal;
pub mod wager;

pub use digit::{Coins, Digit};
pub use error::TypeError;
pub use identity::{AccountId, EntryId, RequestId};
pub use temporal::Timestamp;
pub use wager::Wager;
