//! Shared key-value store interface for the Number Round Ledger.
//!
//! Every client process of the system coordinates exclusively through a
//! shared JSON key-value store. This crate defines that store's narrow
//! interface and the optimistic-concurrency machinery built on it.
//!
//! # The one primitive
//!
//! [`KvStore::compare_and_swap`] applies a new value (or a deletion) to a
//! key only if the key's version still matches what the caller read. It is
//! a single-shot attempt: it commits or reports a conflict, never blocks.
//!
//! # Transactions
//!
//! [`KvStoreExt::transact`] wraps the primitive in a read → compute →
//! compare-and-swap loop that retries on conflict up to a
//! [`RetryPolicy`] bound. Round advancement, tally increments and balance
//! mutations are all expressed this way.
//!
//! # Backends
//!
//! - [`InMemoryKvStore`]: `BTreeMap` behind a `RwLock`, for tests, the
//!   simulator and embedding.
//!
//! # Design Rules
//!
//! 1. Versions are store-wide and strictly increasing; a rewritten key never
//!    reuses an old version.
//! 2. Every committed change is published to matching watchers after the
//!    write lock is released.
//! 3. The store never interprets values.

pub mod error;
pub mod ext;
#[cfg(any(test, feature = "test-helpers"))]
pub mod faulty;
pub mod memory;
pub mod traits;
pub mod watch;

pub use error::{StoreError, StoreResult};
pub use ext::{KvStoreExt, Mutation, RetryPolicy, TxnOutcome};
#[cfg(any(test, feature = "test-helpers"))]
pub use faulty::FaultyStore;
pub use memory::InMemoryKvStore;
pub use traits::{CasOutcome, Expected, KvStore, Versioned};
pub use watch::{StoreEvent, WatchFilter, WatchStream};
