//! Logical key layout of the shared store.
//!
//! ```text
//! accounts/{accountId}               Account record (balance, bet slip, flags)
//! round/current                      the single active Round record
//! round/tally/{digit}                per-digit aggregate stake, stamped with its round
//! history/{roundClosesAt}            one finished round, keyed by its deadline
//! meta/history-seq                   durable round-number counter
//! payments/deposits/{requestId}      pending deposit request
//! payments/withdrawals/{requestId}   pending withdrawal request
//! ```

use crate::digit::Digit;
use crate::identity::{AccountId, RequestId};
use crate::temporal::Timestamp;

pub const ACCOUNTS_PREFIX: &str = "accounts/";
pub const ROUND_CURRENT: &str = "round/current";
pub const TALLY_PREFIX: &str = "round/tally/";
pub const HISTORY_PREFIX: &str = "history/";
pub const HISTORY_SEQ: &str = "meta/history-seq";
pub const PAYMENTS_PREFIX: &str = "payments/";
pub const DEPOSITS_PREFIX: &str = "payments/deposits/";
pub const WITHDRAWALS_PREFIX: &str = "payments/withdrawals/";

pub fn account(id: &AccountId) -> String {
    format!("{ACCOUNTS_PREFIX}{id}")
}

pub fn tally(digit: Digit) -> String {
    format!("{TALLY_PREFIX}{digit}")
}

/// One row per finished round. The deadline is zero-padded so keys sort
/// in round order.
pub fn history_entry(round_closes_at: Timestamp) -> String {
    format!("{HISTORY_PREFIX}{:020}", round_closes_at.as_millis())
}

pub fn deposit(id: &RequestId) -> String {
    format!("{DEPOSITS_PREFIX}{id}")
}

pub fn withdrawal(id: &RequestId) -> String {
    format!("{WITHDRAWALS_PREFIX}{id}")
}

/// The last path segment of a key (`history/abc` → `abc`).
pub fn leaf(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let alice = AccountId::new("alice").unwrap();
        assert_eq!(account(&alice), "accounts/alice");
        assert_eq!(tally(Digit::ALL[3]), "round/tally/3");
        assert!(tally(Digit::ALL[0]).starts_with(TALLY_PREFIX));
        let rid = RequestId::new();
        assert_eq!(deposit(&rid), format!("payments/deposits/{rid}"));
        assert!(withdrawal(&rid).starts_with(PAYMENTS_PREFIX));
        assert_eq!(
            history_entry(Timestamp::from_millis(300_000)),
            "history/00000000000000300000"
        );
        assert!(history_entry(Timestamp::from_millis(9)) < history_entry(Timestamp::from_millis(10)));
    }

    #[test]
    fn round_current_is_not_under_tally_prefix() {
        assert!(!ROUND_CURRENT.starts_with(TALLY_PREFIX));
        assert!(!HISTORY_SEQ.starts_with(HISTORY_PREFIX));
    }

    #[test]
    fn leaf_segment() {
        assert_eq!(leaf("history/abc"), "abc");
        assert_eq!(leaf("plain"), "plain");
    }
}
