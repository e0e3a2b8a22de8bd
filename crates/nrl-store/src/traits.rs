use serde_json::Value;

use crate::error::StoreResult;
use crate::watch::WatchStream;

/// A stored value together with the version that wrote it.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned {
    pub version: u64,
    pub value: Value,
}

/// What a conditional write expects to find at its key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expected {
    /// The key must not exist.
    Absent,
    /// The key must still hold the value written at this version.
    Version(u64),
}

impl Expected {
    /// The expectation matching a previous read.
    pub fn from_read(read: Option<&Versioned>) -> Self {
        match read {
            Some(v) => Self::Version(v.version),
            None => Self::Absent,
        }
    }

    /// Whether the expectation holds against the current entry.
    pub fn matches(&self, current: Option<&Versioned>) -> bool {
        match (self, current) {
            (Self::Absent, None) => true,
            (Self::Version(expected), Some(cur)) => *expected == cur.version,
            _ => false,
        }
    }
}

/// Result of a single conditional write attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum CasOutcome {
    /// The write was applied. `version` is `None` when the write was a
    /// deletion.
    Committed { version: Option<u64> },
    /// Another writer got there first. Carries what is stored now so the
    /// caller can retry without a second read.
    Conflict { current: Option<Versioned> },
}

impl CasOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// The shared key-value store every client coordinates through.
///
/// Implementations must be thread-safe (`Send + Sync`). Keys are
/// `/`-separated paths (see `nrl_types::keys`); values are JSON.
///
/// Only [`compare_and_swap`](KvStore::compare_and_swap) is conditional.
/// `write` and `delete` are last-writer-wins and must only be used on keys
/// that a single logical owner mutates, or where overwriting is the intent
/// (such as resetting the tally).
pub trait KvStore: Send + Sync {
    /// Read a key. Returns `Ok(None)` if it does not exist.
    fn read(&self, key: &str) -> StoreResult<Option<Versioned>>;

    /// Unconditionally set a key. Returns the new version.
    fn write(&self, key: &str, value: Value) -> StoreResult<u64>;

    /// Unconditionally remove a key. Returns `true` if it existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// All entries whose key starts with `prefix`, in key order.
    fn list(&self, prefix: &str) -> StoreResult<Vec<(String, Versioned)>>;

    /// Replace (or delete, when `new` is `None`) the value at `key` only if
    /// it still matches `expected`.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected,
        new: Option<Value>,
    ) -> StoreResult<CasOutcome>;

    /// Subscribe to committed changes under `prefix`.
    fn watch(&self, prefix: &str) -> WatchStream;
}

impl<S: KvStore + ?Sized> KvStore for std::sync::Arc<S> {
    fn read(&self, key: &str) -> StoreResult<Option<Versioned>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: Value) -> StoreResult<u64> {
        (**self).write(key, value)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        (**self).delete(key)
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<(String, Versioned)>> {
        (**self).list(prefix)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected,
        new: Option<Value>,
    ) -> StoreResult<CasOutcome> {
        (**self).compare_and_swap(key, expected, new)
    }

    fn watch(&self, prefix: &str) -> WatchStream {
        (**self).watch(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expected_matching() {
        let v = Versioned { version: 4, value: json!(1) };
        assert!(Expected::Absent.matches(None));
        assert!(!Expected::Absent.matches(Some(&v)));
        assert!(Expected::Version(4).matches(Some(&v)));
        assert!(!Expected::Version(3).matches(Some(&v)));
        assert!(!Expected::Version(4).matches(None));
    }

    #[test]
    fn expected_from_read() {
        let v = Versioned { version: 9, value: json!(null) };
        assert_eq!(Expected::from_read(Some(&v)), Expected::Version(9));
        assert_eq!(Expected::from_read(None), Expected::Absent);
    }
}
