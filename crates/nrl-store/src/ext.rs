use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{CasOutcome, Expected, KvStore, Versioned};

/// Bound on optimistic retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total compare-and-swap attempts, including the first.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// A single attempt; a conflict surfaces immediately.
    pub fn once() -> Self {
        Self::new(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 8 }
    }
}

/// What a transaction body wants done with the key.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation<T> {
    /// Store this value.
    Set(T),
    /// Remove the key.
    Delete,
    /// Leave the key untouched and stop.
    Abort,
}

/// Result of [`KvStoreExt::transact`].
#[derive(Clone, Debug, PartialEq)]
pub enum TxnOutcome<T> {
    /// The body's mutation was applied to exactly the value it was shown.
    Committed {
        /// Value the body saw.
        previous: Option<T>,
        /// Value now stored (`None` after a delete).
        value: Option<T>,
        attempts: u32,
    },
    /// The body chose [`Mutation::Abort`] for the value it was shown.
    Aborted { current: Option<T>, attempts: u32 },
}

impl<T> TxnOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Committed { attempts, .. } | Self::Aborted { attempts, .. } => *attempts,
        }
    }
}

/// Typed helpers over any [`KvStore`].
pub trait KvStoreExt: KvStore {
    /// Read and decode a record.
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        self.read(key)?
            .map(|v| decode(key, &v))
            .transpose()
    }

    /// Encode and unconditionally write a record.
    fn put_as<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<u64> {
        let json = serde_json::to_value(value).map_err(|e| StoreError::serialization(key, e))?;
        self.write(key, json)
    }

    /// Read and decode every record under a prefix.
    fn list_as<T: DeserializeOwned>(&self, prefix: &str) -> StoreResult<Vec<(String, T)>> {
        self.list(prefix)?
            .into_iter()
            .map(|(k, v)| decode(&k, &v).map(|t| (k, t)))
            .collect()
    }

    /// Optimistic read-modify-write on one key.
    ///
    /// `body` is called with the freshly decoded current value and decides
    /// the mutation. On a lost race the body is called again with the value
    /// that won, so it must be free of side effects other than recording
    /// what it saw. After `policy.max_attempts` conflicts the transaction
    /// fails with [`StoreError::ConflictRetryExhausted`].
    fn transact<T, F>(&self, key: &str, policy: RetryPolicy, mut body: F) -> StoreResult<TxnOutcome<T>>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnMut(Option<T>) -> Mutation<T>,
    {
        let mut current = self.read(key)?;
        let mut attempts = 0;
        while attempts < policy.max_attempts {
            attempts += 1;
            let previous: Option<T> = current.as_ref().map(|v| decode(key, v)).transpose()?;
            let expected = Expected::from_read(current.as_ref());

            let (new_json, new_value) = match body(previous.clone()) {
                Mutation::Abort => {
                    return Ok(TxnOutcome::Aborted {
                        current: previous,
                        attempts,
                    })
                }
                Mutation::Delete => {
                    if current.is_none() {
                        return Ok(TxnOutcome::Committed {
                            previous,
                            value: None,
                            attempts,
                        });
                    }
                    (None, None)
                }
                Mutation::Set(value) => {
                    let json = serde_json::to_value(&value)
                        .map_err(|e| StoreError::serialization(key, e))?;
                    (Some(json), Some(value))
                }
            };

            match self.compare_and_swap(key, expected, new_json)? {
                CasOutcome::Committed { .. } => {
                    return Ok(TxnOutcome::Committed {
                        previous,
                        value: new_value,
                        attempts,
                    })
                }
                CasOutcome::Conflict { current: latest } => {
                    debug!(key, attempt = attempts, "transaction lost a race, retrying");
                    current = latest;
                }
            }
        }
        Err(StoreError::ConflictRetryExhausted {
            key: key.to_string(),
            attempts,
        })
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

fn decode<T: DeserializeOwned>(key: &str, v: &Versioned) -> StoreResult<T> {
    serde_json::from_value(v.value.clone()).map_err(|e| StoreError::serialization(key, e))
}
