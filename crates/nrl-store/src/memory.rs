use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{CasOutcome, Expected, KvStore, Versioned};
use crate::watch::{StoreEvent, WatchFilter, WatchRouter, WatchStream};

#[derive(Default)]
struct StoreState {
    entries: BTreeMap<String, Versioned>,
    last_version: u64,
}

impl StoreState {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }
}

/// In-memory, `BTreeMap`-based implementation of [`KvStore`].
///
/// All entries live behind a single `RwLock`; a compare-and-swap holds the
/// write lock for the comparison and the swap, which is what makes it
/// atomic. Change notifications are published after the lock is released.
/// Data is lost when the store is dropped.
pub struct InMemoryKvStore {
    state: RwLock<StoreState>,
    router: WatchRouter,
}

impl InMemoryKvStore {
    /// Create an empty store with the default watch channel capacity.
    pub fn new() -> Self {
        Self::with_watch_capacity(256)
    }

    /// Create an empty store whose subscribers buffer up to `capacity`
    /// undelivered changes before lagging.
    pub fn with_watch_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            router: WatchRouter::new(capacity),
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or_default()
    }

    /// Returns `true` if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest version handed out so far.
    pub fn last_version(&self) -> u64 {
        self.state.read().map(|s| s.last_version).unwrap_or_default()
    }

    /// A copy of every entry, for debugging and the simulator's dump.
    pub fn snapshot(&self) -> StoreResult<BTreeMap<String, Value>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect())
    }

    fn check_key(key: &str) -> StoreResult<()> {
        if key.is_empty() || key.starts_with('/') || key.ends_with('/') || key.contains("//") {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for InMemoryKvStore {
    fn read(&self, key: &str) -> StoreResult<Option<Versioned>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: Value) -> StoreResult<u64> {
        Self::check_key(key)?;
        let version = {
            let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
            let version = state.next_version();
            state.entries.insert(
                key.to_string(),
                Versioned {
                    version,
                    value: value.clone(),
                },
            );
            version
        };
        self.router.publish(&StoreEvent {
            key: key.to_string(),
            value: Some(value),
            version,
        });
        Ok(version)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let version = {
            let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
            if state.entries.remove(key).is_none() {
                return Ok(false);
            }
            state.next_version()
        };
        self.router.publish(&StoreEvent {
            key: key.to_string(),
            value: None,
            version,
        });
        Ok(true)
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<(String, Versioned)>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected,
        new: Option<Value>,
    ) -> StoreResult<CasOutcome> {
        Self::check_key(key)?;
        let event = {
            let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
            let current = state.entries.get(key);
            if !expected.matches(current) {
                debug!(key, ?expected, "compare-and-swap conflict");
                return Ok(CasOutcome::Conflict {
                    current: current.cloned(),
                });
            }
            match new {
                Some(value) => {
                    let version = state.next_version();
                    state.entries.insert(
                        key.to_string(),
                        Versioned {
                            version,
                            value: value.clone(),
                        },
                    );
                    StoreEvent {
                        key: key.to_string(),
                        value: Some(value),
                        version,
                    }
                }
                None => {
                    if state.entries.remove(key).is_none() {
                        // Deleting an absent key under `Expected::Absent`.
                        return Ok(CasOutcome::Committed { version: None });
                    }
                    let version = state.next_version();
                    StoreEvent {
                        key: key.to_string(),
                        value: None,
                        version,
                    }
                }
            }
        };
        let version = event.value.as_ref().map(|_| event.version);
        self.router.publish(&event);
        Ok(CasOutcome::Committed { version })
    }

    fn watch(&self, prefix: &str) -> WatchStream {
        self.router.subscribe(WatchFilter::prefix(prefix))
    }
}

impl std::fmt::Debug for InMemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKvStore")
            .field("keys", &self.len())
            .field("last_version", &self.last_version())
            .finish()
    }
}
