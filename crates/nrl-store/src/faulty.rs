//! Fault-injecting store wrapper for crash and race tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::traits::{CasOutcome, Expected, KvStore, Versioned};
use crate::watch::WatchStream;

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Faults {
    /// prefix → remaining mutations allowed before the prefix goes dark.
    outages: Vec<(String, u32)>,
    /// key → number of upcoming CAS attempts to answer with a conflict.
    conflicts: HashMap<String, u32>,
    /// prefix → callback to run once before the next mutation there.
    hooks: Vec<(String, Hook)>,
    /// prefix → pause before every mutation there.
    delays: Vec<(String, Duration)>,
}

/// Wraps a store and makes selected mutations fail or stall.
///
/// Reads always pass through. Used to simulate a client dying between the
/// steps of a multi-step operation, a key so contended that retries run
/// out, or another client slipping in between a read and its write.
pub struct FaultyStore<S> {
    inner: S,
    faults: Mutex<Faults>,
}

impl<S: KvStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// After `allowed` more successful mutations under `prefix`, every
    /// further mutation there fails with [`StoreError::Unavailable`].
    pub fn fail_writes_after(&self, prefix: impl Into<String>, allowed: u32) {
        self.lock().outages.push((prefix.into(), allowed));
    }

    /// Answer the next `count` compare-and-swaps on `key` with a conflict.
    pub fn inject_conflicts(&self, key: impl Into<String>, count: u32) {
        self.lock().conflicts.insert(key.into(), count);
    }

    /// Run `hook` once, right before the next mutation under `prefix`
    /// reaches the inner store. The hook may use this store itself.
    pub fn before_next_write(&self, prefix: impl Into<String>, hook: impl FnOnce() + Send + 'static) {
        self.lock().hooks.push((prefix.into(), Box::new(hook)));
    }

    /// Sleep for `delay` before every mutation under `prefix`.
    pub fn slow_writes(&self, prefix: impl Into<String>, delay: Duration) {
        self.lock().delays.push((prefix.into(), delay));
    }

    /// Clear every injected fault.
    pub fn heal(&self) {
        *self.lock() = Faults::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run the pending hook and delay for `key`, outside the fault lock.
    fn interleave(&self, key: &str) {
        let (hook, delay) = {
            let mut faults = self.lock();
            let pending = faults
                .hooks
                .iter()
                .position(|(prefix, _)| key.starts_with(prefix.as_str()));
            let hook = pending.map(|i| faults.hooks.remove(i).1);
            let delay = faults
                .delays
                .iter()
                .find(|(prefix, _)| key.starts_with(prefix.as_str()))
                .map(|(_, d)| *d);
            (hook, delay)
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(hook) = hook {
            hook();
        }
    }

    fn check_mutation(&self, key: &str) -> StoreResult<()> {
        let mut faults = self.lock();
        for (prefix, remaining) in faults.outages.iter_mut() {
            if key.starts_with(prefix.as_str()) {
                if *remaining == 0 {
                    return Err(StoreError::Unavailable(format!("injected outage on {key}")));
                }
                *remaining -= 1;
            }
        }
        Ok(())
    }

    fn take_conflict(&self, key: &str) -> bool {
        let mut faults = self.lock();
        match faults.conflicts.get_mut(key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

impl<S: KvStore> KvStore for FaultyStore<S> {
    fn read(&self, key: &str) -> StoreResult<Option<Versioned>> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, value: Value) -> StoreResult<u64> {
        self.interleave(key);
        self.check_mutation(key)?;
        self.inner.write(key, value)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.interleave(key);
        self.check_mutation(key)?;
        self.inner.delete(key)
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<(String, Versioned)>> {
        self.inner.list(prefix)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Expected,
        new: Option<Value>,
    ) -> StoreResult<CasOutcome> {
        self.interleave(key);
        if self.take_conflict(key) {
            return Ok(CasOutcome::Conflict {
                current: self.inner.read(key)?,
            });
        }
        self.check_mutation(key)?;
        self.inner.compare_and_swap(key, expected, new)
    }

    fn watch(&self, prefix: &str) -> WatchStream {
        self.inner.watch(prefix)
    }
}
