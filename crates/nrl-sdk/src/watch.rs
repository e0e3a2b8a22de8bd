use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

use nrl_store::{StoreError, StoreEvent, WatchStream};

use crate::error::{SdkError, SdkResult};

/// A decoded change to one watched record.
#[derive(Clone, Debug, PartialEq)]
pub enum Change<T> {
    Updated { key: String, value: T },
    Removed { key: String },
}

impl<T> Change<T> {
    pub fn key(&self) -> &str {
        match self {
            Self::Updated { key, .. } | Self::Removed { key } => key,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Updated { value, .. } => Some(value),
            Self::Removed { .. } => None,
        }
    }
}

/// Typed stream of changes under a key prefix.
///
/// A subscriber that falls behind the store's buffer skips the changes it
/// missed and keeps going; callers that need the full state re-read it.
pub struct Subscription<T> {
    rx: WatchStream,
    exact_key: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Subscription<T> {
    pub(crate) fn prefix(rx: WatchStream) -> Self {
        Self {
            rx,
            exact_key: None,
            _marker: PhantomData,
        }
    }

    /// Only deliver changes to `key` itself, not to keys it prefixes.
    pub(crate) fn exact(rx: WatchStream, key: String) -> Self {
        Self {
            rx,
            exact_key: Some(key),
            _marker: PhantomData,
        }
    }

    /// Wait for the next change. `Ok(None)` once the store is gone.
    pub async fn next(&mut self) -> SdkResult<Option<Change<T>>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if let Some(change) = self.accept(event)? {
                        return Ok(Some(change));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, changes dropped");
                }
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }

    /// The next change if one is already buffered.
    pub fn try_next(&mut self) -> SdkResult<Option<Change<T>>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if let Some(change) = self.accept(event)? {
                        return Ok(Some(change));
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged, changes dropped");
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Closed) => return Err(SdkError::SubscriptionClosed),
            }
        }
    }

    fn accept(&self, event: StoreEvent) -> SdkResult<Option<Change<T>>> {
        if self.exact_key.as_deref().is_some_and(|k| k != event.key) {
            return Ok(None);
        }
        let StoreEvent { key, value, .. } = event;
        match value {
            None => Ok(Some(Change::Removed { key })),
            Some(json) => {
                let value = serde_json::from_value(json)
                    .map_err(|e| SdkError::Store(StoreError::serialization(&key, e)))?;
                Ok(Some(Change::Updated { key, value }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nrl_store::{InMemoryKvStore, KvStore, KvStoreExt};
    use nrl_types::keys;

    #[tokio::test]
    async fn delivers_decoded_updates_and_removals() {
        let store = InMemoryKvStore::new();
        let mut sub: Subscription<u32> = Subscription::prefix(store.watch("meta/"));
        store.put_as("meta/a", &7u32).unwrap();
        store.delete("meta/a").unwrap();

        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first, Change::Updated { key: "meta/a".into(), value: 7 });
        assert_eq!(first.value(), Some(&7));
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second, Change::Removed { key: "meta/a".into() });
        assert!(sub.try_next().unwrap().is_none());
    }

    #[test]
    fn exact_key_skips_siblings() {
        let store = InMemoryKvStore::new();
        let key = format!("{}al", keys::ACCOUNTS_PREFIX);
        let mut sub: Subscription<u32> = Subscription::exact(store.watch(&key), key.clone());
        store.put_as(&format!("{}alice", keys::ACCOUNTS_PREFIX), &1u32).unwrap();
        store.put_as(&key, &2u32).unwrap();
        let change = sub.try_next().unwrap().unwrap();
        assert_eq!(change.key(), key);
        assert_eq!(change.value(), Some(&2));
    }

    #[test]
    fn undecodable_value_is_an_error() {
        let store = InMemoryKvStore::new();
        let mut sub: Subscription<u32> = Subscription::prefix(store.watch("meta/"));
        store.put_as("meta/a", &"text").unwrap();
        assert!(matches!(sub.try_next(), Err(SdkError::Store(_))));
    }

    #[test]
    fn lagging_subscriber_resumes() {
        let store = InMemoryKvStore::with_watch_capacity(2);
        let mut sub: Subscription<u32> = Subscription::prefix(store.watch("meta/"));
        for i in 0..5u32 {
            store.put_as("meta/a", &i).unwrap();
        }
        let change = sub.try_next().unwrap().unwrap();
        assert_eq!(change.value(), Some(&3));
        assert_eq!(sub.try_next().unwrap().unwrap().value(), Some(&4));
    }

    #[test]
    fn dropped_store_closes_subscription() {
        let store = InMemoryKvStore::new();
        let mut sub: Subscription<u32> = Subscription::prefix(store.watch("meta/"));
        drop(store);
        assert!(matches!(sub.try_next(), Err(SdkError::SubscriptionClosed)));
    }
}
