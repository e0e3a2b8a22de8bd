use std::sync::RwLock;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// A committed change to one key.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreEvent {
    pub key: String,
    /// The new value, or `None` if the key was deleted.
    pub value: Option<Value>,
    /// Store version of the change. Deletions get a version too.
    pub version: u64,
}

impl StoreEvent {
    pub fn is_delete(&self) -> bool {
        self.value.is_none()
    }
}

/// Which changes a subscriber wants.
#[derive(Clone, Debug, Default)]
pub struct WatchFilter {
    /// Only keys starting with this prefix are delivered. Empty matches all.
    pub prefix: String,
}

impl WatchFilter {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn matches(&self, event: &StoreEvent) -> bool {
        event.key.starts_with(&self.prefix)
    }
}

/// Receiving end of a subscription.
pub type WatchStream = broadcast::Receiver<StoreEvent>;

struct Subscriber {
    filter: WatchFilter,
    sender: broadcast::Sender<StoreEvent>,
}

/// Fan-out of committed changes to prefix subscribers.
///
/// Backends call [`publish`](WatchRouter::publish) after a change is
/// committed. Subscribers whose receivers were all dropped are pruned on the
/// next publish.
pub struct WatchRouter {
    subscribers: RwLock<Vec<Subscriber>>,
    capacity: usize,
}

impl WatchRouter {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber and return its receiver.
    pub fn subscribe(&self, filter: WatchFilter) -> WatchStream {
        let (tx, rx) = broadcast::channel(self.capacity);
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.push(Subscriber { filter, sender: tx });
        rx
    }

    /// Deliver a change to every matching subscriber.
    pub fn publish(&self, event: &StoreEvent) {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.retain(|sub| {
            if sub.filter.matches(event) {
                sub.sender.send(event.clone()).is_ok()
            } else {
                sub.sender.receiver_count() > 0
            }
        });
        trace!(key = %event.key, version = event.version, subscribers = subs.len(), "change published");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .map(|subs| subs.len())
            .unwrap_or_default()
    }
}

impl Default for WatchRouter {
    fn default() -> Self {
        Self::new(256)
    }
}
