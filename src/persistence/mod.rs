//! Persistent key/value store
//!
//! Pipelines read their initial scratch state from a `StateStore` and
//! publish results back to it through OUTPUT steps. `Store` is the
//! in-memory implementation with per-key subscriptions.

use crate::core::value::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Contract between the engine and a persistent store
///
/// `set` and `set_many` notify subscribers, so implementations must
/// tolerate a subscriber writing back into the store.
pub trait StateStore: Send + Sync {
    /// Read one value
    fn get(&self, key: &str) -> Option<Value>;

    /// Read several values; absent keys are left out
    fn get_many(&self, keys: &[&str]) -> Map {
        keys.iter()
            .filter_map(|key| self.get(key).map(|v| (key.to_string(), v)))
            .collect()
    }

    /// Write one value and notify its subscribers
    fn set(&self, key: &str, value: Value);

    /// Write several values, notifying per key
    fn set_many(&self, values: Map) {
        for (key, value) in values {
            self.set(&key, value);
        }
    }

    /// Drop a key so later reads see it as undefined
    fn remove(&self, key: &str) -> Option<Value>;

    /// Shallow copy of everything held
    fn snapshot(&self) -> Map;
}

/// Handle returned by `Store::subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    keys: HashSet<String>,
    listener: Listener,
}

/// In-memory store with key subscriptions
pub struct Store {
    values: RwLock<HashMap<String, Value>>,
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl Store {
    pub fn new() -> Self {
        Self::with_values(Map::new())
    }

    /// Create a store pre-filled with `values`
    pub fn with_values(values: Map) -> Self {
        Self {
            values: RwLock::new(values),
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Call `listener` whenever one of `keys` is set
    pub fn subscribe<F>(&self, keys: &[&str], listener: F) -> SubscriptionId
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                keys: keys.iter().map(|k| k.to_string()).collect(),
                listener: Arc::new(listener),
            });
        id
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|sub| sub.id != id);
        subs.len() != before
    }

    pub fn len(&self) -> usize {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn listeners_for(&self, key: &str) -> Vec<Listener> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|sub| sub.keys.contains(key))
            .map(|sub| sub.listener.clone())
            .collect()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for Store {
    fn get(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());

        // Locks are released before listeners run so they may write back
        for listener in self.listeners_for(key) {
            listener(key, &value);
        }
    }

    fn remove(&self, key: &str) -> Option<Value> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    fn snapshot(&self) -> Map {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<_> = values.keys().collect();
        keys.sort();
        f.debug_struct("Store").field("keys", &keys).finish()
    }
}
