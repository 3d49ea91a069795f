// Subscriber reference counts
//
// One counter per subscriber key tracks how many pipelines are currently
// open against a memoized request. The entry is evicted when the count
// drops to zero, which is the signal to tear the request down; the map is
// therefore empty exactly when no subscriber is live.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;

/// Map of subscriber key to open-pipeline count.
pub struct SubscriberCounters<K: Eq + Hash + Clone> {
    counts: Mutex<HashMap<K, usize>>,
}

impl<K: Eq + Hash + Clone> SubscriberCounters<K> {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Increment the counter for `key`, creating it at one. Returns the
    /// new count.
    pub fn increment(&self, key: &K) -> usize {
        let mut counts = self.counts.lock();
        let count = counts.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement the counter for `key`, evicting the entry at zero.
    /// Returns the remaining count.
    pub fn decrement(&self, key: &K) -> usize {
        let mut counts = self.counts.lock();
        match counts.get_mut(key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                counts.remove(key);
                0
            }
            None => 0,
        }
    }

    /// Current count for `key` (zero when absent).
    pub fn count(&self, key: &K) -> usize {
        self.counts.lock().get(key).copied().unwrap_or(0)
    }

    /// Number of keys with at least one open subscriber.
    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.lock().is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for SubscriberCounters<K> {
    fn default() -> Self {
        Self::new()
    }
}
