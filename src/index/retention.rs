//! Bounded LRU retention of cached values.
//!
//! The retention set owns the only strong references the cache keeps to its
//! values. When it grows past capacity it drops the least recently used
//! reference and reports the key on the notification channel. If no caller
//! still holds that value, its [`super::MemoryHandle`] is now empty and the
//! reaper can prune it.
//!
//! Recency is tracked with a stamped queue: every touch pushes a fresh
//! `(key, stamp)` pair and eviction skips pairs whose stamp is stale. The
//! queue is compacted once stale pairs dominate it, keeping touches O(1)
//! amortized.

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Slot<V> {
    value: Arc<V>,
    stamp: u64,
}

struct State<K, V> {
    slots: HashMap<K, Slot<V>>,
    /// LRU order, least recently used at the front
    queue: VecDeque<(K, u64)>,
    tick: u64,
}

/// Strongly retains up to `capacity` values in LRU order.
pub struct Retention<K, V> {
    capacity: usize,
    state: Mutex<State<K, V>>,
    notify: Sender<K>,
    evictions: AtomicU64,
}

impl<K: Eq + Hash + Clone, V> Retention<K, V> {
    /// Create a retention set reporting evicted keys to `notify`.
    pub fn new(capacity: usize, notify: Sender<K>) -> Self {
        Self {
            capacity,
            state: Mutex::new(State { slots: HashMap::new(), queue: VecDeque::new(), tick: 0 }),
            notify,
            evictions: AtomicU64::new(0),
        }
    }

    /// Retain `value` for `key` as most recently used, replacing any value
    /// retained before.
    pub fn retain(&self, key: K, value: Arc<V>) {
        let evicted = {
            let mut state = self.state.lock();
            state.tick += 1;
            let stamp = state.tick;
            state.queue.push_back((key.clone(), stamp));
            state.slots.insert(key, Slot { value, stamp });

            let mut evicted = Vec::new();
            while state.slots.len() > self.capacity {
                let Some((key, stamp)) = state.queue.pop_front() else {
                    break;
                };
                let current = state.slots.get(&key).is_some_and(|slot| slot.stamp == stamp);
                if current {
                    if let Some(slot) = state.slots.remove(&key) {
                        evicted.push((key, slot.value));
                    }
                }
            }

            if state.queue.len() > 2 * self.capacity + 16 {
                let State { slots, queue, .. } = &mut *state;
                queue.retain(|(key, stamp)| {
                    slots.get(key).is_some_and(|slot| slot.stamp == *stamp)
                });
            }
            evicted
        };

        // Values are released before the reaper is told about them.
        for (key, value) in evicted {
            drop(value);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            if self.notify.send(key).is_err() {
                log::debug!("Reclamation queue closed, eviction not reported");
            }
        }
    }

    /// Stop retaining `key`. Its pending queue entry goes stale.
    pub fn release(&self, key: &K) -> Option<Arc<V>> {
        self.state.lock().slots.remove(key).map(|slot| slot.value)
    }

    /// Whether `key` is currently retained
    #[cfg(test)]
    fn contains(&self, key: &K) -> bool {
        self.state.lock().slots.contains_key(key)
    }

    /// Drop every retained value
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.slots.clear();
        state.queue.clear();
    }

    /// Total values evicted for capacity
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
