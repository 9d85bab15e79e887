//! In-memory index over cached values.
//!
//! The index maps keys to [`MemoryHandle`]s: weak references that stay
//! usable while the value is reachable and report empty once it has been
//! reclaimed. A bounded [`Retention`] set keeps recently used values alive;
//! everything else lives exactly as long as some caller holds it.
//!
//! Reclaimed handles are not removed eagerly. The retention set reports each
//! eviction on a channel and the [`Reaper`] prunes dead handles in the
//! background.
//!
//! ## Thread Safety
//!
//! The index is safe to share across threads without external locking.

pub mod reaper;
pub mod retention;

pub use reaper::{Pass, Reaper};
pub use retention::Retention;

use crossbeam::channel::{self, Receiver};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};

/// A value reference that does not keep the value alive.
#[derive(Debug)]
pub struct MemoryHandle<V> {
    value: Weak<V>,
}

impl<V> MemoryHandle<V> {
    /// Create a handle to `value`
    pub fn new(value: &Arc<V>) -> Self {
        Self { value: Arc::downgrade(value) }
    }

    /// The value, if it has not been reclaimed
    pub fn get(&self) -> Option<Arc<V>> {
        self.value.upgrade()
    }

    /// Whether the value has been reclaimed
    pub fn is_reclaimed(&self) -> bool {
        self.value.strong_count() == 0
    }
}

/// Concurrent map from key to memory handle.
pub struct MemoryIndex<K, V> {
    handles: RwLock<HashMap<K, MemoryHandle<V>>>,
    retention: Retention<K, V>,
}

impl<K: Eq + Hash + Clone, V> MemoryIndex<K, V> {
    /// Create an index retaining up to `capacity` values.
    ///
    /// Returns the index and the receiving end of its reclamation queue.
    pub fn new(capacity: usize) -> (Self, Receiver<K>) {
        let (tx, rx) = channel::unbounded();
        let index = Self { handles: RwLock::new(HashMap::new()), retention: Retention::new(capacity, tx) };
        (index, rx)
    }

    /// Look up a live value and mark it recently used.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let value = self.handles.read().get(key)?.get()?;
        self.retention.retain(key.clone(), Arc::clone(&value));
        Some(value)
    }

    /// Index `value` under `key`, replacing any previous handle.
    pub fn insert(&self, key: K, value: Arc<V>) {
        self.handles.write().insert(key.clone(), MemoryHandle::new(&value));
        self.retention.retain(key, value);
    }

    /// Index `value` unless `key` already has a live value.
    ///
    /// Returns whichever value ends up indexed.
    pub fn get_or_insert(&self, key: K, value: Arc<V>) -> Arc<V> {
        let indexed = {
            let mut handles = self.handles.write();
            match handles.get(&key).and_then(MemoryHandle::get) {
                Some(live) => live,
                None => {
                    handles.insert(key.clone(), MemoryHandle::new(&value));
                    value
                }
            }
        };
        self.retention.retain(key, Arc::clone(&indexed));
        indexed
    }

    /// Drop `key` from the index, returning its value if still live.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let handle = self.handles.write().remove(key);
        let retained = self.retention.release(key);
        retained.or_else(|| handle.and_then(|h| h.get()))
    }

    /// Drop every key matching `doomed`, returning how many were dropped.
    pub fn remove_where(&self, doomed: impl Fn(&K) -> bool) -> usize {
        let keys: Vec<K> = {
            let mut handles = self.handles.write();
            let keys: Vec<K> = handles.keys().filter(|k| doomed(*k)).cloned().collect();
            for key in &keys {
                handles.remove(key);
            }
            keys
        };
        for key in &keys {
            self.retention.release(key);
        }
        keys.len()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.handles.write().clear();
        self.retention.clear();
    }

    /// Number of keys whose value is still live.
    pub fn len(&self) -> usize {
        self.handles.read().values().filter(|h| !h.is_reclaimed()).count()
    }

    /// Whether no key has a live value
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn handle_count(&self) -> usize {
        self.handles.read().len()
    }

    /// Remove every handle whose value has been reclaimed.
    ///
    /// Returns the number of handles removed.
    pub fn prune(&self) -> usize {
        let mut handles = self.handles.write();
        let before = handles.len();
        handles.retain(|_, handle| !handle.is_reclaimed());
        before - handles.len()
    }

    /// Values evicted from retention so far
    pub fn evictions(&self) -> u64 {
        self.retention.evictions()
    }
}
