//! Per-scope key registry.
//!
//! Uses DashMap for concurrent access with per-key sharding, so cache hits
//! never touch the pending-batch lock.

use crate::slot::LoadFuture;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;

/// Maps an incoming key to its canonical form.
///
/// Used when a key type's `Eq`/`Hash` is not the identity the data source
/// uses (for example case-insensitive emails).
pub type KeyNormalizer<K> = dyn Fn(&K) -> K + Send + Sync;

/// Registry of result slots for one scope.
///
/// A key maps to exactly one slot, pending or settled. Entries live until
/// removed or until the registry is dropped; there is no eviction policy.
pub struct KeyRegistry<K, V> {
    slots: DashMap<K, LoadFuture<V>>,
}

impl<K, V> KeyRegistry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        KeyRegistry {
            slots: DashMap::new(),
        }
    }

    /// Get the slot registered for `key`.
    pub fn get(&self, key: &K) -> Option<LoadFuture<V>> {
        self.slots.get(key).map(|entry| entry.value().clone())
    }

    /// Return the registered slot, or register the one produced by `make`.
    ///
    /// The boolean is `true` on a hit. `make` runs while the key's shard is
    /// held, so concurrent callers for the same key observe one slot.
    pub(crate) fn get_or_insert_with<F>(&self, key: K, make: F) -> (LoadFuture<V>, bool)
    where
        F: FnOnce(K) -> LoadFuture<V>,
    {
        match self.slots.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), true),
            Entry::Vacant(entry) => {
                let slot = make(entry.key().clone());
                entry.insert(slot.clone());
                (slot, false)
            }
        }
    }

    /// Register `slot` unless the key already has one. Returns whether it was
    /// inserted.
    pub fn insert_if_absent(&self, key: K, slot: LoadFuture<V>) -> bool {
        match self.slots.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(slot);
                true
            }
        }
    }

    /// Register `slot`, replacing any existing one.
    pub fn insert(&self, key: K, slot: LoadFuture<V>) -> Option<LoadFuture<V>> {
        self.slots.insert(key, slot)
    }

    /// Remove the slot for `key`. Returns whether one was present.
    pub fn remove(&self, key: &K) -> bool {
        self.slots.remove(key).is_some()
    }

    /// Remove the entry for `key` only if it still holds `slot`.
    pub(crate) fn remove_if_same(&self, key: &K, slot: &LoadFuture<V>) -> bool {
        self.slots
            .remove_if(key, |_, current| current.same_slot(slot))
            .is_some()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<K, V> Default for KeyRegistry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
