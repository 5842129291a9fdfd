//! Pending batches of key requests.

use crate::error::{Error, Result};
use crate::slot::{LoadFuture, Settler};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

/// One distinct key's interest within a batch.
///
/// Duplicate loads of the key subscribe to `slot`; they never create a second
/// request.
pub(crate) struct Request<V> {
    settler: Settler<V>,
    slot: LoadFuture<V>,
}

impl<V> Request<V> {
    pub(crate) fn slot(&self) -> &LoadFuture<V> {
        &self.slot
    }

    pub(crate) fn settle(self, outcome: Result<V>) {
        self.settler.settle(outcome);
    }
}

/// Requests collected during one coalescing window.
///
/// Keys are kept in first-seen order; `requests[i]` belongs to `keys[i]`.
pub(crate) struct PendingBatch<K, V> {
    id: u64,
    keys: Vec<K>,
    index: HashMap<K, usize>,
    requests: Vec<Request<V>>,
    subscribers: usize,
    armed_at: Instant,
    polled: Arc<Notify>,
}

impl<K, V> PendingBatch<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(id: u64) -> Self {
        PendingBatch {
            id,
            keys: Vec::new(),
            index: HashMap::new(),
            requests: Vec::new(),
            subscribers: 0,
            armed_at: Instant::now(),
            polled: Arc::new(Notify::new()),
        }
    }

    /// Add a request for `key` and return its slot.
    ///
    /// A key already present in this batch shares the existing slot.
    pub(crate) fn push(&mut self, key: K) -> LoadFuture<V> {
        self.subscribers += 1;

        if let Some(&position) = self.index.get(&key) {
            return self.requests[position].slot.clone();
        }

        let (settler, slot) = LoadFuture::pending(Some(self.polled.clone()));
        self.index.insert(key.clone(), self.keys.len());
        self.keys.push(key);
        self.requests.push(Request {
            settler,
            slot: slot.clone(),
        });
        slot
    }
}

impl<K, V> PendingBatch<K, V> {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Number of distinct keys.
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    /// Number of `load` calls that joined this batch, duplicates included.
    pub(crate) fn subscribers(&self) -> usize {
        self.subscribers
    }

    pub(crate) fn armed_at(&self) -> Instant {
        self.armed_at
    }

    /// Notified once any caller starts waiting on one of this batch's slots.
    pub(crate) fn polled(&self) -> Arc<Notify> {
        self.polled.clone()
    }

    /// Split into the deduplicated key list and its aligned requests.
    pub(crate) fn into_parts(self) -> (Vec<K>, Vec<Request<V>>) {
        (self.keys, self.requests)
    }

    /// Settle every request with [`Error::ScopeCancelled`].
    pub(crate) fn cancel(self) {
        for request in self.requests {
            request.settle(Err(Error::ScopeCancelled));
        }
    }
}
