//! Batch fetch trait for abstracting the data source.
//!
//! The `BatchFn` trait decouples the loader from specific database or API
//! clients. The loader hands it each batch's deduplicated keys, in the order
//! they were first requested, and expects exactly one outcome per key back.
//!
//! # Implementing BatchFn
//!
//! ```ignore
//! use loader_kit::{BatchFn, Error, Outcome, Result};
//!
//! struct UserRepository {
//!     pool: PgPool,
//! }
//!
//! impl BatchFn<i64, User> for UserRepository {
//!     async fn fetch(&self, ids: &[i64]) -> Result<Vec<Outcome<User>>> {
//!         let rows = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ANY($1)")
//!             .bind(ids)
//!             .fetch_all(&self.pool)
//!             .await
//!             .map_err(|e| Error::RepositoryError(e.to_string()))?;
//!
//!         // Align rows with the requested ids, one outcome per id.
//!         let mut by_id: HashMap<i64, User> = rows.into_iter().map(|u| (u.id, u)).collect();
//!         Ok(ids
//!             .iter()
//!             .map(|id| by_id.remove(id).ok_or_else(|| Error::NotFound(id.to_string())))
//!             .collect())
//!     }
//! }
//! ```
//!
//! Plain closures work through [`fetch_fn`].
//!
//! # Error Handling
//!
//! Return a top-level `Err` when the whole call failed (connection refused,
//! deadline exceeded); every caller in the batch receives it. Return a
//! per-key `Err` inside the outcome list when only that key failed (not
//! found, permission denied); only that key's callers receive it.

use crate::error::{Error, Result};
use dashmap::DashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Outcome for one key: its value or a per-key error.
pub type Outcome<V> = Result<V>;

/// Trait for batch fetch implementations.
///
/// # Contract
///
/// - `keys` holds no duplicates and is in first-requested order.
/// - On success the returned vector has exactly `keys.len()` outcomes,
///   `outcomes[i]` belonging to `keys[i]`. Any other length fails the whole
///   batch with [`Error::BatchContract`].
/// - The loader never retries. Retry and deadline policy belong here.
pub trait BatchFn<K, V>: Send + Sync + 'static {
    /// Fetch outcomes for a batch of distinct keys.
    ///
    /// # Errors
    /// Returns `Err` if the data source is unavailable or the call fails as a
    /// whole.
    fn fetch(&self, keys: &[K]) -> impl Future<Output = Result<Vec<Outcome<V>>>> + Send;
}

/// [`BatchFn`] backed by a closure. Created by [`fetch_fn`].
pub struct FetchFn<F> {
    f: F,
}

/// Wrap a closure taking the batch's keys as a [`BatchFn`].
///
/// # Example
///
/// ```
/// use loader_kit::{fetch_fn, Error, Outcome};
///
/// let double = fetch_fn(|keys: Vec<u64>| async move {
///     let outcomes: Vec<Outcome<u64>> = keys.into_iter().map(|key| Ok(key * 2)).collect();
///     Ok::<_, Error>(outcomes)
/// });
/// # let _ = double;
/// ```
pub fn fetch_fn<F>(f: F) -> FetchFn<F> {
    FetchFn { f }
}

impl<K, V, F, Fut> BatchFn<K, V> for FetchFn<F>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Outcome<V>>>> + Send,
{
    fn fetch(&self, keys: &[K]) -> impl Future<Output = Result<Vec<Outcome<V>>>> + Send {
        (self.f)(keys.to_vec())
    }
}

// ============================================================================
// In-Memory Test Repository
// ============================================================================

/// Simple in-memory data source for testing loader code.
///
/// Clones share the same data and call log, so a test can hand one clone to
/// a loader and inspect the batches it received through another.
///
/// # Testing Different Scenarios
///
/// - **Batching**: check `batches()` for the key lists the loader produced
/// - **Not found**: leave a key out; its callers get `Error::NotFound`
/// - **Total failure**: `fail_with(Some(error))` fails every later batch
/// - **In-flight work**: `with_latency()` keeps batches in flight
#[derive(Clone)]
pub struct InMemoryRepository<K, V> {
    data: Arc<DashMap<K, V>>,
    batches: Arc<Mutex<Vec<Vec<K>>>>,
    failure: Arc<Mutex<Option<Error>>>,
    latency: Option<Duration>,
}

impl<K, V> InMemoryRepository<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a new empty in-memory repository.
    pub fn new() -> Self {
        InMemoryRepository {
            data: Arc::new(DashMap::new()),
            batches: Arc::new(Mutex::new(Vec::new())),
            failure: Arc::new(Mutex::new(None)),
            latency: None,
        }
    }

    /// Sleep for `latency` inside every fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert or update a value by key.
    pub fn insert(&self, key: K, value: V) {
        self.data.insert(key, value);
    }

    /// Remove a value by key.
    pub fn remove(&self, key: &K) {
        self.data.remove(key);
    }

    /// Fail every subsequent batch with `error`, or stop failing with `None`.
    pub fn fail_with(&self, error: Option<Error>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = error;
    }

    /// Key lists received so far, one entry per batch.
    pub fn batches(&self) -> Vec<Vec<K>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of batches received so far.
    pub fn batch_count(&self) -> usize {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Return the number of stored values.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Return true if the repository holds no values.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<K, V> Default for InMemoryRepository<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> BatchFn<K, V> for InMemoryRepository<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn fetch(&self, keys: &[K]) -> Result<Vec<Outcome<V>>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(keys.to_vec());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let failure = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(error) = failure {
            return Err(error);
        }

        Ok(keys
            .iter()
            .map(|key| {
                self.data
                    .get(key)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| Error::NotFound(format!("{:?}", key)))
            })
            .collect())
    }
}
