//! The loader handle - main entry point for batched loads.

use crate::config::LoaderConfig;
use crate::error::{Error, Result};
use crate::executor::BatchExecutor;
use crate::key::{KeyNormalizer, KeyRegistry};
use crate::observability::{LoaderMetrics, NoOpMetrics};
use crate::repository::BatchFn;
use crate::scheduler::Scheduler;
use crate::slot::LoadFuture;
use crate::strategy::DispatchTrigger;
use serde::Serialize;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Point-in-time counters for one loader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoaderStats {
    /// Registry entries, pending and settled.
    pub cached_entries: usize,
    /// Distinct keys in the armed batch.
    pub pending_keys: usize,
    /// Batches handed to the executor so far.
    pub batches_dispatched: u64,
}

/// Batch-coalescing load cache for one unit of work.
///
/// `load` calls issued close together are collected into one batch and
/// resolved with a single call to the fetch function. Each distinct key is
/// fetched at most once per loader; later loads of the same key share the
/// first one's outcome.
///
/// Create one loader per request (or other unit of work) and drop it when the
/// work is done. Dropping the last handle cancels anything still pending.
///
/// # Example
///
/// ```
/// use loader_kit::{Loader, InMemoryRepository};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> loader_kit::Result<()> {
/// let repo = InMemoryRepository::new();
/// repo.insert(1u64, "alice".to_string());
/// repo.insert(2u64, "bob".to_string());
///
/// let loader = Loader::new(repo.clone())?;
///
/// let (a, b, again) = tokio::join!(loader.load(1), loader.load(2), loader.load(1));
/// assert_eq!(a?, "alice");
/// assert_eq!(b?, "bob");
/// assert_eq!(again?, "alice");
///
/// // One batch, duplicates removed.
/// assert_eq!(repo.batches(), vec![vec![1, 2]]);
/// # Ok(())
/// # }
/// ```
pub struct Loader<K, V> {
    inner: Arc<LoaderInner<K, V>>,
}

struct LoaderInner<K, V> {
    registry: Arc<KeyRegistry<K, V>>,
    scheduler: Arc<Scheduler<K, V>>,
    normalizer: Option<Arc<KeyNormalizer<K>>>,
    metrics: Arc<dyn LoaderMetrics>,
    config: LoaderConfig,
}

impl<K, V> Clone for Loader<K, V> {
    fn clone(&self) -> Self {
        Loader {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Loader<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a loader with the default configuration.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` when called outside a tokio runtime.
    pub fn new<F>(fetch: F) -> Result<Self>
    where
        F: BatchFn<K, V>,
    {
        Self::builder(fetch).build()
    }

    /// Start configuring a loader around `fetch`.
    pub fn builder<F>(fetch: F) -> LoaderBuilder<K, V, F>
    where
        F: BatchFn<K, V>,
    {
        LoaderBuilder::new(fetch)
    }

    fn canonical(&self, key: K) -> K {
        match &self.inner.normalizer {
            Some(normalize) => normalize(&key),
            None => key,
        }
    }

    /// Load the value for `key`.
    ///
    /// The request is registered before this returns; awaiting the future is
    /// only needed to read the outcome. A key already known to this loader
    /// returns its existing slot, settled or not. With caching disabled only
    /// unsettled slots are known.
    pub fn load(&self, key: K) -> LoadFuture<V> {
        let inner = &self.inner;
        if inner.scheduler.is_cancelled() {
            return LoadFuture::settled(Err(Error::ScopeCancelled));
        }

        let key = self.canonical(key);
        let (slot, hit) = inner
            .registry
            .get_or_insert_with(key, |key| inner.scheduler.enqueue(key));
        if hit {
            inner.metrics.record_hit();
        } else {
            inner.metrics.record_miss();
        }
        slot
    }

    /// Load every key, one future per key in input order.
    ///
    /// Keys are registered in order, so keys issued together usually land in
    /// one batch. A size limit or a trigger firing in between can split them.
    pub fn load_many<I>(&self, keys: I) -> Vec<LoadFuture<V>>
    where
        I: IntoIterator<Item = K>,
    {
        keys.into_iter().map(|key| self.load(key)).collect()
    }

    /// Load every key and wait for all outcomes, in input order.
    ///
    /// With [`DispatchTrigger::Manual`] this only completes once something
    /// else calls [`Loader::dispatch`].
    pub async fn load_all<I>(&self, keys: I) -> Vec<Result<V>>
    where
        I: IntoIterator<Item = K>,
    {
        futures::future::join_all(self.load_many(keys)).await
    }

    /// Forget the entry for `key`. The next load fetches it again.
    ///
    /// A pending load of `key` still settles normally. Returns whether an
    /// entry was removed.
    pub fn clear(&self, key: &K) -> bool {
        let registry = &self.inner.registry;
        let removed = match &self.inner.normalizer {
            Some(normalize) => registry.remove(&normalize(key)),
            None => registry.remove(key),
        };
        if removed {
            trace!("[{}] cleared one entry", self.inner.config.label());
        }
        removed
    }

    /// Forget every entry. Pending loads still settle normally.
    pub fn clear_all(&self) {
        debug!(
            "[{}] clearing {} entries",
            self.inner.config.label(),
            self.inner.registry.len()
        );
        self.inner.registry.clear();
    }

    /// Seed `key` with `value` unless the loader already knows the key.
    ///
    /// Returns whether the value was stored. A key that is loading counts as
    /// known. Always `false` when caching is disabled.
    pub fn prime(&self, key: K, value: V) -> bool {
        self.prime_with(key, value, false)
    }

    /// Seed `key` with `value`, replacing any existing entry.
    ///
    /// Loads already waiting on the replaced entry still receive the fetched
    /// outcome; later loads see `value`.
    pub fn prime_overwrite(&self, key: K, value: V) -> bool {
        self.prime_with(key, value, true)
    }

    /// Seed `key` with `value`, replacing an existing entry if `overwrite`.
    pub fn prime_with(&self, key: K, value: V, overwrite: bool) -> bool {
        if !self.inner.config.caching_enabled {
            return false;
        }
        let registry = &self.inner.registry;
        let key = self.canonical(key);
        let slot = LoadFuture::settled(Ok(value));
        if overwrite {
            registry.insert(key, slot);
            true
        } else {
            registry.insert_if_absent(key, slot)
        }
    }

    /// Dispatch the armed batch now instead of waiting for the trigger.
    ///
    /// Returns whether a batch was pending.
    pub fn dispatch(&self) -> bool {
        self.inner.scheduler.flush()
    }

    /// Tear the loader down.
    ///
    /// Pending, queued and in-flight loads settle with
    /// [`Error::ScopeCancelled`], and so does every later load. Settled
    /// entries keep their outcome.
    pub fn cancel(&self) {
        info!("[{}] cancelling loader", self.inner.config.label());
        self.inner.scheduler.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.scheduler.is_cancelled()
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            cached_entries: self.inner.registry.len(),
            pending_keys: self.inner.scheduler.pending_keys(),
            batches_dispatched: self.inner.scheduler.batches_dispatched(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }
}

/// Builder for [`Loader`].
///
/// ```
/// use loader_kit::{DispatchTrigger, InMemoryRepository, Loader};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> loader_kit::Result<()> {
/// let repo: InMemoryRepository<String, u32> = InMemoryRepository::new();
/// let loader = Loader::builder(repo)
///     .with_max_batch_size(100)
///     .with_trigger(DispatchTrigger::Window(Duration::from_millis(2)))
///     .with_key_normalizer(|email: &String| email.to_lowercase())
///     .with_name("users-by-email")
///     .build()?;
/// # let _ = loader;
/// # Ok(())
/// # }
/// ```
pub struct LoaderBuilder<K, V, F> {
    fetch: F,
    config: LoaderConfig,
    metrics: Arc<dyn LoaderMetrics>,
    normalizer: Option<Arc<KeyNormalizer<K>>>,
    _value: PhantomData<fn() -> V>,
}

impl<K, V, F> LoaderBuilder<K, V, F>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: BatchFn<K, V>,
{
    pub fn new(fetch: F) -> Self {
        LoaderBuilder {
            fetch,
            config: LoaderConfig::default(),
            metrics: Arc::new(NoOpMetrics),
            normalizer: None,
            _value: PhantomData,
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Dispatch early once a batch holds this many distinct keys (0 = no limit).
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.config.max_batch_size = max_batch_size;
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.config.caching_enabled = enabled;
        self
    }

    pub fn with_trigger(mut self, trigger: DispatchTrigger) -> Self {
        self.config.trigger = trigger;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn LoaderMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Map every key to a canonical form before it is looked up or fetched.
    ///
    /// Keys that normalize to the same value share one entry. The fetch
    /// function receives normalized keys.
    pub fn with_key_normalizer<N>(mut self, normalizer: N) -> Self
    where
        N: Fn(&K) -> K + Send + Sync + 'static,
    {
        let normalizer: Arc<KeyNormalizer<K>> = Arc::new(normalizer);
        self.normalizer = Some(normalizer);
        self
    }

    /// Build the loader and start its executor on the current runtime.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` when called outside a tokio runtime.
    pub fn build(self) -> Result<Loader<K, V>> {
        let runtime = Handle::try_current().map_err(|e| {
            Error::ConfigError(format!("loader must be built inside a tokio runtime: {}", e))
        })?;

        let config = self.config;
        let label = config.label().to_string();
        // Without caching the registry only holds keys until they settle.
        let registry = Arc::new(KeyRegistry::new());

        let (queue, batches) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let executor = BatchExecutor::new(
            self.fetch,
            registry.clone(),
            config.caching_enabled,
            self.metrics.clone(),
            label.clone(),
        );
        runtime.spawn(executor.run(batches, shutdown.clone()));

        let scheduler = Scheduler::new(
            queue,
            config.trigger,
            config.batch_limit(),
            runtime,
            shutdown,
            self.metrics.clone(),
            label.clone(),
        );

        debug!(
            "[{}] loader ready (trigger: {}, max batch size: {}, caching: {})",
            label, config.trigger, config.max_batch_size, config.caching_enabled
        );

        Ok(Loader {
            inner: Arc::new(LoaderInner {
                registry,
                scheduler,
                normalizer: self.normalizer,
                metrics: self.metrics,
                config,
            }),
        })
    }
}
