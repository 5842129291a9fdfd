//! Batch execution.
//!
//! A single executor task per loader receives dispatched batches in order,
//! starts their fetches in that order and lets them run concurrently. Each
//! batch's outcomes are delivered to its slots positionally.

use crate::batch::{PendingBatch, Request};
use crate::error::Error;
use crate::key::KeyRegistry;
use crate::observability::LoaderMetrics;
use crate::repository::BatchFn;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

pub(crate) struct BatchExecutor<K, V, F> {
    fetch: F,
    registry: Arc<KeyRegistry<K, V>>,
    memoize: bool,
    metrics: Arc<dyn LoaderMetrics>,
    label: String,
}

impl<K, V, F> BatchExecutor<K, V, F>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    F: BatchFn<K, V>,
{
    pub(crate) fn new(
        fetch: F,
        registry: Arc<KeyRegistry<K, V>>,
        memoize: bool,
        metrics: Arc<dyn LoaderMetrics>,
        label: String,
    ) -> Self {
        BatchExecutor {
            fetch,
            registry,
            memoize,
            metrics,
            label,
        }
    }

    /// Drive batches until the queue closes or `shutdown` fires.
    ///
    /// On shutdown, in-flight fetches are abandoned and queued batches are
    /// cancelled; every affected slot settles with [`Error::ScopeCancelled`].
    pub(crate) async fn run(
        self,
        mut queue: UnboundedReceiver<PendingBatch<K, V>>,
        shutdown: CancellationToken,
    ) {
        trace!("[{}] executor started", self.label);
        let mut in_flight = FuturesUnordered::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = queue.recv() => match received {
                    Some(batch) => in_flight.push(self.execute(batch)),
                    None => break,
                },
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
            }
        }

        let abandoned = in_flight.len();
        drop(in_flight);

        queue.close();
        let mut queued = 0;
        while let Ok(batch) = queue.try_recv() {
            queued += 1;
            batch.cancel();
        }

        if abandoned > 0 || queued > 0 {
            warn!(
                "[{}] executor stopped: {} in-flight and {} queued batches cancelled",
                self.label, abandoned, queued
            );
        } else {
            trace!("[{}] executor stopped", self.label);
        }
    }

    async fn execute(&self, batch: PendingBatch<K, V>) {
        let id = batch.id();
        let (keys, requests) = batch.into_parts();
        let started = Instant::now();

        // The call itself runs inside the guarded future so a panic raised
        // before the first await is caught as well.
        let result = AssertUnwindSafe(async { self.fetch.fetch(&keys).await })
            .catch_unwind()
            .await;

        let outcomes = match result {
            Ok(Ok(outcomes)) if outcomes.len() == keys.len() => outcomes,
            Ok(Ok(outcomes)) => {
                error!(
                    "[{}] batch #{} fetch returned {} outcomes for {} keys",
                    self.label,
                    id,
                    outcomes.len(),
                    keys.len()
                );
                self.metrics
                    .record_contract_violation(keys.len(), outcomes.len());
                let error = Error::BatchContract {
                    expected: keys.len(),
                    found: outcomes.len(),
                };
                self.fail(&keys, requests, error);
                return;
            }
            Ok(Err(error)) => {
                debug!("[{}] batch #{} failed: {}", self.label, id, error);
                self.fail(&keys, requests, error);
                return;
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!("[{}] batch #{} fetch panicked: {}", self.label, id, message);
                self.fail(&keys, requests, Error::FetchPanicked(message));
                return;
            }
        };

        for ((key, request), outcome) in keys.iter().zip(requests).zip(outcomes) {
            if !self.memoize {
                self.registry.remove_if_same(key, request.slot());
            }
            request.settle(outcome);
        }
        self.metrics
            .record_batch_complete(keys.len(), started.elapsed());
    }

    /// Fail every request in the batch with `error`.
    ///
    /// Registry entries still pointing at these slots are dropped first, so a
    /// later load of the same key starts a fresh fetch.
    fn fail(&self, keys: &[K], requests: Vec<Request<V>>, error: Error) {
        self.metrics.record_batch_failure(keys.len(), &error);

        for (key, request) in keys.iter().zip(requests) {
            self.registry.remove_if_same(key, request.slot());
            request.settle(Err(error.clone()));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
