//! Batch scheduling: arming, size threshold and dispatch.
//!
//! At most one batch is armed at a time. Dispatch moves it into the executor
//! queue under the state lock, so batches reach the executor in the order
//! they were armed.

use crate::batch::PendingBatch;
use crate::error::Error;
use crate::observability::LoaderMetrics;
use crate::slot::LoadFuture;
use crate::strategy::DispatchTrigger;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct SchedulerState<K, V> {
    current: Option<PendingBatch<K, V>>,
    next_id: u64,
    dispatched: u64,
}

pub(crate) struct Scheduler<K, V> {
    state: Mutex<SchedulerState<K, V>>,
    queue: UnboundedSender<PendingBatch<K, V>>,
    trigger: DispatchTrigger,
    batch_limit: Option<usize>,
    runtime: Handle,
    shutdown: CancellationToken,
    metrics: Arc<dyn LoaderMetrics>,
    label: String,
    this: Weak<Self>,
}

impl<K, V> Scheduler<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        queue: UnboundedSender<PendingBatch<K, V>>,
        trigger: DispatchTrigger,
        batch_limit: Option<usize>,
        runtime: Handle,
        shutdown: CancellationToken,
        metrics: Arc<dyn LoaderMetrics>,
        label: String,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Scheduler {
            state: Mutex::new(SchedulerState {
                current: None,
                next_id: 0,
                dispatched: 0,
            }),
            queue,
            trigger,
            batch_limit,
            runtime,
            shutdown,
            metrics,
            label,
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a request for `key` to the armed batch, arming one if needed.
    pub(crate) fn enqueue(&self, key: K) -> LoadFuture<V> {
        if self.shutdown.is_cancelled() {
            return LoadFuture::settled(Err(Error::ScopeCancelled));
        }

        let mut state = self.lock();

        let mut batch = match state.current.take() {
            Some(batch) => batch,
            None => {
                let id = state.next_id;
                state.next_id += 1;
                let batch = PendingBatch::new(id);
                self.arm(id, batch.polled());
                batch
            }
        };

        let slot = batch.push(key);
        let full = self.batch_limit.is_some_and(|limit| batch.len() >= limit);
        let id = batch.id();
        state.current = Some(batch);

        if full {
            debug!(
                "[{}] batch #{} reached its size limit, dispatching early",
                self.label, id
            );
            self.dispatch_locked(&mut state);
        }

        slot
    }

    /// Spawn the task that dispatches batch `id` once the trigger fires.
    fn arm(&self, id: u64, polled: Arc<Notify>) {
        trace!("[{}] armed batch #{} ({})", self.label, id, self.trigger);

        if !self.trigger.is_automatic() {
            return;
        }

        let trigger = self.trigger;
        let scheduler = self.this.clone();
        self.runtime.spawn(async move {
            trigger.fired(polled).await;
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.dispatch_batch(id);
            }
        });
    }

    /// Dispatch batch `id` if it is still the armed one.
    fn dispatch_batch(&self, id: u64) {
        let mut state = self.lock();
        if state.current.as_ref().map(PendingBatch::id) == Some(id) {
            self.dispatch_locked(&mut state);
        }
    }

    /// Dispatch the armed batch now. Returns whether there was one.
    pub(crate) fn flush(&self) -> bool {
        let mut state = self.lock();
        self.dispatch_locked(&mut state)
    }

    fn dispatch_locked(&self, state: &mut SchedulerState<K, V>) -> bool {
        let Some(batch) = state.current.take() else {
            return false;
        };

        state.dispatched += 1;
        debug!(
            "[{}] dispatching batch #{} ({} keys, {} loads)",
            self.label,
            batch.id(),
            batch.len(),
            batch.subscribers()
        );
        self.metrics.record_dispatch(
            batch.len(),
            batch.subscribers(),
            batch.armed_at().elapsed(),
        );

        if let Err(rejected) = self.queue.send(batch) {
            warn!(
                "[{}] executor stopped, cancelling batch #{}",
                self.label,
                rejected.0.id()
            );
            rejected.0.cancel();
        }
        true
    }

    /// Tear the scope down: fail the armed batch and stop the executor.
    pub(crate) fn cancel(&self) {
        self.shutdown.cancel();

        let pending = self.lock().current.take();
        if let Some(batch) = pending {
            warn!(
                "[{}] scope cancelled with batch #{} pending ({} keys)",
                self.label,
                batch.id(),
                batch.len()
            );
            batch.cancel();
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Distinct keys waiting in the armed batch.
    pub(crate) fn pending_keys(&self) -> usize {
        self.lock().current.as_ref().map_or(0, PendingBatch::len)
    }

    pub(crate) fn batches_dispatched(&self) -> u64 {
        self.lock().dispatched
    }
}

impl<K, V> Drop for Scheduler<K, V> {
    fn drop(&mut self) {
        self.shutdown.cancel();

        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(batch) = state.current.take() {
            debug!(
                "[{}] loader dropped with batch #{} pending",
                self.label,
                batch.id()
            );
            // Dropping the batch drops its settlers, which cancels every slot.
            drop(batch);
        }
    }
}
