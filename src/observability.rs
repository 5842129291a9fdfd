//! Observability hooks for loader activity.
//!
//! Implement [`LoaderMetrics`] to feed loader statistics into your monitoring
//! system:
//!
//! ```ignore
//! use loader_kit::observability::LoaderMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl LoaderMetrics for PrometheusMetrics {
//!     fn record_batch_complete(&self, keys: usize, duration: Duration) {
//!         // histogram!("loader_batch_size").record(keys as f64);
//!         // histogram!("loader_batch_latency").record(duration);
//!     }
//!
//!     fn record_contract_violation(&self, expected: usize, found: usize) {
//!         // counter!("loader_contract_violations").inc();
//!     }
//! }
//!
//! // let loader = Loader::builder(repo)
//! //     .with_metrics(Arc::new(PrometheusMetrics))
//! //     .build()?;
//! ```
//!
//! Methods not overridden fall back to logging through the `log` crate.
//! Loaders use [`NoOpMetrics`] unless told otherwise.
//!
//! `record_contract_violation` is the out-of-band channel for fetch functions
//! that return the wrong number of outcomes. Those are bugs, not data
//! conditions, and deserve an alert rather than a dashboard line.

use crate::error::Error;
use std::time::Duration;

/// Trait for loader metrics collection.
pub trait LoaderMetrics: Send + Sync {
    /// Record a `load` served from the registry.
    fn record_hit(&self) {
        trace!("Loader HIT");
    }

    /// Record a `load` that joined a pending batch.
    fn record_miss(&self) {
        trace!("Loader MISS");
    }

    /// Record a batch handed to the executor.
    ///
    /// `waited` spans arming to dispatch. Runs while the batch lock is held,
    /// so keep it cheap.
    fn record_dispatch(&self, keys: usize, subscribers: usize, waited: Duration) {
        debug!(
            "Loader DISPATCH: {} keys for {} loads after {:?}",
            keys, subscribers, waited
        );
    }

    /// Record a batch whose outcomes were delivered.
    fn record_batch_complete(&self, keys: usize, duration: Duration) {
        debug!("Loader BATCH: {} keys took {:?}", keys, duration);
    }

    /// Record a batch that failed as a whole.
    fn record_batch_failure(&self, keys: usize, error: &Error) {
        warn!("Loader BATCH FAILED for {} keys: {}", keys, error);
    }

    /// Record a fetch function returning the wrong number of outcomes.
    fn record_contract_violation(&self, expected: usize, found: usize) {
        error!(
            "Loader CONTRACT VIOLATION: expected {} outcomes, found {}",
            expected, found
        );
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl LoaderMetrics for NoOpMetrics {
    fn record_hit(&self) {}
    fn record_miss(&self) {}
    fn record_dispatch(&self, _keys: usize, _subscribers: usize, _waited: Duration) {}
    fn record_batch_complete(&self, _keys: usize, _duration: Duration) {}
    fn record_batch_failure(&self, _keys: usize, _error: &Error) {}
    fn record_contract_violation(&self, _expected: usize, _found: usize) {}
}

/// Metrics implementation that only logs (the trait defaults).
#[derive(Clone, Default)]
pub struct LogMetrics;

impl LoaderMetrics for LogMetrics {}
