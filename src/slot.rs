//! Shared result slots.
//!
//! A slot is the single place a key's outcome lands. Any number of callers
//! can await the same slot; the outcome is settled once and cloned to each of
//! them.

use crate::error::{Error, Result};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{oneshot, Notify};

/// Write half of a pending slot.
///
/// Settling consumes the settler, so a slot can be settled at most once.
/// Dropping a settler without settling resolves the slot with
/// [`Error::ScopeCancelled`].
pub(crate) struct Settler<V> {
    tx: oneshot::Sender<Result<V>>,
}

impl<V> Settler<V> {
    pub(crate) fn settle(self, outcome: Result<V>) {
        // Err means every subscriber already went away.
        let _ = self.tx.send(outcome);
    }
}

/// Future resolving to the outcome of one `load` call.
///
/// Cloning a `LoadFuture` yields another subscriber of the same slot. Every
/// clone resolves to the same outcome.
pub struct LoadFuture<V> {
    inner: Shared<BoxFuture<'static, Result<V>>>,
}

impl<V> LoadFuture<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an unsettled slot and its settler.
    ///
    /// `polled` is notified the first time any subscriber polls the slot.
    pub(crate) fn pending(polled: Option<Arc<Notify>>) -> (Settler<V>, Self) {
        let (tx, rx) = oneshot::channel();
        let inner = async move {
            if let Some(polled) = polled {
                polled.notify_one();
            }
            rx.await.unwrap_or_else(|_| Err(Error::ScopeCancelled))
        }
        .boxed()
        .shared();
        (Settler { tx }, LoadFuture { inner })
    }

    /// Create a slot that is already settled.
    pub(crate) fn settled(outcome: Result<V>) -> Self {
        LoadFuture {
            inner: futures::future::ready(outcome).boxed().shared(),
        }
    }

    /// Whether both futures subscribe to the same slot.
    pub fn same_slot(&self, other: &Self) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl<V> Clone for LoadFuture<V> {
    fn clone(&self) -> Self {
        LoadFuture {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Future for LoadFuture<V>
where
    V: Clone,
{
    type Output = Result<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl<V> fmt::Debug for LoadFuture<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadFuture").finish_non_exhaustive()
    }
}
