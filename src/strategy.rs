//! Dispatch triggers: when a pending batch leaves the loader.
//!
//! # Overview
//!
//! Every armed batch waits on exactly one trigger. Whatever fires first, the
//! trigger or the size threshold (`max_batch_size`), dispatches the batch.
//!
//! ```
//! use loader_kit::strategy::DispatchTrigger;
//! use std::time::Duration;
//!
//! // 1. Yield - dispatch once a caller awaits a load in the batch (default)
//! let _t = DispatchTrigger::Yield;
//!
//! // 2. Window - wait a short coalescing window
//! let _t = DispatchTrigger::Window(Duration::from_millis(2));
//!
//! // 3. Manual - wait for Loader::dispatch()
//! let _t = DispatchTrigger::Manual;
//! ```
//!
//! # When to Use Each Trigger
//!
//! | Trigger | Dispatches when | Use Case |
//! |---------|-----------------|----------|
//! | **Yield** | a caller starts waiting on the batch, then the runtime gets one more turn | Resolver trees driven by `join_all` on one task |
//! | **Window** | the window elapses | Loads spread over many tasks of a multi-threaded runtime |
//! | **Manual** | `Loader::dispatch()` is called | The unit of work knows its own batch boundaries |
//!
//! # Trade-offs
//!
//! - **Yield** adds no latency. Every load issued before the issuing task
//!   first awaits a load lands in the batch, whichever thread it runs on.
//!   Loads issued concurrently from other tasks of a multi-threaded runtime
//!   may miss the batch and form smaller ones.
//! - **Window** trades a little latency for larger batches.
//! - **Manual** never dispatches on its own; a forgotten `dispatch()` leaves
//!   callers waiting until the size threshold is hit or the scope is torn down.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Trigger that dispatches an armed batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTrigger {
    /// **Yield**: dispatch once the unit of work suspends on the batch.
    ///
    /// Flow:
    /// 1. First miss arms the batch and spawns its dispatcher
    /// 2. Loads issued before anyone awaits a slot of the batch join it
    /// 3. The first poll of such a slot wakes the dispatcher
    /// 4. Dispatcher yields once more, then dispatches
    #[default]
    Yield,

    /// **Window**: dispatch after the given coalescing window.
    Window(Duration),

    /// **Manual**: dispatch only on an explicit flush.
    Manual,
}

impl DispatchTrigger {
    /// Wait until the trigger fires.
    ///
    /// `polled` is the batch's first-poll signal. Never completes for
    /// [`DispatchTrigger::Manual`].
    pub(crate) async fn fired(self, polled: Arc<Notify>) {
        match self {
            DispatchTrigger::Yield => {
                polled.notified().await;
                tokio::task::yield_now().await;
            }
            DispatchTrigger::Window(window) => tokio::time::sleep(window).await,
            DispatchTrigger::Manual => std::future::pending::<()>().await,
        }
    }

    /// Whether the trigger needs a dispatcher task at all.
    pub(crate) fn is_automatic(&self) -> bool {
        !matches!(self, DispatchTrigger::Manual)
    }
}

impl std::fmt::Display for DispatchTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchTrigger::Yield => write!(f, "Yield"),
            DispatchTrigger::Window(window) => write!(f, "Window({:?})", window),
            DispatchTrigger::Manual => write!(f, "Manual"),
        }
    }
}
