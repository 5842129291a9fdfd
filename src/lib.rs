//! # loader-kit
//!
//! A type-safe, batch-coalescing load cache for async Rust.
//!
//! Code that resolves many independent lookups one by one (a GraphQL resolver
//! tree, an HTTP handler walking a list) pays one round-trip per lookup. A
//! [`Loader`] sits between that code and the data source: `load` calls issued
//! together are deduplicated, collected into one batch and resolved with a
//! single fetch.
//!
//! ## Features
//!
//! - **Deduplication:** each distinct key is fetched at most once per loader
//! - **Coalescing:** loads issued within one tick (or window) share one fetch
//! - **Ordering:** the fetch sees keys in first-requested order, batches run in order
//! - **Isolation:** a per-key error only reaches the callers of that key
//! - **Runtime Agnostic:** works on current-thread and multi-threaded tokio runtimes
//! - **Production Ready:** built-in logging, metrics hooks and error handling
//!
//! ## Quick Start
//!
//! ```
//! use loader_kit::{fetch_fn, Error, Loader, Outcome};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> loader_kit::Result<()> {
//! // 1. Describe how to fetch a batch: one outcome per key, same order.
//! let users = fetch_fn(|ids: Vec<u64>| async move {
//!     let outcomes: Vec<Outcome<String>> = ids
//!         .into_iter()
//!         .map(|id| match id {
//!             0 => Err(Error::NotFound(id.to_string())),
//!             _ => Ok(format!("user-{}", id)),
//!         })
//!         .collect();
//!     Ok::<_, Error>(outcomes)
//! });
//!
//! // 2. One loader per unit of work.
//! let loader = Loader::new(users)?;
//!
//! // 3. Load freely; these three calls become one fetch of [7, 0].
//! let results = loader.load_all([7, 0, 7]).await;
//! assert_eq!(results[0], Ok("user-7".to_string()));
//! assert_eq!(results[1], Err(Error::NotFound("0".to_string())));
//! assert_eq!(results[2], Ok("user-7".to_string()));
//! # Ok(())
//! # }
//! ```
//!
//! See [`LoaderBuilder`] for batch limits, triggers and key normalization,
//! and [`repository::BatchFn`] for implementing a data source directly.

#[macro_use]
extern crate log;

mod batch;
pub mod config;
pub mod error;
mod executor;
pub mod key;
pub mod loader;
pub mod observability;
pub mod repository;
mod scheduler;
pub mod slot;
pub mod strategy;

// Re-exports for convenience
pub use config::LoaderConfig;
pub use error::{Error, Result};
pub use key::KeyRegistry;
pub use loader::{Loader, LoaderBuilder, LoaderStats};
pub use observability::{LoaderMetrics, NoOpMetrics};
pub use repository::{fetch_fn, BatchFn, FetchFn, InMemoryRepository, Outcome};
pub use slot::LoadFuture;
pub use strategy::DispatchTrigger;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
