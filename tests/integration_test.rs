//! Integration tests for loader-kit
//!
//! These tests verify end-to-end loader behavior across all components.

use loader_kit::{
    fetch_fn, DispatchTrigger, Error, InMemoryRepository, Loader, LoaderConfig, LoaderMetrics,
    Outcome,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Test entity definition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct User {
    id: u64,
    name: String,
}

fn user(id: u64) -> User {
    User {
        id,
        name: format!("user-{}", id),
    }
}

fn user_repo(ids: impl IntoIterator<Item = u64>) -> InMemoryRepository<u64, User> {
    let repo = InMemoryRepository::new();
    for id in ids {
        repo.insert(id, user(id));
    }
    repo
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Test 1: Coalescing Scenario
///
/// Verifies the basic flow:
/// - Three loads with one duplicate, issued in the same tick
/// - Exactly one fetch with the distinct keys in first-seen order
/// - Every caller, the duplicate included, gets its value
#[tokio::test]
async fn test_duplicate_loads_share_one_fetch() {
    init_logging();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();
    let fetch = fetch_fn(move |keys: Vec<u32>| {
        recorded.lock().expect("poisoned").push(keys.clone());
        async move {
            let outcomes: Vec<Outcome<u32>> = keys.into_iter().map(|key| Ok(key * 10)).collect();
            Ok::<_, Error>(outcomes)
        }
    });

    let loader = Loader::builder(fetch)
        .with_max_batch_size(0)
        .build()
        .expect("Failed to build loader");

    let first = loader.load(1);
    let second = loader.load(2);
    let third = loader.load(1);
    tokio::task::yield_now().await;

    assert_eq!(first.await, Ok(10));
    assert_eq!(second.await, Ok(20));
    assert_eq!(third.await, Ok(10));
    assert_eq!(*calls.lock().expect("poisoned"), vec![vec![1, 2]]);
}

/// Test 2: First-Seen Ordering
#[tokio::test]
async fn test_fetch_receives_first_seen_order() {
    let repo = user_repo(1..=3);
    let loader = Loader::new(repo.clone()).expect("Failed to build loader");

    let results = loader.load_all([3, 1, 3, 2]).await;

    assert_eq!(repo.batches(), vec![vec![3, 1, 2]]);
    assert_eq!(
        results,
        vec![Ok(user(3)), Ok(user(1)), Ok(user(3)), Ok(user(2))]
    );
}

/// Test 3: Per-Key Error Isolation
///
/// A missing key errors for its own callers only; its neighbours in the
/// same batch still get their values.
#[tokio::test]
async fn test_per_key_error_is_isolated() {
    let repo = user_repo([1, 3]);
    let loader = Loader::new(repo.clone()).expect("Failed to build loader");

    let results = loader.load_all([1, 2, 3]).await;

    assert_eq!(results[0], Ok(user(1)));
    assert_eq!(results[1], Err(Error::NotFound("2".to_string())));
    assert_eq!(results[2], Ok(user(3)));
    assert_eq!(repo.batch_count(), 1);

    // Per-key errors are memoized like values.
    assert_eq!(loader.load(2).await, Err(Error::NotFound("2".to_string())));
    assert_eq!(repo.batch_count(), 1);
}

#[derive(Default)]
struct ViolationCounter {
    violations: AtomicUsize,
}

impl LoaderMetrics for ViolationCounter {
    fn record_contract_violation(&self, expected: usize, found: usize) {
        assert_eq!((expected, found), (3, 2));
        self.violations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Test 4: Contract Violation
///
/// Two outcomes for three keys fails all three callers and is reported
/// through the metrics hook.
#[tokio::test]
async fn test_contract_violation_fails_every_caller() {
    init_logging();

    let short = fetch_fn(|keys: Vec<u64>| async move {
        let outcomes: Vec<Outcome<User>> = keys.into_iter().take(2).map(|id| Ok(user(id))).collect();
        Ok::<_, Error>(outcomes)
    });
    let metrics = Arc::new(ViolationCounter::default());

    let loader = Loader::builder(short)
        .with_metrics(metrics.clone())
        .build()
        .expect("Failed to build loader");

    let results = loader.load_all([1, 2, 3]).await;

    let expected = Err(Error::BatchContract {
        expected: 3,
        found: 2,
    });
    assert_eq!(results, vec![expected.clone(), expected.clone(), expected]);
    assert_eq!(metrics.violations.load(Ordering::SeqCst), 1);

    // The failure is not memoized.
    assert_eq!(loader.stats().cached_entries, 0);
}

/// Test 5: Cache Lifetime
///
/// Verifies memoization across dispatch windows:
/// - Repeated loads in later ticks are served from the loader
/// - clear() forces a refetch
/// - clear_all() forgets everything
#[tokio::test]
async fn test_cache_lifetime_and_clear() {
    let repo = user_repo(1..=2);
    let loader = Loader::new(repo.clone()).expect("Failed to build loader");

    loader.load(1).await.expect("Failed to load");
    loader.load(1).await.expect("Failed to load");
    loader.load_all([1, 2]).await;
    assert_eq!(repo.batches(), vec![vec![1], vec![2]]);

    repo.insert(1, User {
        id: 1,
        name: "renamed".to_string(),
    });
    assert_eq!(loader.load(1).await, Ok(user(1)));

    assert!(loader.clear(&1));
    assert_eq!(loader.load(1).await.map(|u| u.name), Ok("renamed".to_string()));
    assert_eq!(repo.batch_count(), 3);

    loader.clear_all();
    assert_eq!(loader.stats().cached_entries, 0);
    loader.load_all([1, 2]).await;
    assert_eq!(repo.batches().last(), Some(&vec![1, 2]));
}

/// Test 6: Batch Size Limit
///
/// A full batch dispatches at once; the rest arm a new batch, and the
/// fetches happen in arming order.
#[tokio::test]
async fn test_max_batch_size_splits_in_order() {
    let repo = user_repo(1..=7);
    let loader = Loader::builder(repo.clone())
        .with_max_batch_size(3)
        .build()
        .expect("Failed to build loader");

    let results = loader.load_all(1..=7).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(
        repo.batches(),
        vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]
    );
    assert_eq!(loader.stats().batches_dispatched, 3);
}

/// Test 7: Caching Disabled
#[tokio::test]
async fn test_caching_disabled_still_coalesces() {
    let repo = user_repo(1..=2);
    let loader = Loader::builder(repo.clone())
        .with_caching(false)
        .build()
        .expect("Failed to build loader");

    loader.load_all([1, 2, 1]).await;
    loader.load_all([1]).await;

    assert_eq!(repo.batches(), vec![vec![1, 2], vec![1]]);
}

/// Test 8: Total Failure Is Not Memoized
#[tokio::test]
async fn test_total_failure_retries_on_next_load() {
    let repo = user_repo(1..=2);
    repo.fail_with(Some(Error::Timeout("deadline exceeded".to_string())));

    let loader = Loader::new(repo.clone()).expect("Failed to build loader");

    let results = loader.load_all([1, 2]).await;
    assert_eq!(
        results,
        vec![
            Err(Error::Timeout("deadline exceeded".to_string())),
            Err(Error::Timeout("deadline exceeded".to_string())),
        ]
    );

    repo.fail_with(None);
    assert_eq!(loader.load(1).await, Ok(user(1)));
    assert_eq!(repo.batch_count(), 2);
}

/// Test 9: Panicking Fetch
#[tokio::test]
async fn test_panicking_fetch_fails_batch_only() {
    let flaky = fetch_fn(|keys: Vec<u64>| async move {
        if keys.contains(&13) {
            panic!("unlucky key");
        }
        let outcomes: Vec<Outcome<User>> = keys.into_iter().map(|id| Ok(user(id))).collect();
        Ok::<_, Error>(outcomes)
    });

    let loader = Loader::new(flaky).expect("Failed to build loader");

    let results = loader.load_all([12, 13]).await;
    assert_eq!(
        results[0],
        Err(Error::FetchPanicked("unlucky key".to_string()))
    );
    assert_eq!(results[0], results[1]);

    // The loader keeps working.
    assert_eq!(loader.load(12).await, Ok(user(12)));
}

/// Test 10: Prime
#[tokio::test]
async fn test_prime_skips_fetch() {
    let repo = user_repo(1..=2);
    let loader = Loader::new(repo.clone()).expect("Failed to build loader");

    assert!(loader.prime(1, user(100)));
    let results = loader.load_all([1, 2]).await;

    assert_eq!(results, vec![Ok(user(100)), Ok(user(2))]);
    assert_eq!(repo.batches(), vec![vec![2]]);
}

/// Test 11: Manual Trigger
///
/// Nothing is fetched until the unit of work flushes.
#[tokio::test(start_paused = true)]
async fn test_manual_trigger_waits_for_dispatch() {
    let repo = user_repo(1..=3);
    let loader = Loader::builder(repo.clone())
        .with_trigger(DispatchTrigger::Manual)
        .build()
        .expect("Failed to build loader");

    let slots = loader.load_many([1, 2, 3]);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(repo.batch_count(), 0);
    assert_eq!(loader.stats().pending_keys, 3);

    assert!(loader.dispatch());
    let results = futures::future::join_all(slots).await;
    assert_eq!(results, vec![Ok(user(1)), Ok(user(2)), Ok(user(3))]);
}

/// Test 12: Window Trigger
#[tokio::test(start_paused = true)]
async fn test_window_trigger_collects_late_loads() {
    let repo = user_repo(1..=3);
    let loader = Loader::builder(repo.clone())
        .with_trigger(DispatchTrigger::Window(Duration::from_millis(5)))
        .build()
        .expect("Failed to build loader");

    let first = loader.load(1);
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = loader.load(2);

    assert_eq!(first.await, Ok(user(1)));
    assert_eq!(second.await, Ok(user(2)));
    assert_eq!(repo.batches(), vec![vec![1, 2]]);
}

/// Test 13: Config File
///
/// A serialized LoaderConfig drives the builder.
#[tokio::test]
async fn test_loader_from_serialized_config() {
    let config: LoaderConfig = serde_json::from_str(
        r#"{"max_batch_size": 2, "trigger": "yield", "name": "users"}"#,
    )
    .expect("Failed to parse config");

    let repo = user_repo(1..=3);
    let loader = Loader::builder(repo.clone())
        .with_config(config)
        .build()
        .expect("Failed to build loader");

    assert_eq!(loader.config().name.as_deref(), Some("users"));
    loader.load_all([1, 2, 3]).await;
    assert_eq!(repo.batches(), vec![vec![1, 2], vec![3]]);
}

/// Test 14: Multi-Threaded Concurrency
///
/// Many tasks on a multi-threaded runtime share one loader. Each key is
/// fetched exactly once no matter how the loads interleave.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_fetch_each_key_once() {
    let repo = user_repo(0..16);
    let loader = Loader::builder(repo.clone())
        .with_trigger(DispatchTrigger::Window(Duration::from_millis(2)))
        .build()
        .expect("Failed to build loader");

    let handles: Vec<_> = (0..64u64)
        .map(|task| {
            let loader = loader.clone();
            tokio::spawn(async move {
                let ids: Vec<u64> = (0..4).map(|i| (task + i * 5) % 16).collect();
                let results = loader.load_all(ids.clone()).await;
                for (id, result) in ids.into_iter().zip(results) {
                    assert_eq!(result, Ok(user(id)));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("Task panicked");
    }

    let mut fetched: Vec<u64> = repo.batches().into_iter().flatten().collect();
    fetched.sort_unstable();
    assert_eq!(fetched, (0..16).collect::<Vec<_>>());
}

/// Test 15: Scope Teardown
///
/// Dropping the last loader handle cancels loads still in flight.
#[tokio::test]
async fn test_dropping_loader_cancels_in_flight_loads() {
    let repo = user_repo(1..=2).with_latency(Duration::from_secs(60));
    let loader = Loader::new(repo.clone()).expect("Failed to build loader");

    let in_flight = tokio::spawn(loader.load(1));
    while repo.batch_count() == 0 {
        tokio::task::yield_now().await;
    }

    drop(loader);
    assert_eq!(
        in_flight.await.expect("Task panicked"),
        Err(Error::ScopeCancelled)
    );
}

/// Test 16: Explicit Cancel
#[tokio::test]
async fn test_cancel_settles_pending_and_later_loads() {
    let repo = user_repo(1..=2);
    let loader = Loader::builder(repo.clone())
        .with_trigger(DispatchTrigger::Manual)
        .build()
        .expect("Failed to build loader");

    let settled = {
        let slots = loader.load_many([1]);
        loader.dispatch();
        futures::future::join_all(slots).await
    };
    assert_eq!(settled, vec![Ok(user(1))]);

    let pending = loader.load(2);
    let clone = loader.clone();
    clone.cancel();

    assert_eq!(pending.await, Err(Error::ScopeCancelled));
    assert_eq!(loader.load(3).await, Err(Error::ScopeCancelled));
    assert!(loader.is_cancelled());
    assert_eq!(repo.batches(), vec![vec![1]]);
}

/// Test 17: Default Trigger On A Multi-Threaded Runtime
///
/// Loads issued from the test body while trigger tasks run on worker
/// threads. The batch stays open until a caller starts waiting, so slow
/// synchronous issuing still produces one fetch.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_default_trigger_waits_for_caller_on_multi_thread() {
    let repo = user_repo(0..50);
    let loader = Loader::new(repo.clone()).expect("Failed to build loader");

    let slots: Vec<_> = (0..50u64)
        .map(|id| {
            let slot = loader.load(id);
            std::thread::sleep(Duration::from_micros(200));
            slot
        })
        .collect();
    let results = futures::future::join_all(slots).await;

    for (id, result) in (0..50u64).zip(results) {
        assert_eq!(result, Ok(user(id)));
    }
    assert_eq!(repo.batches(), vec![(0..50).collect::<Vec<_>>()]);

    let first = loader.load(60);
    let second = loader.load(61);
    let third = loader.load(60);
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(first.await, Err(Error::NotFound("60".to_string())));
    assert_eq!(second.await, Err(Error::NotFound("61".to_string())));
    assert_eq!(third.await, Err(Error::NotFound("60".to_string())));
    assert_eq!(repo.batch_count(), 2);
    assert_eq!(repo.batches()[1], vec![60, 61]);
}

/// Test 18: Caching Disabled Joins In-Flight Loads
///
/// A load for a key that is dispatched but not yet settled shares that
/// fetch. Once it settles the key is forgotten.
#[tokio::test(start_paused = true)]
async fn test_caching_disabled_joins_in_flight_load() {
    let repo = user_repo(1..=2).with_latency(Duration::from_millis(50));
    let loader = Loader::builder(repo.clone())
        .with_caching(false)
        .build()
        .expect("Failed to build loader");

    let first = tokio::spawn(loader.load(1));
    while repo.batch_count() == 0 {
        tokio::task::yield_now().await;
    }
    let second = loader.load(1);

    assert_eq!(first.await.expect("Task panicked"), Ok(user(1)));
    assert_eq!(second.await, Ok(user(1)));
    assert_eq!(repo.batches(), vec![vec![1]]);
    assert_eq!(loader.stats().cached_entries, 0);

    assert_eq!(loader.load(1).await, Ok(user(1)));
    assert_eq!(repo.batches(), vec![vec![1], vec![1]]);
}
