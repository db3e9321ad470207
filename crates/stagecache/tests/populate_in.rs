// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for distributed single-flight population.
//!
//! Several caches over clones of one `MemoryStore` stand in for several processes
//! sharing one store.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::join_all;
use parking_lot::Mutex;
use stagecache::{BoxError, Cache, DynamicStage, ErrorKind, ExpireOptions, PopulateInOptions, facade};
use stagecache_store::{
    LeaseToken, Store,
    testing::{MemoryStore, StoreOp},
};

type TestCache = Cache<String, DynamicStage<String, MemoryStore>>;

/// A loader that counts calls, takes `delay` and then yields `"value of <key>"`.
fn counting_loader(
    calls: &Arc<AtomicUsize>,
    delay: Duration,
) -> impl Fn(String) -> futures::future::BoxFuture<'static, Result<String, BoxError>> + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    move |key: String| {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(format!("value of {key}"))
        })
    }
}

/// A loader that counts calls and always fails.
fn failing_loader(
    calls: &Arc<AtomicUsize>,
) -> impl Fn(String) -> futures::future::BoxFuture<'static, Result<String, BoxError>> + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    move |_key: String| {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err::<String, BoxError>("backend down".into()) })
    }
}

fn process(store: &MemoryStore, calls: &Arc<AtomicUsize>, options: PopulateInOptions) -> TestCache {
    Cache::builder::<String, _>(store.clone(), "n")
        .populate(counting_loader(calls, Duration::from_millis(100)))
        .populate_in(options)
        .build()
}

fn names(cache: &TestCache) -> Arc<Mutex<Vec<&'static str>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    cache.on(move |event| sink.lock().push(event.name()));
    seen
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_compute_once() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = PopulateInOptions::new(Duration::from_secs(10));
    let processes: Vec<_> = (0..8).map(|_| process(&store, &calls, options)).collect();

    let results = join_all(processes.iter().map(|cache| cache.get("k"))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap(), Some("value of k".to_owned()));
    }
    assert!(!store.is_leased("n:k"));
    assert_eq!(store.prop("n:k", facade::POPULATE_IN_ERROR_COUNT), None);
}

#[tokio::test(start_paused = true)]
async fn winner_and_waiter_event_sequences() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = PopulateInOptions::new(Duration::from_secs(10));
    let winner = process(&store, &calls, options);
    let waiter = process(&store, &calls, options);
    let winner_seen = names(&winner);
    let waiter_seen = names(&waiter);

    let (a, b) = tokio::join!(winner.get("k"), waiter.get("k"));

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(
        *winner_seen.lock(),
        [
            "get:before",
            "populateIn:before",
            "populate:before",
            "populate:after",
            "populateIn:after",
            "get:after",
            "get:hit",
        ]
    );
    let waiter_seen = waiter_seen.lock();
    assert_eq!(waiter_seen[..3], ["get:before", "populateIn:before", "populateIn:pause"]);
    assert_eq!(waiter_seen[waiter_seen.len() - 3..], ["populateIn:after", "get:after", "get:hit"]);
    assert!(!waiter_seen.contains(&"populate:before"));
}

#[tokio::test(start_paused = true)]
async fn waiter_wakes_on_value_write_before_backoff_elapses() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    // One long backoff step: only the store notification can wake the waiter in time.
    let options = PopulateInOptions::new(Duration::from_secs(60))
        .backoff(stagecache::Backoff::new(Duration::from_secs(30), Duration::from_secs(30)));
    let winner = process(&store, &calls, options);
    let waiter = process(&store, &calls, options);

    let start = tokio::time::Instant::now();
    let (a, b) = tokio::join!(winner.get("k"), waiter.get("k"));

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(start.elapsed(), Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn peer_write_satisfies_a_paused_waiter() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = process(&store, &calls, PopulateInOptions::new(Duration::from_secs(10)));
    let peer = Cache::builder::<String, _>(store.clone(), "n").build();
    // A peer process is populating and holds the lease.
    let token = store.acquire_lease("n:k", Duration::from_secs(30)).await.unwrap().unwrap();

    let (value, ()) = tokio::join!(cache.get("k"), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        peer.set("k", "from peer".to_owned()).await.unwrap();
        store.release_lease("n:k", token).await.unwrap();
    });

    assert_eq!(value.unwrap(), Some("from peer".to_owned()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn crashed_holder_stalls_for_at_most_its_lease_ttl() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = process(&store, &calls, PopulateInOptions::new(Duration::from_secs(10)));
    let seen = names(&cache);
    // A process that took the lease and died.
    let _abandoned: LeaseToken = store.acquire_lease("n:k", Duration::from_secs(2)).await.unwrap().unwrap();

    let start = tokio::time::Instant::now();
    let value = cache.get("k").await.unwrap();

    assert_eq!(value, Some("value of k".to_owned()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(seen.lock().contains(&"populateIn:pause"));
}

#[tokio::test(start_paused = true)]
async fn lease_is_requested_with_the_configured_ttl() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = PopulateInOptions::new(Duration::from_secs(10)).lease_timeout(Duration::from_secs(3));
    let cache = process(&store, &calls, options);

    cache.get("k").await.unwrap();

    assert!(
        store
            .operations()
            .iter()
            .any(|op| matches!(op, StoreOp::AcquireLease { key, ttl } if key == "n:k" && *ttl == Duration::from_secs(3)))
    );
}

#[tokio::test(start_paused = true)]
async fn repeated_failures_hit_the_max_attempts_cutoff() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = Cache::builder::<String, _>(store.clone(), "n")
        .populate(failing_loader(&calls))
        .populate_in(PopulateInOptions::new(Duration::from_secs(60)).max_attempts(3))
        .build();
    let seen = names(&cache);

    let error = cache.get("k").await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::MaxAttempts);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        *seen.lock(),
        [
            "get:before",
            "populateIn:before",
            "populate:before",
            "populate:error",
            "populate:before",
            "populate:error",
            "populate:before",
            "populate:error",
            "populateIn:maxAttempts",
            "populateIn:error",
            "get:error",
        ]
    );
    assert_eq!(
        store.prop("n:k", facade::POPULATE_IN_ERROR_COUNT),
        Some(stagecache_store::StoreValue::Int(3))
    );
    assert!(!store.is_leased("n:k"));
}

#[tokio::test(start_paused = true)]
async fn cutoff_is_durable_across_processes() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = PopulateInOptions::new(Duration::from_secs(60)).max_attempts(3);
    let first = Cache::builder::<String, _>(store.clone(), "n")
        .populate(failing_loader(&calls))
        .populate_in(options)
        .build();
    first.get("k").await.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // A fresh process with a healthy loader still honors the stored count.
    let healthy = Arc::new(AtomicUsize::new(0));
    let second = process(&store, &healthy, options);
    let seen = names(&second);

    let error = second.get("k").await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::MaxAttempts);
    assert_eq!(healthy.load(Ordering::SeqCst), 0);
    assert_eq!(
        *seen.lock(),
        [
            "get:before",
            "populateIn:before",
            "populateIn:maxAttempts",
            "populateIn:error",
            "get:error",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn cutoff_cools_down_after_the_budget() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = PopulateInOptions::new(Duration::from_secs(60)).max_attempts(2);
    let failing = Cache::builder::<String, _>(store.clone(), "n")
        .populate(failing_loader(&calls))
        .populate_in(options)
        .build();
    failing.get("k").await.unwrap_err();

    tokio::time::advance(Duration::from_secs(61)).await;

    let healthy = Arc::new(AtomicUsize::new(0));
    let cache = process(&store, &healthy, options);
    assert_eq!(cache.get("k").await.unwrap(), Some("value of k".to_owned()));
    assert_eq!(healthy.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn success_resets_the_failure_count() {
    let store = MemoryStore::new();
    store.insert_prop("n:k", facade::POPULATE_IN_ERROR_COUNT, 2_i64);
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = process(&store, &calls, PopulateInOptions::new(Duration::from_secs(10)).max_attempts(3));

    assert_eq!(cache.get("k").await.unwrap(), Some("value of k".to_owned()));

    assert_eq!(store.prop("n:k", facade::POPULATE_IN_ERROR_COUNT), None);
}

#[tokio::test(start_paused = true)]
async fn budget_exhaustion_is_a_timeout() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = process(&store, &calls, PopulateInOptions::new(Duration::from_secs(1)));
    let seen = names(&cache);
    // Held by someone else for longer than the whole budget.
    store.acquire_lease("n:k", Duration::from_secs(30)).await.unwrap().unwrap();

    let start = tokio::time::Instant::now();
    let error = cache.get("k").await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Timeout);
    assert_eq!(start.elapsed(), Duration::from_secs(1));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let seen = seen.lock();
    assert_eq!(seen[seen.len() - 2..], ["populateIn:error", "get:error"]);
    assert!(!seen.contains(&"populateIn:maxAttempts"));
}

#[tokio::test(start_paused = true)]
async fn store_failure_is_not_retried() {
    let store = MemoryStore::new();
    store.fail_when(|op| matches!(op, StoreOp::AcquireLease { .. }));
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = process(&store, &calls, PopulateInOptions::new(Duration::from_secs(10)));
    let seen = names(&cache);

    let error = cache.get("k").await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Store);
    let attempts = store
        .operations()
        .iter()
        .filter(|op| matches!(op, StoreOp::AcquireLease { .. }))
        .count();
    assert_eq!(attempts, 1);
    assert_eq!(*seen.lock(), ["get:before", "populateIn:before", "populateIn:error", "get:error"]);
}

#[tokio::test(start_paused = true)]
async fn cached_value_skips_coordination() {
    let store = MemoryStore::new();
    store.insert_prop("n:k", facade::VALUE, "\"cached\"");
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = process(&store, &calls, PopulateInOptions::new(Duration::from_secs(10)));
    let seen = names(&cache);

    assert_eq!(cache.get("k").await.unwrap(), Some("cached".to_owned()));

    assert_eq!(*seen.lock(), ["get:before", "get:after", "get:hit"]);
    assert!(!store.operations().iter().any(|op| matches!(op, StoreOp::AcquireLease { .. })));
}

fn stale_after_ten_seconds(store: &MemoryStore, calls: &Arc<AtomicUsize>) -> TestCache {
    Cache::builder::<String, _>(store.clone(), "n")
        .expire(ExpireOptions::new().stale_in(Duration::from_secs(10)))
        .populate(counting_loader(calls, Duration::from_millis(100)))
        .populate_in(PopulateInOptions::new(Duration::from_secs(10)))
        .build()
}

#[tokio::test(start_paused = true)]
async fn stale_entry_is_refreshed_by_one_process() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let processes: Vec<_> = (0..4).map(|_| stale_after_ten_seconds(&store, &calls)).collect();
    processes[0].get("k").await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    let stamped = store.prop("n:k", facade::CREATED_AT);

    let results = join_all(processes.iter().map(|cache| cache.get("k"))).await;

    for result in results {
        assert_eq!(result.unwrap(), Some("value of k".to_owned()));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_ne!(store.prop("n:k", facade::CREATED_AT), stamped);
    assert!(!store.is_leased("n:k"));

    let seen = names(&processes[3]);
    processes[3].get("k").await.unwrap();
    assert_eq!(*seen.lock(), ["get:before", "get:after", "get:hit"]);
}

#[tokio::test(start_paused = true)]
async fn stale_refresh_defers_to_a_lease_holder() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = stale_after_ten_seconds(&store, &calls);
    cache.get("k").await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    let _held = store.acquire_lease("n:k", Duration::from_secs(30)).await.unwrap().unwrap();
    let seen = names(&cache);

    assert_eq!(cache.get("k").await.unwrap(), Some("value of k".to_owned()));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock(), ["get:before", "get:stale", "get:after", "get:hit"]);
}

#[tokio::test(start_paused = true)]
async fn stale_refresh_respects_the_cutoff() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = stale_after_ten_seconds(&store, &calls);
    cache.get("k").await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    store.insert_prop("n:k", facade::POPULATE_IN_ERROR_COUNT, 5_i64);

    assert_eq!(cache.get("k").await.unwrap(), Some("value of k".to_owned()));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.prop("n:k", facade::POPULATE_IN_CUTOFF_AT).is_some());
}

#[tokio::test(start_paused = true)]
async fn cutoff_never_evicts_later_writes() {
    let store = MemoryStore::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = Cache::builder::<String, _>(store.clone(), "n")
        .populate(failing_loader(&calls))
        .populate_in(PopulateInOptions::new(Duration::from_secs(60)).max_attempts(1))
        .build();
    assert_eq!(cache.get("k").await.unwrap_err().kind(), ErrorKind::MaxAttempts);

    cache.set("k", "manual".to_owned()).await.unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;

    assert_eq!(store.prop("n:k", facade::VALUE), Some(stagecache_store::StoreValue::from("\"manual\"")));
    assert_eq!(cache.get("k").await.unwrap(), Some("manual".to_owned()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!store.operations().iter().any(|op| matches!(op, StoreOp::Expire { .. })));
}

#[tokio::test(start_paused = true)]
async fn count_at_the_limit_without_a_mark_starts_the_cutoff() {
    let store = MemoryStore::new();
    store.insert_prop("n:k", facade::POPULATE_IN_ERROR_COUNT, 3_i64);
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = process(&store, &calls, PopulateInOptions::new(Duration::from_secs(60)).max_attempts(3));

    assert_eq!(cache.get("k").await.unwrap_err().kind(), ErrorKind::MaxAttempts);
    assert!(store.prop("n:k", facade::POPULATE_IN_CUTOFF_AT).is_some());

    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(cache.get("k").await.unwrap(), Some("value of k".to_owned()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.prop("n:k", facade::POPULATE_IN_CUTOFF_AT), None);
}
