//! Integration Tests for the Cache Manager
//!
//! Exercises loading, deduplication and persistence through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use resilient_cache::{
    cache::StoreConfig, CacheError, CacheManager, CacheStore, JsonFileStore, LoadOptions,
    MemoryBackingStore, RetryPolicy, SetOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: u32,
    name: String,
}

fn manager_over(backing: Arc<MemoryBackingStore>) -> CacheManager {
    let store = CacheStore::new(backing, StoreConfig::default());
    CacheManager::new(Arc::new(store))
}

// == Deduplication ==

#[tokio::test]
async fn test_concurrent_misses_run_loader_once() {
    let manager = manager_over(Arc::new(MemoryBackingStore::new()));
    let calls = Arc::new(AtomicUsize::new(0));

    let loads = (0..10).map(|_| {
        let calls = calls.clone();
        manager.get_or_load(
            "profile:7",
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(Profile {
                        id: 7,
                        name: "Ada".to_string(),
                    })
                }
            },
            LoadOptions::default(),
        )
    });

    let results: Vec<Result<Profile, CacheError>> = join_all(loads).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap().name, "Ada");
    }
    assert_eq!(manager.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_misses_run_loader_once() {
    let manager = Arc::new(manager_over(Arc::new(MemoryBackingStore::new())));
    let calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let manager = manager.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                manager
                    .get_or_load(
                        "profile:9",
                        move || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            async {
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                Ok(Profile {
                                    id: 9,
                                    name: "Grace".to_string(),
                                })
                            }
                        },
                        LoadOptions::default(),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        let profile: Profile = handle.await.unwrap().unwrap();
        assert_eq!(profile.id, 9);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.in_flight(), 0);
}

#[tokio::test]
async fn test_concurrent_failure_reaches_every_caller() {
    let manager = manager_over(Arc::new(MemoryBackingStore::new()));
    let calls = Arc::new(AtomicUsize::new(0));

    let loads = (0..5).map(|_| {
        let calls = calls.clone();
        manager.get_or_load::<Profile, _, _>(
            "profile:8",
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Err(CacheError::Loader("upstream rejected".into()))
                }
            },
            LoadOptions::default(),
        )
    });

    for result in join_all(loads).await {
        assert_eq!(
            result.unwrap_err(),
            CacheError::Loader("upstream rejected".into())
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(manager.store().get("profile:8").await.is_none());
}

// == Retry ==

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_then_cached() {
    let manager = manager_over(Arc::new(MemoryBackingStore::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1));

    let counter = calls.clone();
    let loaded: u32 = manager
        .get_or_load(
            "flaky",
            move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(CacheError::Network("connection reset".into()))
                    } else {
                        Ok(99)
                    }
                }
            },
            LoadOptions::default().with_retry(policy),
        )
        .await
        .unwrap();

    assert_eq!(loaded, 99);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(manager.store().get("flaky").await, Some(json!(99)));
}

// == Batch ==

#[tokio::test]
async fn test_load_many_limits_and_orders() {
    let manager = manager_over(Arc::new(MemoryBackingStore::new()));
    manager
        .store()
        .set("user:2", json!("cached"), SetOptions::default())
        .unwrap();

    let keys: Vec<String> = (1..=4).map(|i| format!("user:{}", i)).collect();
    let results = manager
        .load_many(
            keys,
            |key: String| async move { Ok::<_, CacheError>(format!("loaded {}", key)) },
            LoadOptions::default(),
            Some(2),
        )
        .await;

    let values: Vec<String> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(
        values,
        vec!["loaded user:1", "cached", "loaded user:3", "loaded user:4"]
    );
}

// == Persistence ==

#[tokio::test]
async fn test_json_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");

    {
        let store = CacheStore::new(Arc::new(JsonFileStore::new(&path)), StoreConfig::default());
        store
            .set("job:42", json!({"title": "Engineer"}), SetOptions::default())
            .unwrap();
        store.flush().await;
    }

    let store = CacheStore::new(Arc::new(JsonFileStore::new(&path)), StoreConfig::default());
    assert!(store.is_empty());
    assert_eq!(store.get("job:42").await, Some(json!({"title": "Engineer"})));
    assert_eq!(store.size(), 1);
    assert_eq!(store.keys().await, vec!["job:42".to_string()]);
}

#[tokio::test]
async fn test_expired_entry_is_gone_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");

    {
        let store = CacheStore::new(Arc::new(JsonFileStore::new(&path)), StoreConfig::default());
        store
            .set("short", json!(1), SetOptions::ttl(Duration::from_millis(30)))
            .unwrap();
        store.flush().await;
    }

    tokio::time::sleep(Duration::from_millis(80)).await;

    let backing = Arc::new(JsonFileStore::new(&path));
    let store = CacheStore::new(backing.clone(), StoreConfig::default());
    assert!(store.get("short").await.is_none());
    assert!(resilient_cache::PersistentStore::get(backing.as_ref(), "cache:short")
        .await
        .unwrap()
        .is_none());
}
