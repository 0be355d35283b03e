use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fireledger::application::{MutationCoordinator, Notices};
use fireledger::cache::{
    CacheConfig, CacheKey, CacheStore, CacheTrigger, EventKind, EventQueue, Filters, FnLoader,
    InvalidateOptions, ResourceLoader,
};
use fireledger::domain::types::{ResourceKind, Scope};
use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;

fn loader(calls: Arc<AtomicUsize>) -> Arc<dyn ResourceLoader> {
    Arc::new(FnLoader::new(move |_key: CacheKey| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(json!([]))
        }
    }))
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Miss, fetch, dedup, hit
    let config = CacheConfig {
        idle_entry_limit: 1,
        ..Default::default()
    };
    let store = CacheStore::new(&config);
    let calls = Arc::new(AtomicUsize::new(0));
    let assets = CacheKey::new(ResourceKind::Assets, Scope::Personal, Filters::new());
    assert!(store.get(&assets).is_none());
    let (first, second) = tokio::join!(
        store.fetch(&assets, loader(calls.clone())),
        store.fetch(&assets, loader(calls.clone())),
    );
    assert!(first.is_ok() && second.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(store.get(&assets).is_some());

    // Idle trim and invalidation evictions
    let debts = CacheKey::new(ResourceKind::Debts, Scope::Personal, Filters::new());
    store
        .fetch(&debts, loader(calls.clone()))
        .await
        .expect("debts");
    store.invalidate(|_| true, InvalidateOptions::default());

    // Response for an entry invalidated mid-flight
    let ledgers = CacheKey::shared(ResourceKind::Ledgers, Filters::new());
    let pending = store.fetch(&ledgers, loader(calls.clone()));
    let invalidate = async {
        store.invalidate(|key| key == &ledgers, InvalidateOptions::default());
    };
    let (result, ()) = tokio::join!(pending, invalidate);
    assert!(result.is_ok());

    // Event queue length + drop metrics
    let queue = Arc::new(EventQueue::new_with_limit(1));
    queue.publish(EventKind::DebtChanged);
    queue.publish(EventKind::CategoryChanged);
    let _ = queue.drain(1);

    // Consumer latency and mutation outcome
    let trigger = Arc::new(CacheTrigger::for_store(
        CacheConfig::default(),
        CacheStore::new(&CacheConfig::default()),
    ));
    let mutations = MutationCoordinator::new(trigger, Notices::new(), None);
    mutations
        .perform(EventKind::PreferencesUpdated, &"currency", || async {
            Ok::<_, String>(())
        })
        .await
        .expect("mutation");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "fireledger_cache_hit_total",
        "fireledger_cache_miss_total",
        "fireledger_cache_fetch_total",
        "fireledger_cache_dedup_total",
        "fireledger_cache_stale_discard_total",
        "fireledger_cache_evict_total",
        "fireledger_cache_event_queue_len",
        "fireledger_cache_event_dropped_total",
        "fireledger_cache_consume_ms",
        "fireledger_mutation_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
