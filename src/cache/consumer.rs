//! Cache consumer for executing invalidation plans.
//!
//! Consumes events from the queue and applies them to the keyed store.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{info, instrument};
use uuid::Uuid;

use super::config::CacheConfig;
use super::events::{CacheEvent, EventKind, EventQueue};
use super::planner::InvalidationPlan;
use super::store::{CacheStore, InvalidateOptions};

const METRIC_CACHE_CONSUME_MS: &str = "fireledger_cache_consume_ms";

/// What one consumption pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumeReport {
    pub events: usize,
    pub evicted: usize,
    pub revalidating: usize,
}

/// Cache consumer that processes events and maintains cache consistency.
///
/// The consumer:
/// 1. Drains events from the queue
/// 2. Merges them into an invalidation plan
/// 3. Re-targets scoped entries if the scope switched, then invalidates and
///    revalidates the declared targets
pub struct CacheConsumer {
    config: CacheConfig,
    store: CacheStore,
    queue: Arc<EventQueue>,
}

impl CacheConsumer {
    pub fn new(config: CacheConfig, store: CacheStore, queue: Arc<EventQueue>) -> Self {
        Self {
            config,
            store,
            queue,
        }
    }

    /// Consume pending events and execute the plan.
    ///
    /// Returns `None` when the queue was empty.
    #[instrument(skip(self))]
    pub fn consume(&self) -> Option<ConsumeReport> {
        let events = self
            .queue
            .drain(self.config.consume_batch_limit_non_zero().get());
        if events.is_empty() {
            return None;
        }
        Some(self.apply(events))
    }

    /// Apply one event immediately, without queueing or batching.
    #[instrument(skip(self))]
    pub fn apply_now(&self, kind: EventKind) -> ConsumeReport {
        let event = CacheEvent::new(kind, self.queue.next_epoch());
        self.apply(vec![event])
    }

    fn apply(&self, events: Vec<CacheEvent>) -> ConsumeReport {
        let consume_started_at = Instant::now();
        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let plan = InvalidationPlan::from_events(events);

        info!(
            event_count,
            event_ids = ?event_ids,
            plan = %plan,
            "Cache consumption starting"
        );

        let mut report = ConsumeReport {
            events: event_count,
            ..Default::default()
        };

        // Phase 1: scope switch, so revalidation below already hits the new scope
        if let Some(scope) = plan.retarget {
            let retarget = self.store.retarget_scope(scope);
            report.evicted += retarget.evicted.len();
            report.revalidating += retarget.fetching.len();
        }

        // Phase 2: declared invalidation sets
        if !plan.targets.is_empty() {
            let invalidation = self
                .store
                .invalidate(|key| plan.matches(key), InvalidateOptions::revalidate());
            report.evicted += invalidation.evicted.len();
            report.revalidating += invalidation.revalidating.len();
        }

        info!(
            event_count,
            evicted = report.evicted,
            revalidating = report.revalidating,
            "Cache consumption complete"
        );

        histogram!(METRIC_CACHE_CONSUME_MS)
            .record(consume_started_at.elapsed().as_secs_f64() * 1000.0);

        report
    }

    /// Keep consuming until the queue is empty.
    pub fn consume_all(&self) -> ConsumeReport {
        let mut total = ConsumeReport::default();
        while let Some(report) = self.consume() {
            total.events += report.events;
            total.evicted += report.evicted;
            total.revalidating += report.revalidating;
        }
        total
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::cache::keys::{CacheKey, Filters};
    use crate::cache::loader::{FnLoader, ResourceLoader};
    use crate::cache::store::Listener;
    use crate::domain::types::{ResourceKind, Scope};

    fn create_consumer(config: CacheConfig) -> CacheConsumer {
        let store = CacheStore::new(&config);
        let queue = Arc::new(EventQueue::new());
        CacheConsumer::new(config, store, queue)
    }

    fn loader(calls: Arc<AtomicUsize>) -> Arc<dyn ResourceLoader> {
        Arc::new(FnLoader::new(move |_key| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!([]))
            }
        }))
    }

    fn noop() -> Listener {
        Arc::new(|_key: &CacheKey| {})
    }

    #[test]
    fn consume_empty_queue_returns_none() {
        let consumer = create_consumer(CacheConfig::default());
        assert!(consumer.consume().is_none());
    }

    #[test]
    fn consume_respects_batch_limit() {
        let consumer = create_consumer(CacheConfig {
            consume_batch_limit: 2,
            ..Default::default()
        });

        for _ in 0..5 {
            consumer.queue.publish(EventKind::DebtChanged);
        }

        assert_eq!(consumer.queue.len(), 5);
        consumer.consume();
        assert_eq!(consumer.queue.len(), 3);

        let rest = consumer.consume_all();
        assert_eq!(rest.events, 3);
        assert!(consumer.queue.is_empty());
    }

    #[tokio::test]
    async fn flow_change_revalidates_flows_and_leaves_ledgers() {
        let consumer = create_consumer(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let flows = CacheKey::new(ResourceKind::Flows, Scope::Personal, Filters::new());
        let ledgers = CacheKey::shared(ResourceKind::Ledgers, Filters::new());
        let _flows_sub = consumer.store.subscribe(&flows, noop());
        let _ledgers_sub = consumer.store.subscribe(&ledgers, noop());
        consumer
            .store
            .fetch(&flows, loader(calls.clone()))
            .await
            .expect("flows");
        consumer
            .store
            .fetch(&ledgers, loader(calls.clone()))
            .await
            .expect("ledgers");

        consumer.queue.publish(EventKind::FlowChanged {
            linked_asset_id: None,
        });
        let report = consumer.consume().expect("report");
        consumer.store.settled(&flows).await;

        assert_eq!(report.revalidating, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!consumer.store.get(&ledgers).expect("ledgers").stale);
    }

    #[tokio::test]
    async fn scope_switch_is_applied_before_targets() {
        let consumer = create_consumer(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let flows = CacheKey::new(ResourceKind::Flows, Scope::Personal, Filters::new());
        let _sub = consumer.store.subscribe(&flows, noop());
        consumer
            .store
            .fetch(&flows, loader(calls.clone()))
            .await
            .expect("flows");

        consumer.queue.publish(EventKind::ScopeSwitched {
            from: Scope::Personal,
            to: Scope::Family,
        });
        consumer.queue.publish(EventKind::FlowChanged {
            linked_asset_id: None,
        });
        consumer.consume();

        let family = flows.with_scope(Scope::Family);
        consumer.store.settled(&family).await;
        assert!(!consumer.store.contains(&flows));
        assert!(consumer.store.get(&family).expect("family").data.is_some());
    }

    #[tokio::test]
    async fn apply_now_bypasses_the_queue() {
        let consumer = create_consumer(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let debts = CacheKey::new(ResourceKind::Debts, Scope::Personal, Filters::new());
        let _sub = consumer.store.subscribe(&debts, noop());
        consumer
            .store
            .fetch(&debts, loader(calls.clone()))
            .await
            .expect("debts");

        let report = consumer.apply_now(EventKind::DebtChanged);
        consumer.store.settled(&debts).await;

        assert_eq!(report.events, 1);
        assert_eq!(report.revalidating, 1);
        assert!(consumer.queue.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
