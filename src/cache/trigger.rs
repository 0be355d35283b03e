//! Cache trigger service.
//!
//! Publishing facade used by the mutation coordinator and the scope
//! controller. Events are consumed right after they are published, so the
//! invalidation always runs after the write that caused it has completed.
//! With the event queue disabled every event is applied on its own as soon
//! as it is published.

use std::sync::Arc;

use tracing::debug;

use crate::domain::types::Scope;

use super::config::CacheConfig;
use super::consumer::{CacheConsumer, ConsumeReport};
use super::events::{EventKind, EventQueue};
use super::store::CacheStore;

pub struct CacheTrigger {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    consumer: Arc<CacheConsumer>,
}

impl CacheTrigger {
    pub fn new(config: CacheConfig, queue: Arc<EventQueue>, consumer: Arc<CacheConsumer>) -> Self {
        Self {
            config,
            queue,
            consumer,
        }
    }

    /// Wire a queue and consumer around `store`.
    pub fn for_store(config: CacheConfig, store: CacheStore) -> Self {
        let queue = Arc::new(EventQueue::new_with_limit(
            config.event_queue_limit_non_zero().get(),
        ));
        let consumer = Arc::new(CacheConsumer::new(config.clone(), store, queue.clone()));
        Self::new(config, queue, consumer)
    }

    /// Publish an event and optionally consume immediately.
    ///
    /// Returns `None` only when the event was queued for a later pass.
    pub fn trigger(&self, kind: EventKind, consume_now: bool) -> Option<ConsumeReport> {
        if !self.config.is_enabled() {
            debug!(event_kind = kind.label(), "Event queue disabled; applying directly");
            return Some(self.consumer.apply_now(kind));
        }

        self.queue.publish(kind);

        if consume_now {
            return Some(self.consumer.consume_all());
        }
        None
    }

    /// A successful mutation: invalidate its declared targets.
    pub fn mutation_applied(&self, kind: EventKind) -> Option<ConsumeReport> {
        self.trigger(kind, true)
    }

    /// The active scope changed: re-target every scoped entry.
    pub fn scope_switched(&self, from: Scope, to: Scope) -> Option<ConsumeReport> {
        self.trigger(EventKind::ScopeSwitched { from, to }, true)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn consumer(&self) -> &Arc<CacheConsumer> {
        &self.consumer
    }

    pub fn store(&self) -> &CacheStore {
        self.consumer.store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_trigger(config: CacheConfig) -> CacheTrigger {
        let store = CacheStore::new(&config);
        CacheTrigger::for_store(config, store)
    }

    #[test]
    fn trigger_publishes_event() {
        let trigger = create_trigger(CacheConfig::default());

        assert!(trigger.queue.is_empty());
        trigger.trigger(EventKind::PreferencesUpdated, false);
        assert_eq!(trigger.queue.len(), 1);
    }

    #[test]
    fn disabled_queue_still_applies_events() {
        let trigger = create_trigger(CacheConfig {
            enabled: false,
            ..Default::default()
        });

        let report = trigger
            .mutation_applied(EventKind::DebtChanged)
            .expect("applied");
        assert_eq!(report.events, 1);
        assert!(trigger.queue.is_empty());

        assert!(trigger.trigger(EventKind::CategoryChanged, false).is_some());
        assert!(trigger.queue.is_empty());

        trigger.scope_switched(Scope::Personal, Scope::Family);
        assert_eq!(trigger.store().active_scope(), Some(Scope::Family));
    }

    #[test]
    fn trigger_consumes_immediately_when_requested() {
        let trigger = create_trigger(CacheConfig::default());

        let report = trigger
            .scope_switched(Scope::Personal, Scope::Family)
            .expect("consumed");
        assert_eq!(report.events, 1);
        assert!(trigger.queue.is_empty());
        assert_eq!(trigger.store().active_scope(), Some(Scope::Family));
    }
}
