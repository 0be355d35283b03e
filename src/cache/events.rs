//! Cache event system.
//!
//! Mutations and scope switches publish discrete events here; the consumer
//! turns batches of them into invalidation commands against the store.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::types::Scope;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_QUEUE_LEN: &str = "fireledger_cache_event_queue_len";
const METRIC_EVENT_DROPPED_TOTAL: &str = "fireledger_cache_event_dropped_total";

/// Monotonic epoch for ordering events.
///
/// Used to determine which scope switch is "latest" when a batch holds more
/// than one.
pub type Epoch = u64;

/// Cache event with idempotency and ordering support.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    /// Monotonic epoch for ordering within this process.
    pub epoch: Epoch,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Things that happened which cached data may depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    // Shared expense ledgers
    LedgerCreated,
    LedgerUpserted { ledger_id: String },
    LedgerDeleted { ledger_id: String },
    ExpenseChanged { ledger_id: String },

    // FIRE dashboard
    AssetCreated,
    AssetUpserted { asset_id: String },
    AssetDeleted { asset_id: String },
    FlowChanged { linked_asset_id: Option<String> },
    DebtChanged,
    CategoryChanged,

    // Account
    FamilyChanged,
    PreferencesUpdated,

    /// The active view scope changed.
    ScopeSwitched { from: Scope, to: Scope },
}

impl EventKind {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::LedgerCreated => "ledger_created",
            EventKind::LedgerUpserted { .. } => "ledger_upserted",
            EventKind::LedgerDeleted { .. } => "ledger_deleted",
            EventKind::ExpenseChanged { .. } => "expense_changed",
            EventKind::AssetCreated => "asset_created",
            EventKind::AssetUpserted { .. } => "asset_upserted",
            EventKind::AssetDeleted { .. } => "asset_deleted",
            EventKind::FlowChanged { .. } => "flow_changed",
            EventKind::DebtChanged => "debt_changed",
            EventKind::CategoryChanged => "category_changed",
            EventKind::FamilyChanged => "family_changed",
            EventKind::PreferencesUpdated => "preferences_updated",
            EventKind::ScopeSwitched { .. } => "scope_switched",
        }
    }
}

/// Bounded in-memory event queue.
///
/// On overflow the oldest pending event is dropped; a dropped mutation event
/// only costs freshness, and a dropped scope switch is always superseded by a
/// later one.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
    limit: usize,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::new_with_limit(usize::MAX)
    }

    pub fn new_with_limit(limit: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
            limit: limit.max(1),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Publish an event to the queue.
    pub fn publish(&self, kind: EventKind) {
        let epoch = self.next_epoch();
        let event = CacheEvent::new(kind, epoch);

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = event.kind.label(),
            "Cache event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        if queue.len() >= self.limit
            && let Some(dropped) = queue.pop_front()
        {
            counter!(METRIC_EVENT_DROPPED_TOTAL).increment(1);
            warn!(
                event_id = %dropped.id,
                event_kind = dropped.kind.label(),
                limit = self.limit,
                "Cache event queue full; dropped oldest event"
            );
        }
        queue.push_back(event);
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let events = queue.drain(..count).collect();
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        events
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
