//! Invalidation plan generation.
//!
//! Merges a batch of cache events into the exact set of cache keys that must
//! be invalidated. The table in [`targets_for`] is the single place that says
//! which mutation touches which resource kind.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::domain::types::{ResourceKind, Scope};

use super::events::{CacheEvent, EventKind};
use super::keys::CacheKey;

/// One invalidation command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    /// Every key of this kind.
    Kind(ResourceKind),
    /// Keys of this kind that belong to one ledger, plus keys of the kind
    /// that are not filtered by ledger at all.
    Ledger {
        kind: ResourceKind,
        ledger_id: String,
    },
}

impl Target {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Target::Kind(kind) | Target::Ledger { kind, .. } => *kind,
        }
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            Target::Kind(kind) => key.kind() == *kind,
            Target::Ledger { kind, ledger_id } => {
                key.kind() == *kind
                    && key
                        .filters()
                        .get_str("ledger_id")
                        .is_none_or(|id| id == ledger_id)
            }
        }
    }
}

/// Static invalidation set declared for each event kind.
pub fn targets_for(kind: &EventKind) -> Vec<Target> {
    use ResourceKind as R;

    let ledger = |kind: ResourceKind, ledger_id: &str| Target::Ledger {
        kind,
        ledger_id: ledger_id.to_string(),
    };

    match kind {
        EventKind::LedgerCreated => vec![Target::Kind(R::Ledgers)],
        EventKind::LedgerUpserted { ledger_id } => {
            vec![Target::Kind(R::Ledgers), ledger(R::Ledger, ledger_id)]
        }
        EventKind::LedgerDeleted { ledger_id } => vec![
            Target::Kind(R::Ledgers),
            ledger(R::Ledger, ledger_id),
            ledger(R::Expenses, ledger_id),
            ledger(R::ExpenseStats, ledger_id),
        ],
        EventKind::ExpenseChanged { ledger_id } => vec![
            ledger(R::Expenses, ledger_id),
            ledger(R::ExpenseStats, ledger_id),
            ledger(R::Ledger, ledger_id),
        ],
        EventKind::AssetCreated | EventKind::AssetUpserted { .. } => {
            vec![Target::Kind(R::Assets), Target::Kind(R::AssetSummary)]
        }
        EventKind::AssetDeleted { .. } => vec![
            Target::Kind(R::Assets),
            Target::Kind(R::AssetSummary),
            Target::Kind(R::Flows),
            Target::Kind(R::FlowStats),
        ],
        EventKind::FlowChanged { .. } => {
            vec![Target::Kind(R::Flows), Target::Kind(R::FlowStats)]
        }
        EventKind::DebtChanged => vec![Target::Kind(R::Debts), Target::Kind(R::AssetSummary)],
        EventKind::CategoryChanged => vec![
            Target::Kind(R::Categories),
            Target::Kind(R::Flows),
            Target::Kind(R::FlowStats),
        ],
        EventKind::FamilyChanged => vec![Target::Kind(R::Family)],
        EventKind::PreferencesUpdated => vec![Target::Kind(R::Preferences)],
        EventKind::ScopeSwitched { .. } => Vec::new(),
    }
}

/// Commands to execute for cache consistency.
#[derive(Debug, Default)]
pub struct InvalidationPlan {
    /// Scope to re-target scoped entries to; the latest switch in the batch.
    pub retarget: Option<Scope>,
    /// Keys to invalidate and revalidate.
    pub targets: BTreeSet<Target>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retarget = self.retarget.map_or("none", Scope::as_str);
        write!(
            f,
            "InvalidationPlan {{ retarget: {}, targets: {} }}",
            retarget,
            self.targets.len()
        )
    }
}

impl InvalidationPlan {
    /// Merge multiple events into one plan.
    ///
    /// - Deduplicates by event ID
    /// - Keeps only the latest scope switch (by epoch)
    /// - Unions the declared invalidation sets of every mutation event
    pub fn from_events(events: Vec<CacheEvent>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();
        let mut latest_switch: Option<(u64, Scope)> = None;

        for event in events.into_iter().filter(|e| seen_ids.insert(e.id)) {
            if let EventKind::ScopeSwitched { to, .. } = event.kind {
                if latest_switch.is_none_or(|(epoch, _)| event.epoch > epoch) {
                    latest_switch = Some((event.epoch, to));
                }
                continue;
            }
            plan.targets.extend(targets_for(&event.kind));
        }

        plan.retarget = latest_switch.map(|(_, scope)| scope);
        plan
    }

    /// Whether `key` is covered by any invalidation target.
    pub fn matches(&self, key: &CacheKey) -> bool {
        self.targets.iter().any(|target| target.matches(key))
    }

    pub fn is_empty(&self) -> bool {
        self.retarget.is_none() && self.targets.is_empty()
    }
}
