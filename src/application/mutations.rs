//! Mutation coordinator.
//!
//! Runs create/update/delete calls and, only when they succeed, publishes the
//! matching cache event so exactly the declared resource kinds are
//! invalidated. Identical mutations already in flight are joined instead of
//! sent twice, and the side effects of a mutation run once no matter how many
//! callers joined it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheTrigger, EventKind, hash_value, mutex_lock};

use super::error::AppError;
use super::notices::{Notice, Notices};
use super::scope::ScopeController;

const SOURCE: &str = "application::mutations";
const METRIC_MUTATION_TOTAL: &str = "fireledger_mutation_total";

type Outcome = Result<Arc<dyn Any + Send + Sync>, String>;
type SharedMutation = Shared<BoxFuture<'static, Outcome>>;

struct Inner {
    trigger: Arc<CacheTrigger>,
    scope: Option<Arc<ScopeController>>,
    notices: Notices,
    in_flight: Mutex<HashMap<u64, SharedMutation>>,
}

#[derive(Clone)]
pub struct MutationCoordinator {
    inner: Arc<Inner>,
}

impl MutationCoordinator {
    /// `scope`, when given, has its membership revalidated after family
    /// mutations.
    pub fn new(
        trigger: Arc<CacheTrigger>,
        notices: Notices,
        scope: Option<Arc<ScopeController>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                trigger,
                scope,
                notices,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn notices(&self) -> &Notices {
        &self.inner.notices
    }

    /// Run `action` and, on success, invalidate what `event` declares.
    ///
    /// `payload` identifies the mutation for deduplication: while a call with
    /// the same event and payload is in flight, `action` is not invoked and
    /// the caller receives the in-flight call's outcome. A failure leaves the
    /// cache untouched and is returned as [`AppError::Mutation`]; nothing is
    /// retried. A payload that cannot be serialized is rejected before
    /// `action` runs.
    pub async fn perform<T, E, F, Fut>(
        &self,
        event: EventKind,
        payload: &impl Serialize,
        action: F,
    ) -> Result<T, AppError>
    where
        T: Clone + Send + Sync + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let label = event.label();
        let payload = serde_json::to_string(payload).map_err(|err| {
            AppError::validation(format!("mutation `{label}` payload is not serializable: {err}"))
        })?;
        let fingerprint = hash_value(&(&event, payload));

        let future = {
            let mut in_flight = mutex_lock(&self.inner.in_flight, SOURCE, "perform");
            match in_flight.get(&fingerprint) {
                Some(existing) => {
                    debug!(event_kind = label, fingerprint, "Joined in-flight mutation");
                    existing.clone()
                }
                None => {
                    let future = self.start(event, fingerprint, action());
                    in_flight.insert(fingerprint, future.clone());
                    // Finish the mutation even if every caller stops waiting.
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        handle.spawn(future.clone());
                    }
                    future
                }
            }
        };

        match future.await {
            Ok(value) => value.downcast::<T>().map(|value| (*value).clone()).map_err(|_| {
                AppError::unexpected(format!("mutation `{label}` result type mismatch"))
            }),
            Err(message) => Err(AppError::mutation(label, message)),
        }
    }

    fn start<T, E, Fut>(&self, event: EventKind, fingerprint: u64, action: Fut) -> SharedMutation
    where
        T: Send + Sync + 'static,
        E: Display + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        async move {
            let label = event.label();
            let outcome: Outcome = match action.await {
                Ok(value) => {
                    counter!(METRIC_MUTATION_TOTAL, "kind" => label, "outcome" => "ok").increment(1);
                    info!(event_kind = label, "Mutation succeeded");
                    inner.apply_success(&event).await;
                    Ok(Arc::new(value) as Arc<dyn Any + Send + Sync>)
                }
                Err(err) => {
                    counter!(METRIC_MUTATION_TOTAL, "kind" => label, "outcome" => "error")
                        .increment(1);
                    warn!(event_kind = label, error = %err, "Mutation failed; cache untouched");
                    Err(err.to_string())
                }
            };
            mutex_lock(&inner.in_flight, SOURCE, "settle").remove(&fingerprint);
            outcome
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn apply_success(&self, event: &EventKind) {
        self.trigger.mutation_applied(event.clone());

        match event {
            EventKind::FlowChanged {
                linked_asset_id: Some(asset_id),
            } => {
                let delivered = self.notices.emit(Notice::AdjustAccountBalance {
                    asset_id: asset_id.clone(),
                });
                debug!(asset_id = %asset_id, delivered, "Account balance notice emitted");
            }
            EventKind::FamilyChanged => {
                if let Some(scope) = &self.scope
                    && let Err(err) = scope.refresh_membership().await
                {
                    warn!(error = %err, "Membership revalidation after family change failed");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::cache::{
        CacheConfig, CacheKey, CacheStore, Filters, FnLoader, Listener, ResourceLoader,
    };
    use crate::domain::types::{ResourceKind, Scope};

    fn coordinator() -> (MutationCoordinator, CacheStore) {
        let config = CacheConfig::default();
        let store = CacheStore::new(&config);
        let trigger = Arc::new(CacheTrigger::for_store(config, store.clone()));
        (MutationCoordinator::new(trigger, Notices::new(), None), store)
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

    #[tokio::test]
    async fn failure_leaves_cache_untouched() {
        let (coordinator, store) = coordinator();
        let key = CacheKey::new(ResourceKind::Flows, Scope::Personal, Filters::new());
        let _sub = store.subscribe(&key, noop());
        store
            .fetch(&key, loader(Arc::new(AtomicUsize::new(0))))
            .await
            .expect("fetch");

        let result: Result<(), AppError> = coordinator
            .perform(
                EventKind::FlowChanged {
                    linked_asset_id: None,
                },
                &json!({"name": "salary"}),
                || async { Err::<(), _>("amount must be positive") },
            )
            .await;

        assert!(matches!(result, Err(AppError::Mutation { .. })));
        let entry = store.get(&key).expect("entry");
        assert!(!entry.stale);
        assert!(!entry.is_loading());
    }

    #[tokio::test]
    async fn linked_flow_notice_fires_once_for_joined_calls() {
        let (coordinator, _store) = coordinator();
        let mut notices = coordinator.notices().subscribe();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let event = EventKind::FlowChanged {
            linked_asset_id: Some("a1".to_string()),
        };
        let payload = json!({"name": "rent", "amount": 1200});

        let run = |coordinator: MutationCoordinator| {
            let calls = calls.clone();
            let gate = gate.clone();
            let event = event.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                coordinator
                    .perform(event, &payload, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok::<_, String>(7u32)
                    })
                    .await
            })
        };

        let first = run(coordinator.clone());
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = run(coordinator.clone());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        gate.notify_waiters();

        assert_eq!(first.await.expect("join").expect("first"), 7);
        assert_eq!(second.await.expect("join").expect("second"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            notices.recv().await.expect("notice"),
            Notice::AdjustAccountBalance {
                asset_id: "a1".to_string()
            }
        );
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_linked_flow_emits_no_notice() {
        let (coordinator, _store) = coordinator();
        let mut notices = coordinator.notices().subscribe();

        let result: Result<(), AppError> = coordinator
            .perform(
                EventKind::FlowChanged {
                    linked_asset_id: Some("a1".to_string()),
                },
                &"payload",
                || async { Err::<(), _>("server error") },
            )
            .await;

        assert!(result.is_err());
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn unserializable_payload_is_rejected_before_running() {
        let (coordinator, _store) = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        // JSON objects only take string keys.
        let payload: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);

        let action_calls = calls.clone();
        let result: Result<(), AppError> = coordinator
            .perform(EventKind::DebtChanged, &payload, move || async move {
                action_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sequential_identical_mutations_both_run() {
        let (coordinator, _store) = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            coordinator
                .perform(EventKind::DebtChanged, &"same", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                })
                .await
                .expect("mutation");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
