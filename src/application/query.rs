//! Query handles: the read side of the data layer.
//!
//! A [`Query`] binds a resource descriptor (kind + filters) to the keyed store
//! under the active scope. It subscribes to its key, loads through the shared
//! store (so identical queries share one request) and exposes the entry as a
//! typed [`QueryState`]. Failures are state, never panics or errors.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::debug;

use crate::cache::{
    CacheEntry, CacheKey, CacheStore, Filters, Listener, ResourceLoader, Subscription, mutex_lock,
};
use crate::domain::types::{ResourceKind, Scope};

const SOURCE: &str = "application::query";

/// Typed read view of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

/// Builds query handles that share one store, loader and scope.
#[derive(Clone)]
pub struct Queries {
    store: CacheStore,
    loader: Arc<dyn ResourceLoader>,
    scope: watch::Receiver<Scope>,
}

impl Queries {
    pub fn new(
        store: CacheStore,
        loader: Arc<dyn ResourceLoader>,
        scope: watch::Receiver<Scope>,
    ) -> Self {
        Self {
            store,
            loader,
            scope,
        }
    }

    pub fn query<T: DeserializeOwned>(&self, kind: ResourceKind, filters: Filters) -> Query<T> {
        Query::new(
            self.store.clone(),
            Arc::clone(&self.loader),
            self.scope.clone(),
            kind,
            filters,
        )
    }
}

struct Binding {
    filters: Filters,
    key: CacheKey,
    /// Bumped whenever the effective key changes.
    generation: u64,
    /// Generation of the last load this handle started.
    attempted: Option<u64>,
    subscription: Subscription,
}

struct Shared {
    kind: ResourceKind,
    store: CacheStore,
    loader: Arc<dyn ResourceLoader>,
    scope: watch::Receiver<Scope>,
    changes: Arc<watch::Sender<u64>>,
    binding: Mutex<Binding>,
}

/// Handle over one resource descriptor. Dropping it unsubscribes.
pub struct Query<T> {
    shared: Shared,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Query<T> {
    pub fn new(
        store: CacheStore,
        loader: Arc<dyn ResourceLoader>,
        scope: watch::Receiver<Scope>,
        kind: ResourceKind,
        filters: Filters,
    ) -> Self {
        let (changes, _) = watch::channel(0u64);
        let changes = Arc::new(changes);
        let key = CacheKey::new(kind, *scope.borrow(), filters.clone());
        let subscription = store.subscribe(&key, listener(&changes));
        Self {
            shared: Shared {
                kind,
                store,
                loader,
                scope,
                changes,
                binding: Mutex::new(Binding {
                    filters,
                    key,
                    generation: 0,
                    attempted: None,
                    subscription,
                }),
            },
            _marker: PhantomData,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.shared.kind
    }

    /// Key the handle currently reads.
    pub fn key(&self) -> CacheKey {
        self.rebind().0
    }

    pub fn generation(&self) -> u64 {
        mutex_lock(&self.shared.binding, SOURCE, "generation").generation
    }

    /// Receiver bumped on every state change of the bound entry.
    pub fn changed(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Point the binding at the key for the current filters and scope.
    fn rebind(&self) -> (CacheKey, u64) {
        let shared = &self.shared;
        let mut binding = mutex_lock(&shared.binding, SOURCE, "rebind");
        let desired = CacheKey::new(shared.kind, *shared.scope.borrow(), binding.filters.clone());
        if desired != binding.key {
            binding.generation += 1;
            // Scope re-targeting may already have moved the subscription.
            if binding.subscription.key().as_ref() != Some(&desired) {
                binding.subscription = shared.store.subscribe(&desired, listener(&shared.changes));
            }
            debug!(
                from = %binding.key,
                to = %desired,
                generation = binding.generation,
                "Query re-bound"
            );
            binding.key = desired;
        }
        (binding.key.clone(), binding.generation)
    }

    /// Bring the handle up to date: re-bind and load if the entry has no
    /// fresh data.
    ///
    /// An entry that failed is only retried once per key change; use
    /// [`Query::refetch`] to retry explicitly.
    pub async fn sync(&self) -> QueryState<T> {
        let (key, generation) = self.rebind();
        let entry = self.shared.store.get(&key);
        let first_attempt = {
            let binding = mutex_lock(&self.shared.binding, SOURCE, "sync");
            binding.attempted != Some(generation)
        };
        if needs_load(entry.as_ref(), first_attempt) {
            self.load(key, generation).await;
        }
        self.state()
    }

    /// Replace the filters and load the new key.
    pub async fn set_filters(&self, filters: Filters) -> QueryState<T> {
        mutex_lock(&self.shared.binding, SOURCE, "set_filters").filters = filters;
        self.sync().await
    }

    /// Load the current key again. Joins the in-flight request if there is
    /// one.
    pub async fn refetch(&self) -> QueryState<T> {
        let (key, generation) = self.rebind();
        self.load(key, generation).await;
        self.state()
    }

    async fn load(&self, key: CacheKey, generation: u64) {
        mutex_lock(&self.shared.binding, SOURCE, "load").attempted = Some(generation);
        let result = self
            .shared
            .store
            .fetch(&key, Arc::clone(&self.shared.loader))
            .await;
        if self.generation() != generation {
            debug!(
                cache_key = %key,
                generation,
                ok = result.is_ok(),
                "Discarded superseded query result"
            );
        }
    }

    /// Current state of the bound entry.
    pub fn state(&self) -> QueryState<T> {
        let (key, _) = self.rebind();
        match self.shared.store.get(&key) {
            Some(entry) => decode(&entry),
            None => QueryState::default(),
        }
    }
}

fn listener(changes: &Arc<watch::Sender<u64>>) -> Listener {
    let changes = Arc::clone(changes);
    Arc::new(move |_key: &CacheKey| {
        changes.send_modify(|version| *version = version.wrapping_add(1));
    })
}

fn needs_load(entry: Option<&CacheEntry>, first_attempt: bool) -> bool {
    let Some(entry) = entry else {
        return true;
    };
    if entry.is_loading() {
        return false;
    }
    if entry.error.is_some() && !first_attempt {
        return false;
    }
    entry.data.is_none() || entry.stale || entry.error.is_some()
}

fn decode<T: DeserializeOwned>(entry: &CacheEntry) -> QueryState<T> {
    let mut error = entry.error.as_ref().map(ToString::to_string);
    let data = entry.data.as_ref().and_then(|value| {
        serde_json::from_value((**value).clone())
            .map_err(|err| {
                error.get_or_insert_with(|| format!("unexpected response shape: {err}"));
            })
            .ok()
    });
    QueryState {
        data,
        loading: entry.is_loading(),
        error,
    }
}
