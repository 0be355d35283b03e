//! Keyed cache store.
//!
//! One process-wide map from [`CacheKey`] to entry state. The store owns every
//! mutation of that state; callers go through `fetch`, `invalidate`,
//! `retarget_scope` and `subscribe`. Network I/O only ever happens inside the
//! supplied [`ResourceLoader`].
//!
//! Staleness is tracked centrally: every entry carries a generation tag that
//! is bumped when a fetch starts, when the entry is invalidated and when it is
//! re-targeted. A load that settles with an out-of-date generation is dropped
//! instead of being written back.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::domain::types::Scope;

use super::config::CacheConfig;
use super::error::FetchError;
use super::keys::CacheKey;
use super::loader::ResourceLoader;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

const METRIC_HIT_TOTAL: &str = "fireledger_cache_hit_total";
const METRIC_MISS_TOTAL: &str = "fireledger_cache_miss_total";
const METRIC_FETCH_TOTAL: &str = "fireledger_cache_fetch_total";
const METRIC_DEDUP_TOTAL: &str = "fireledger_cache_dedup_total";
const METRIC_STALE_DISCARD_TOTAL: &str = "fireledger_cache_stale_discard_total";
const METRIC_EVICT_TOTAL: &str = "fireledger_cache_evict_total";

/// Settled outcome of a load, shared by every joined caller.
pub type FetchResult = Result<Arc<Value>, FetchError>;

/// Change callback registered through [`CacheStore::subscribe`].
///
/// Invoked with the key the subscriber is currently attached to, outside the
/// store lock.
pub type Listener = Arc<dyn Fn(&CacheKey) + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Read view of one entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub data: Option<Arc<Value>>,
    pub error: Option<FetchError>,
    pub last_fetched_at: Option<OffsetDateTime>,
    pub in_flight_request_id: Option<u64>,
    pub subscriber_count: usize,
    pub generation: u64,
    /// Set by invalidation until the next successful load.
    pub stale: bool,
}

impl CacheEntry {
    pub fn is_loading(&self) -> bool {
        self.in_flight_request_id.is_some()
    }
}

/// Options for [`CacheStore::invalidate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidateOptions {
    /// Immediately reload matching entries that have subscribers.
    pub revalidate: bool,
}

impl InvalidateOptions {
    pub fn revalidate() -> Self {
        Self { revalidate: true }
    }
}

/// What an invalidation pass did.
#[derive(Debug, Default)]
pub struct Invalidation {
    pub evicted: Vec<CacheKey>,
    pub marked_stale: Vec<CacheKey>,
    pub revalidating: Vec<CacheKey>,
}

/// What a scope re-target pass did.
#[derive(Debug, Default)]
pub struct Retarget {
    pub round: u64,
    pub evicted: Vec<CacheKey>,
    pub fetching: Vec<CacheKey>,
}

struct InFlight {
    request_id: u64,
    future: SharedFetch,
}

struct Slot {
    data: Option<Arc<Value>>,
    error: Option<FetchError>,
    last_fetched_at: Option<OffsetDateTime>,
    in_flight: Option<InFlight>,
    subscribers: BTreeMap<u64, Listener>,
    generation: u64,
    round: u64,
    stale: bool,
    loader: Option<Arc<dyn ResourceLoader>>,
}

impl Slot {
    fn new(round: u64) -> Self {
        Self {
            data: None,
            error: None,
            last_fetched_at: None,
            in_flight: None,
            subscribers: BTreeMap::new(),
            generation: 0,
            round,
            stale: false,
            loader: None,
        }
    }

    fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.in_flight.is_none()
    }

    fn listeners(&self) -> Vec<Listener> {
        self.subscribers.values().cloned().collect()
    }

    fn snapshot(&self, key: &CacheKey) -> CacheEntry {
        CacheEntry {
            key: key.clone(),
            data: self.data.clone(),
            error: self.error.clone(),
            last_fetched_at: self.last_fetched_at,
            in_flight_request_id: self.in_flight.as_ref().map(|f| f.request_id),
            subscriber_count: self.subscribers.len(),
            generation: self.generation,
            stale: self.stale,
        }
    }
}

struct State {
    slots: HashMap<CacheKey, Slot>,
    /// Keys of slots with no subscribers and no load in flight, least
    /// recently idled first.
    idle: LruCache<CacheKey, ()>,
    subscriptions: HashMap<u64, CacheKey>,
    next_request_id: u64,
    next_subscriber_id: u64,
    round: u64,
    active_scope: Option<Scope>,
}

impl State {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            idle: LruCache::unbounded(),
            subscriptions: HashMap::new(),
            next_request_id: 0,
            next_subscriber_id: 0,
            round: 0,
            active_scope: None,
        }
    }

    fn slot_mut(&mut self, key: &CacheKey) -> &mut Slot {
        let round = self.round;
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(round))
    }

    fn remove_slot(&mut self, key: &CacheKey) -> Option<Slot> {
        self.idle.pop(key);
        self.slots.remove(key)
    }

    /// Bring the idle index in line with the slot's current state.
    fn sync_idle(&mut self, key: &CacheKey) {
        match self.slots.get(key) {
            Some(slot) if slot.is_idle() => {
                self.idle.put(key.clone(), ());
            }
            _ => {
                self.idle.pop(key);
            }
        }
    }

    /// Evict the least recently used idle entries beyond `limit`.
    fn trim_idle(&mut self, limit: usize) {
        while self.idle.len() > limit {
            let Some((key, ())) = self.idle.pop_lru() else {
                break;
            };
            self.slots.remove(&key);
            counter!(METRIC_EVICT_TOTAL, "reason" => "idle_limit").increment(1);
            debug!(cache_key = %key, "Evicted idle cache entry");
        }
    }
}

struct Inner {
    config: CacheConfig,
    state: Mutex<State>,
}

/// Shared handle to the keyed cache store. Clones refer to the same store.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

impl CacheStore {
    /// Create a new store with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: config.clone(),
                state: Mutex::new(State::new()),
            }),
        }
    }

    fn state(&self, op: &'static str) -> std::sync::MutexGuard<'_, State> {
        mutex_lock(&self.inner.state, SOURCE, op)
    }

    fn idle_limit(&self) -> usize {
        self.inner.config.idle_entry_limit_non_zero().get()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Synchronous read without side effects on entry state.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let state = self.state("get");
        let entry = state.slots.get(key).map(|slot| slot.snapshot(key));
        if entry.as_ref().is_some_and(|e| e.data.is_some()) {
            counter!(METRIC_HIT_TOTAL).increment(1);
        } else {
            counter!(METRIC_MISS_TOTAL).increment(1);
        }
        entry
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state("contains").slots.contains_key(key)
    }

    /// All keys currently held, in canonical order.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.state("keys").slots.keys().cloned().collect();
        keys.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        keys
    }

    pub fn len(&self) -> usize {
        self.state("len").slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scope the last re-target pass moved the store to.
    pub fn active_scope(&self) -> Option<Scope> {
        self.state("active_scope").active_scope
    }

    /// Record the scope scoped loads are expected to belong to, without
    /// touching any entry.
    pub fn set_active_scope(&self, scope: Scope) {
        self.state("set_active_scope").active_scope = Some(scope);
    }

    /// Number of completed re-target passes.
    pub fn round(&self) -> u64 {
        self.state("round").round
    }

    /// Key the given subscription is currently attached to.
    pub fn subscription_key(&self, subscription_id: u64) -> Option<CacheKey> {
        self.state("subscription_key")
            .subscriptions
            .get(&subscription_id)
            .cloned()
    }

    // ========================================================================
    // Fetch
    // ========================================================================

    /// Load `key`, joining the in-flight request for it if there is one.
    ///
    /// Concurrent callers for the same key share a single `loader` call and
    /// receive the same settled value. A failure is stored on the entry and
    /// returned to every joined caller; it never touches other entries.
    pub async fn fetch(&self, key: &CacheKey, loader: Arc<dyn ResourceLoader>) -> FetchResult {
        match self.begin_fetch(key, Some(loader)) {
            Some(future) => future.await,
            None => Err(FetchError::network(format!("no loader registered for {key}"))),
        }
    }

    /// Wait for the in-flight request of `key`, if any, to settle.
    pub async fn settled(&self, key: &CacheKey) {
        let pending = self
            .state("settled")
            .slots
            .get(key)
            .and_then(|slot| slot.in_flight.as_ref().map(|f| f.future.clone()));
        if let Some(future) = pending {
            let _ = future.await;
        }
    }

    fn begin_fetch(
        &self,
        key: &CacheKey,
        loader: Option<Arc<dyn ResourceLoader>>,
    ) -> Option<SharedFetch> {
        let (future, request_id, listeners) = {
            let mut state = self.state("begin_fetch");
            state.next_request_id += 1;
            let request_id = state.next_request_id;
            state.idle.pop(key);
            let slot = state.slot_mut(key);
            if let Some(loader) = loader {
                slot.loader = Some(loader);
            }

            if let Some(in_flight) = &slot.in_flight {
                counter!(METRIC_DEDUP_TOTAL).increment(1);
                debug!(
                    cache_key = %key,
                    request_id = in_flight.request_id,
                    "Joined in-flight request"
                );
                return Some(in_flight.future.clone());
            }

            let Some(loader) = slot.loader.clone() else {
                state.sync_idle(key);
                return None;
            };
            slot.generation += 1;
            slot.error = None;
            let generation = slot.generation;

            let weak = Arc::downgrade(&self.inner);
            let load_key = key.clone();
            let future = async move {
                let result = loader.load(&load_key).await.map(Arc::new);
                if let Some(inner) = Weak::upgrade(&weak) {
                    CacheStore { inner }.settle(&load_key, generation, &result);
                }
                result
            }
            .boxed()
            .shared();

            slot.in_flight = Some(InFlight {
                request_id,
                future: future.clone(),
            });
            (future, request_id, slot.listeners())
        };

        counter!(METRIC_FETCH_TOTAL, "kind" => key.kind().as_str()).increment(1);
        debug!(cache_key = %key, request_id, "Fetch started");

        // Drive the load even if every awaiting caller goes away.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(future.clone());
            }
            Err(_) => warn!(
                cache_key = %key,
                "No async runtime; load progresses only while awaited"
            ),
        }

        notify(&listeners, key);
        Some(future)
    }

    fn settle(&self, key: &CacheKey, generation: u64, result: &FetchResult) {
        let listeners = {
            let mut state = self.state("settle");
            let active_scope = state.active_scope;
            let Some(slot) = state.slots.get_mut(key) else {
                counter!(METRIC_STALE_DISCARD_TOTAL).increment(1);
                debug!(cache_key = %key, generation, "Discarded response for evicted entry");
                return;
            };
            if slot.generation != generation {
                counter!(METRIC_STALE_DISCARD_TOTAL).increment(1);
                debug!(
                    cache_key = %key,
                    generation,
                    current_generation = slot.generation,
                    "Discarded superseded response"
                );
                return;
            }

            slot.in_flight = None;
            let out_of_scope = match (key.scope(), active_scope) {
                (Some(scope), Some(active)) => scope != active,
                _ => false,
            };
            if out_of_scope {
                counter!(METRIC_STALE_DISCARD_TOTAL).increment(1);
                debug!(
                    cache_key = %key,
                    round = slot.round,
                    "Discarded response from superseded scope round"
                );
            } else {
                match result {
                    Ok(value) => {
                        slot.data = Some(Arc::clone(value));
                        slot.error = None;
                        slot.stale = false;
                        slot.last_fetched_at = Some(OffsetDateTime::now_utc());
                    }
                    Err(error) => {
                        debug!(cache_key = %key, error = %error, "Fetch failed");
                        slot.error = Some(error.clone());
                    }
                }
            }
            let listeners = slot.listeners();
            state.sync_idle(key);
            state.trim_idle(self.idle_limit());
            listeners
        };
        notify(&listeners, key);
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Invalidate every entry whose key matches `predicate`.
    ///
    /// Entries without subscribers are evicted. Entries with subscribers are
    /// marked stale, their in-flight request (if any) is detached so its
    /// result is dropped, and with `revalidate` a fresh load is started.
    pub fn invalidate<P>(&self, predicate: P, options: InvalidateOptions) -> Invalidation
    where
        P: Fn(&CacheKey) -> bool,
    {
        let mut outcome = Invalidation::default();
        let mut notifications = Vec::new();
        {
            let mut state = self.state("invalidate");
            let matching: Vec<CacheKey> = state
                .slots
                .keys()
                .filter(|key| predicate(key))
                .cloned()
                .collect();

            for key in matching {
                let Some(slot) = state.slots.get_mut(&key) else {
                    continue;
                };
                if slot.subscribers.is_empty() {
                    state.remove_slot(&key);
                    counter!(METRIC_EVICT_TOTAL, "reason" => "invalidated").increment(1);
                    outcome.evicted.push(key);
                    continue;
                }

                slot.generation += 1;
                slot.in_flight = None;
                slot.stale = true;
                notifications.push((key.clone(), slot.listeners()));
                if options.revalidate && slot.loader.is_some() {
                    outcome.revalidating.push(key.clone());
                }
                outcome.marked_stale.push(key);
            }
        }

        debug!(
            evicted = outcome.evicted.len(),
            marked_stale = outcome.marked_stale.len(),
            revalidating = outcome.revalidating.len(),
            "Cache invalidation applied"
        );

        for (key, listeners) in &notifications {
            notify(listeners, key);
        }
        for key in &outcome.revalidating {
            let _ = self.begin_fetch(key, None);
        }
        outcome
    }

    /// Move every scoped entry that is not under `to` onto `to`.
    ///
    /// Subscribers follow their key into the new scope and a load is started
    /// there; the old entries are evicted, so responses still in flight for
    /// them can never repopulate the store. Shared keys are untouched.
    pub fn retarget_scope(&self, to: Scope) -> Retarget {
        let mut outcome = Retarget::default();
        let mut moved: Vec<(CacheKey, Vec<Listener>)> = Vec::new();
        {
            let mut state = self.state("retarget_scope");
            state.round += 1;
            state.active_scope = Some(to);
            outcome.round = state.round;

            let foreign: Vec<CacheKey> = state
                .slots
                .keys()
                .filter(|key| key.scope().is_some_and(|scope| scope != to))
                .cloned()
                .collect();

            let mut targets: HashSet<CacheKey> = HashSet::new();
            for key in foreign {
                let Some(old) = state.remove_slot(&key) else {
                    continue;
                };
                counter!(METRIC_EVICT_TOTAL, "reason" => "scope_switch").increment(1);
                outcome.evicted.push(key.clone());
                if old.subscribers.is_empty() {
                    continue;
                }

                let new_key = key.with_scope(to);
                let round = state.round;
                let ids: Vec<u64> = old.subscribers.keys().copied().collect();
                let target = state.slot_mut(&new_key);
                target.round = round;
                target.subscribers.extend(old.subscribers);
                if target.loader.is_none() {
                    target.loader = old.loader;
                }
                for id in ids {
                    state.subscriptions.insert(id, new_key.clone());
                }
                state.sync_idle(&new_key);
                targets.insert(new_key);
            }

            for key in targets {
                if let Some(slot) = state.slots.get(&key) {
                    moved.push((key.clone(), slot.listeners()));
                    if slot.in_flight.is_none() && slot.loader.is_some() {
                        outcome.fetching.push(key);
                    }
                }
            }
        }

        debug!(
            scope = %to,
            round = outcome.round,
            evicted = outcome.evicted.len(),
            fetching = outcome.fetching.len(),
            "Cache re-targeted to scope"
        );

        for (key, listeners) in &moved {
            notify(listeners, key);
        }
        for key in &outcome.fetching {
            let _ = self.begin_fetch(key, None);
        }
        outcome
    }

    /// Drop every entry and subscription binding.
    pub fn clear(&self) {
        let mut state = self.state("clear");
        state.slots.clear();
        state.idle.clear();
        state.subscriptions.clear();
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Attach `listener` to `key`. The returned guard detaches it on drop.
    pub fn subscribe(&self, key: &CacheKey, listener: Listener) -> Subscription {
        let mut state = self.state("subscribe");
        state.next_subscriber_id += 1;
        let id = state.next_subscriber_id;
        state.slot_mut(key).subscribers.insert(id, listener);
        state.sync_idle(key);
        state.subscriptions.insert(id, key.clone());
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.state("unsubscribe");
        let Some(key) = state.subscriptions.remove(&id) else {
            return;
        };
        if let Some(slot) = state.slots.get_mut(&key) {
            slot.subscribers.remove(&id);
        }
        state.sync_idle(&key);
        state.trim_idle(self.idle_limit());
    }
}

fn notify(listeners: &[Listener], key: &CacheKey) {
    for listener in listeners {
        listener(key);
    }
}

/// Subscription guard returned by [`CacheStore::subscribe`].
pub struct Subscription {
    id: u64,
    store: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Key the subscription is attached to right now. Scope re-targeting can
    /// move it.
    pub fn key(&self) -> Option<CacheKey> {
        let inner = self.store.upgrade()?;
        CacheStore { inner }.subscription_key(self.id)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            CacheStore { inner }.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::cache::keys::Filters;
    use crate::cache::loader::FnLoader;
    use crate::domain::types::ResourceKind;

    fn counting_loader(calls: Arc<AtomicUsize>, value: Value) -> Arc<dyn ResourceLoader> {
        Arc::new(FnLoader::new(move |_key| {
            let calls = Arc::clone(&calls);
            let value = value.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
        }))
    }

    fn gated_loader(
        calls: Arc<AtomicUsize>,
        gate: Arc<Notify>,
        value: Value,
    ) -> Arc<dyn ResourceLoader> {
        Arc::new(FnLoader::new(move |_key| {
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            let value = value.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok(value)
            }
        }))
    }

    fn noop_listener() -> Listener {
        Arc::new(|_key: &CacheKey| {})
    }

    fn flows_key(scope: Scope) -> CacheKey {
        CacheKey::new(ResourceKind::Flows, scope, Filters::new())
    }

    #[tokio::test]
    async fn fetch_stores_data() {
        let store = CacheStore::new(&CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = flows_key(Scope::Personal);

        let value = store
            .fetch(&key, counting_loader(calls.clone(), json!([1, 2])))
            .await
            .expect("fetch");

        assert_eq!(*value, json!([1, 2]));
        let entry = store.get(&key).expect("entry");
        assert_eq!(entry.data.as_deref(), Some(&json!([1, 2])));
        assert!(entry.last_fetched_at.is_some());
        assert!(!entry.is_loading());
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_load() {
        let store = CacheStore::new(&CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let key = flows_key(Scope::Personal);
        let loader = gated_loader(calls.clone(), gate.clone(), json!(["rent"]));

        let first = tokio::spawn({
            let store = store.clone();
            let key = key.clone();
            let loader = loader.clone();
            async move { store.fetch(&key, loader).await }
        });
        let second = tokio::spawn({
            let store = store.clone();
            let key = key.clone();
            let loader = loader.clone();
            async move { store.fetch(&key, loader).await }
        });

        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        // Give the second caller a chance to join before releasing the gate.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(store.get(&key).expect("entry").is_loading());
        gate.notify_waiters();

        let a = first.await.expect("join").expect("first");
        let b = second.await.expect("join").expect("second");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_is_stored_and_isolated() {
        let store = CacheStore::new(&CacheConfig::default());
        let ok_key = flows_key(Scope::Personal);
        let bad_key = CacheKey::new(ResourceKind::Assets, Scope::Personal, Filters::new());

        store
            .fetch(&ok_key, counting_loader(Arc::new(AtomicUsize::new(0)), json!([])))
            .await
            .expect("ok fetch");

        let failing: Arc<dyn ResourceLoader> = Arc::new(FnLoader::new(|_key| async {
            Err(FetchError::network("connection reset"))
        }));
        let err = store.fetch(&bad_key, failing).await.expect_err("should fail");
        assert_eq!(err.message, "connection reset");

        assert_eq!(
            store.get(&bad_key).expect("entry").error,
            Some(FetchError::network("connection reset"))
        );
        let ok_entry = store.get(&ok_key).expect("entry");
        assert!(ok_entry.error.is_none());
        assert!(ok_entry.data.is_some());
    }

    #[tokio::test]
    async fn invalidate_evicts_unsubscribed_and_is_idempotent() {
        let store = CacheStore::new(&CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = flows_key(Scope::Personal);
        store
            .fetch(&key, counting_loader(calls.clone(), json!([])))
            .await
            .expect("fetch");

        let first = store.invalidate(|k| k == &key, InvalidateOptions::revalidate());
        assert_eq!(first.evicted, vec![key.clone()]);
        assert!(!store.contains(&key));

        let second = store.invalidate(|k| k == &key, InvalidateOptions::revalidate());
        assert!(second.evicted.is_empty());
        assert!(second.revalidating.is_empty());
        assert!(!store.contains(&key));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_revalidates_subscribed_entries() {
        let store = CacheStore::new(&CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = flows_key(Scope::Personal);
        let _sub = store.subscribe(&key, noop_listener());
        store
            .fetch(&key, counting_loader(calls.clone(), json!([])))
            .await
            .expect("fetch");

        let outcome = store.invalidate(|k| k == &key, InvalidateOptions::revalidate());
        assert_eq!(outcome.revalidating, vec![key.clone()]);
        store.settled(&key).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let entry = store.get(&key).expect("entry");
        assert!(!entry.stale);
        assert_eq!(entry.subscriber_count, 1);
    }

    #[tokio::test]
    async fn invalidation_drops_in_flight_result() {
        let store = CacheStore::new(&CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let key = flows_key(Scope::Personal);
        let _sub = store.subscribe(&key, noop_listener());

        let pending = tokio::spawn({
            let store = store.clone();
            let key = key.clone();
            let loader = gated_loader(calls.clone(), gate.clone(), json!(["old"]));
            async move { store.fetch(&key, loader).await }
        });
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        store.invalidate(|k| k == &key, InvalidateOptions::default());
        gate.notify_waiters();
        let value = pending.await.expect("join").expect("caller still gets its value");
        assert_eq!(*value, json!(["old"]));

        let entry = store.get(&key).expect("entry");
        assert!(entry.data.is_none());
        assert!(entry.stale);
    }

    #[tokio::test]
    async fn listeners_fire_on_settle() {
        let store = CacheStore::new(&CacheConfig::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let key = flows_key(Scope::Personal);
        let _sub = store.subscribe(&key, {
            let seen = seen.clone();
            Arc::new(move |_key: &CacheKey| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        });

        store
            .fetch(&key, counting_loader(Arc::new(AtomicUsize::new(0)), json!([])))
            .await
            .expect("fetch");

        // Once for loading, once for settled.
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropping_subscription_detaches_listener() {
        let store = CacheStore::new(&CacheConfig::default());
        let key = flows_key(Scope::Personal);
        let sub = store.subscribe(&key, noop_listener());
        assert_eq!(store.get(&key).expect("entry").subscriber_count, 1);
        assert_eq!(sub.key(), Some(key.clone()));

        drop(sub);
        assert_eq!(store.get(&key).expect("entry").subscriber_count, 0);
    }

    #[tokio::test]
    async fn retarget_moves_subscribers_and_leaves_shared_keys() {
        let store = CacheStore::new(&CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = counting_loader(calls.clone(), json!([]));
        let personal = flows_key(Scope::Personal);
        let ledgers = CacheKey::shared(ResourceKind::Ledgers, Filters::new());
        let idle = CacheKey::new(ResourceKind::Debts, Scope::Personal, Filters::new());

        let sub = store.subscribe(&personal, noop_listener());
        store.fetch(&personal, loader.clone()).await.expect("flows");
        store.fetch(&ledgers, loader.clone()).await.expect("ledgers");
        store.fetch(&idle, loader.clone()).await.expect("debts");

        let outcome = store.retarget_scope(Scope::Family);
        let family = personal.with_scope(Scope::Family);
        assert_eq!(outcome.fetching, vec![family.clone()]);
        assert_eq!(sub.key(), Some(family.clone()));
        store.settled(&family).await;

        assert!(!store.contains(&personal));
        assert!(!store.contains(&idle));
        assert!(store.get(&ledgers).expect("ledgers").data.is_some());
        assert!(store.get(&family).expect("family").data.is_some());
        assert_eq!(store.active_scope(), Some(Scope::Family));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn idle_entries_are_bounded() {
        let config = CacheConfig {
            idle_entry_limit: 2,
            ..Default::default()
        };
        let store = CacheStore::new(&config);
        let loader = counting_loader(Arc::new(AtomicUsize::new(0)), json!([]));
        let keys: Vec<CacheKey> = (0..3)
            .map(|n| {
                CacheKey::shared(ResourceKind::Expenses, Filters::new().with("ledger_id", n))
            })
            .collect();

        for key in &keys {
            store.fetch(key, loader.clone()).await.expect("fetch");
        }

        assert_eq!(store.len(), 2);
        assert!(!store.contains(&keys[0]));
        assert!(store.contains(&keys[2]));
    }

    #[tokio::test]
    async fn idle_eviction_follows_release_order() {
        let config = CacheConfig {
            idle_entry_limit: 2,
            ..Default::default()
        };
        let store = CacheStore::new(&config);
        let loader = counting_loader(Arc::new(AtomicUsize::new(0)), json!([]));
        let keys: Vec<CacheKey> = (0..3)
            .map(|n| CacheKey::shared(ResourceKind::Ledger, Filters::new().with("ledger_id", n)))
            .collect();

        // keys[0] is held while the others load and go idle.
        let held = store.subscribe(&keys[0], noop_listener());
        for key in &keys {
            store.fetch(key, loader.clone()).await.expect("fetch");
        }
        assert_eq!(store.len(), 3);

        // Released last, so it is the most recently idled entry.
        drop(held);
        assert_eq!(store.len(), 2);
        assert!(store.contains(&keys[0]));
        assert!(!store.contains(&keys[1]));
        assert!(store.contains(&keys[2]));

        // Subscribing takes an entry out of the idle set for good.
        let _sub = store.subscribe(&keys[2], noop_listener());
        let extra = CacheKey::shared(ResourceKind::Ledger, Filters::new().with("ledger_id", 9));
        store.fetch(&extra, loader.clone()).await.expect("fetch");
        assert!(store.contains(&keys[0]));
        assert!(store.contains(&keys[2]));
        assert!(store.contains(&extra));
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = CacheStore::new(&CacheConfig::default());

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .inner
                .state
                .lock()
                .expect("state lock should be acquired");
            panic!("poison state lock");
        }));

        assert!(store.is_empty());
        let key = flows_key(Scope::Personal);
        let _sub = store.subscribe(&key, noop_listener());
        assert!(store.contains(&key));
    }
}
