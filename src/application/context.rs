//! Wiring of the data layer into one application context.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::cache::{CacheConfig, CacheStore, CacheTrigger, Filters, ResourceLoader};
use crate::domain::types::ResourceKind;
use crate::infra::preferences::PreferenceStore;

use super::mutations::MutationCoordinator;
use super::notices::Notices;
use super::query::{Queries, Query};
use super::scope::{FamilySource, ScopeController};

/// Everything a front end needs: one shared store, the scope controller, the
/// query factory and the mutation coordinator.
#[derive(Clone)]
pub struct AppContext {
    pub store: CacheStore,
    pub trigger: Arc<CacheTrigger>,
    pub scope: Arc<ScopeController>,
    pub queries: Queries,
    pub mutations: MutationCoordinator,
    pub notices: Notices,
}

impl AppContext {
    pub fn new(
        config: CacheConfig,
        loader: Arc<dyn ResourceLoader>,
        family: Arc<dyn FamilySource>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Self {
        let store = CacheStore::new(&config);
        let trigger = Arc::new(CacheTrigger::for_store(config, store.clone()));
        let scope = Arc::new(ScopeController::new(
            preferences,
            family,
            Arc::clone(&trigger),
        ));
        let queries = Queries::new(store.clone(), loader, scope.watch());
        let notices = Notices::new();
        let mutations = MutationCoordinator::new(
            Arc::clone(&trigger),
            notices.clone(),
            Some(Arc::clone(&scope)),
        );

        Self {
            store,
            trigger,
            scope,
            queries,
            mutations,
            notices,
        }
    }

    pub fn query<T: DeserializeOwned>(&self, kind: ResourceKind, filters: Filters) -> Query<T> {
        self.queries.query(kind, filters)
    }
}
