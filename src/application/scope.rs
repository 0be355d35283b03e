//! View-mode (scope) controller.
//!
//! Owns the active [`Scope`], validates it against server-confirmed family
//! membership and persists it. It is the only writer of the persisted scope.
//! Every accepted switch is published as a scope-switch cache event, which
//! re-targets the scoped entries of the store.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use fireledger_api_types::Family;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{CacheTrigger, FetchError, mutex_lock, rw_read, rw_write};
use crate::domain::family::FamilyMembership;
use crate::domain::types::Scope;
use crate::infra::client::ApiClient;
use crate::infra::preferences::{
    PreferenceStore, VIEW_MODE_KEY, VIEW_MODE_ONBOARDED_KEY, read_persisted_scope,
};

use super::error::AppError;

const SOURCE: &str = "application::scope";

/// Where membership comes from.
#[async_trait]
pub trait FamilySource: Send + Sync {
    /// The caller's family, or `None` when they have none.
    async fn fetch_family(&self) -> Result<Option<Family>, FetchError>;
}

#[async_trait]
impl FamilySource for ApiClient {
    async fn fetch_family(&self) -> Result<Option<Family>, FetchError> {
        self.my_family().await.map_err(FetchError::from)
    }
}

/// Outcome of [`ScopeController::set_scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeChange {
    Applied { from: Scope, to: Scope },
    Unchanged,
    /// `family` was requested without confirmed membership.
    Rejected,
}

pub struct ScopeController {
    preferences: Arc<dyn PreferenceStore>,
    family: Arc<dyn FamilySource>,
    trigger: Arc<CacheTrigger>,
    scope: watch::Sender<Scope>,
    membership: RwLock<FamilyMembership>,
    switch: Mutex<()>,
}

impl ScopeController {
    /// Start from the persisted scope, before any network round-trip.
    pub fn new(
        preferences: Arc<dyn PreferenceStore>,
        family: Arc<dyn FamilySource>,
        trigger: Arc<CacheTrigger>,
    ) -> Self {
        let initial = read_persisted_scope(preferences.as_ref()).unwrap_or_default();
        trigger.store().set_active_scope(initial);
        debug!(scope = %initial, "Scope controller starting");
        let (scope, _) = watch::channel(initial);
        Self {
            preferences,
            family,
            trigger,
            scope,
            membership: RwLock::new(FamilyMembership::none()),
            switch: Mutex::new(()),
        }
    }

    pub fn scope(&self) -> Scope {
        *self.scope.borrow()
    }

    /// Receiver that observes every scope change.
    pub fn watch(&self) -> watch::Receiver<Scope> {
        self.scope.subscribe()
    }

    pub fn membership(&self) -> FamilyMembership {
        rw_read(&self.membership, SOURCE, "membership").clone()
    }

    /// Fetch membership and settle the scope against it.
    pub async fn initialize(&self) -> Result<Scope, AppError> {
        self.refresh_membership().await?;
        Ok(self.scope())
    }

    /// Re-read membership from the server and coerce the scope if needed.
    ///
    /// A failed fetch leaves both membership and scope as they were; only a
    /// successful "no family" answer revokes the family scope.
    pub async fn refresh_membership(&self) -> Result<FamilyMembership, AppError> {
        let family = match self.family.fetch_family().await {
            Ok(family) => family,
            Err(err) => {
                warn!(error = %err, "Family membership refresh failed");
                return Err(err.into());
            }
        };
        let membership = FamilyMembership::from_family(family.as_ref());
        *rw_write(&self.membership, SOURCE, "refresh_membership") = membership.clone();
        debug!(
            confirmed = membership.confirmed,
            family_id = ?membership.family_id,
            "Family membership refreshed"
        );

        self.reconcile(&membership)?;
        Ok(membership)
    }

    fn reconcile(&self, membership: &FamilyMembership) -> Result<(), AppError> {
        let _guard = mutex_lock(&self.switch, SOURCE, "reconcile");
        let current = self.scope();

        if current == Scope::Family && !membership.is_member() {
            info!("Family scope without confirmed membership; correcting to personal");
            return self.apply(current, Scope::Personal);
        }

        if membership.is_member() && self.preferences.read(VIEW_MODE_ONBOARDED_KEY).is_none() {
            self.preferences.write(VIEW_MODE_ONBOARDED_KEY, "true")?;
            if read_persisted_scope(self.preferences.as_ref()).is_none() {
                info!("Family membership confirmed; defaulting to family scope");
                return self.apply(current, Scope::Family);
            }
        }
        Ok(())
    }

    /// Switch to `target`.
    ///
    /// Switching to `family` without confirmed membership is a no-op: scope
    /// and persisted state stay unchanged.
    pub fn set_scope(&self, target: Scope) -> Result<ScopeChange, AppError> {
        let _guard = mutex_lock(&self.switch, SOURCE, "set_scope");
        let current = self.scope();

        if target == Scope::Family && !rw_read(&self.membership, SOURCE, "set_scope").is_member() {
            debug!("Rejected family scope: membership not confirmed");
            return Ok(ScopeChange::Rejected);
        }
        if target == current {
            return Ok(ScopeChange::Unchanged);
        }

        self.apply(current, target)?;
        Ok(ScopeChange::Applied {
            from: current,
            to: target,
        })
    }

    /// Caller holds `switch`. The in-memory scope changes even when
    /// persisting it fails.
    fn apply(&self, from: Scope, to: Scope) -> Result<(), AppError> {
        self.scope.send_replace(to);
        if from != to {
            self.trigger.scope_switched(from, to);
        }
        info!(from = %from, to = %to, "Scope switched");
        self.preferences.write(VIEW_MODE_KEY, to.as_str())?;
        Ok(())
    }
}
