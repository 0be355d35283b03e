//! Typed mutations against the finance API.
//!
//! Each operation sends one Resource Client call through
//! [`MutationCoordinator::perform`] together with the event that declares
//! which cached reads the call can change. Scoped resources take the scope
//! explicitly so the request header and the dedup fingerprint agree.

use std::future::Future;

use fireledger_api_types::{
    Asset, AssetInput, Category, CategoryInput, Debt, DebtInput, Expense, ExpenseInput, Family,
    FamilyCreateRequest, FamilyJoinRequest, Flow, FlowInput, Ledger, LedgerInput, Preferences,
};
use serde::Serialize;

use crate::cache::EventKind;
use crate::domain::types::Scope;
use crate::infra::client::{ApiClient, ClientError};

use super::error::AppError;
use super::mutations::MutationCoordinator;

impl MutationCoordinator {
    async fn send<T, Fut>(
        &self,
        event: EventKind,
        payload: &impl Serialize,
        call: Fut,
    ) -> Result<T, AppError>
    where
        T: Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        self.perform(event, payload, move || call).await
    }

    // ========================================================================
    // Ledgers
    // ========================================================================

    pub async fn create_ledger(
        &self,
        client: &ApiClient,
        input: &LedgerInput,
    ) -> Result<Ledger, AppError> {
        let (client, body) = (client.clone(), input.clone());
        self.send(EventKind::LedgerCreated, input, async move {
            client.create_ledger(&body).await
        })
        .await
    }

    pub async fn update_ledger(
        &self,
        client: &ApiClient,
        id: &str,
        input: &LedgerInput,
    ) -> Result<Ledger, AppError> {
        let event = EventKind::LedgerUpserted {
            ledger_id: id.to_string(),
        };
        let (client, owned_id, body) = (client.clone(), id.to_string(), input.clone());
        self.send(event, &(id, input), async move {
            client.update_ledger(&owned_id, &body).await
        })
        .await
    }

    /// Also drops the ledger's expenses and expense stats.
    pub async fn delete_ledger(&self, client: &ApiClient, id: &str) -> Result<(), AppError> {
        let event = EventKind::LedgerDeleted {
            ledger_id: id.to_string(),
        };
        let (client, owned_id) = (client.clone(), id.to_string());
        self.send(event, &id, async move { client.delete_ledger(&owned_id).await })
            .await
    }

    // ========================================================================
    // Expenses
    // ========================================================================

    pub async fn create_expense(
        &self,
        client: &ApiClient,
        input: &ExpenseInput,
    ) -> Result<Expense, AppError> {
        let event = EventKind::ExpenseChanged {
            ledger_id: input.ledger_id.clone(),
        };
        let (client, body) = (client.clone(), input.clone());
        self.send(event, input, async move { client.create_expense(&body).await })
            .await
    }

    pub async fn update_expense(
        &self,
        client: &ApiClient,
        id: &str,
        input: &ExpenseInput,
    ) -> Result<Expense, AppError> {
        let event = EventKind::ExpenseChanged {
            ledger_id: input.ledger_id.clone(),
        };
        let (client, owned_id, body) = (client.clone(), id.to_string(), input.clone());
        self.send(event, &(id, input), async move {
            client.update_expense(&owned_id, &body).await
        })
        .await
    }

    /// Takes the whole expense since its ledger decides what is invalidated.
    pub async fn delete_expense(
        &self,
        client: &ApiClient,
        expense: &Expense,
    ) -> Result<(), AppError> {
        let event = EventKind::ExpenseChanged {
            ledger_id: expense.ledger_id.clone(),
        };
        let (client, id) = (client.clone(), expense.id.clone());
        self.send(event, &expense.id, async move {
            client.delete_expense(&id).await
        })
        .await
    }

    // ========================================================================
    // Assets (scoped)
    // ========================================================================

    pub async fn create_asset(
        &self,
        client: &ApiClient,
        scope: Scope,
        input: &AssetInput,
    ) -> Result<Asset, AppError> {
        let (client, body) = (client.clone(), input.clone());
        self.send(EventKind::AssetCreated, &(scope, input), async move {
            client.create_asset(scope, &body).await
        })
        .await
    }

    pub async fn update_asset(
        &self,
        client: &ApiClient,
        scope: Scope,
        id: &str,
        input: &AssetInput,
    ) -> Result<Asset, AppError> {
        let event = EventKind::AssetUpserted {
            asset_id: id.to_string(),
        };
        let (client, owned_id, body) = (client.clone(), id.to_string(), input.clone());
        self.send(event, &(scope, id, input), async move {
            client.update_asset(scope, &owned_id, &body).await
        })
        .await
    }

    /// Flows can be linked to the asset, so they are invalidated as well.
    pub async fn delete_asset(
        &self,
        client: &ApiClient,
        scope: Scope,
        id: &str,
    ) -> Result<(), AppError> {
        let event = EventKind::AssetDeleted {
            asset_id: id.to_string(),
        };
        let (client, owned_id) = (client.clone(), id.to_string());
        self.send(event, &(scope, id), async move {
            client.delete_asset(scope, &owned_id).await
        })
        .await
    }

    // ========================================================================
    // Flows (scoped)
    // ========================================================================

    /// A flow linked to an asset emits an account balance notice on success.
    pub async fn create_flow(
        &self,
        client: &ApiClient,
        scope: Scope,
        input: &FlowInput,
    ) -> Result<Flow, AppError> {
        let event = EventKind::FlowChanged {
            linked_asset_id: input.linked_asset_id.clone(),
        };
        let (client, body) = (client.clone(), input.clone());
        self.send(event, &(scope, input), async move {
            client.create_flow(scope, &body).await
        })
        .await
    }

    pub async fn update_flow(
        &self,
        client: &ApiClient,
        scope: Scope,
        id: &str,
        input: &FlowInput,
    ) -> Result<Flow, AppError> {
        let event = EventKind::FlowChanged {
            linked_asset_id: input.linked_asset_id.clone(),
        };
        let (client, owned_id, body) = (client.clone(), id.to_string(), input.clone());
        self.send(event, &(scope, id, input), async move {
            client.update_flow(scope, &owned_id, &body).await
        })
        .await
    }

    pub async fn delete_flow(
        &self,
        client: &ApiClient,
        scope: Scope,
        flow: &Flow,
    ) -> Result<(), AppError> {
        let event = EventKind::FlowChanged {
            linked_asset_id: flow.linked_asset_id.clone(),
        };
        let (client, id) = (client.clone(), flow.id.clone());
        self.send(event, &(scope, &flow.id), async move {
            client.delete_flow(scope, &id).await
        })
        .await
    }

    // ========================================================================
    // Debts (scoped)
    // ========================================================================

    pub async fn create_debt(
        &self,
        client: &ApiClient,
        scope: Scope,
        input: &DebtInput,
    ) -> Result<Debt, AppError> {
        let (client, body) = (client.clone(), input.clone());
        self.send(EventKind::DebtChanged, &(scope, input), async move {
            client.create_debt(scope, &body).await
        })
        .await
    }

    pub async fn update_debt(
        &self,
        client: &ApiClient,
        scope: Scope,
        id: &str,
        input: &DebtInput,
    ) -> Result<Debt, AppError> {
        let (client, owned_id, body) = (client.clone(), id.to_string(), input.clone());
        self.send(EventKind::DebtChanged, &(scope, id, input), async move {
            client.update_debt(scope, &owned_id, &body).await
        })
        .await
    }

    pub async fn delete_debt(
        &self,
        client: &ApiClient,
        scope: Scope,
        id: &str,
    ) -> Result<(), AppError> {
        let (client, owned_id) = (client.clone(), id.to_string());
        self.send(EventKind::DebtChanged, &(scope, id), async move {
            client.delete_debt(scope, &owned_id).await
        })
        .await
    }

    // ========================================================================
    // Categories (scoped)
    // ========================================================================

    pub async fn create_category(
        &self,
        client: &ApiClient,
        scope: Scope,
        input: &CategoryInput,
    ) -> Result<Category, AppError> {
        let (client, body) = (client.clone(), input.clone());
        self.send(EventKind::CategoryChanged, &(scope, input), async move {
            client.create_category(scope, &body).await
        })
        .await
    }

    pub async fn update_category(
        &self,
        client: &ApiClient,
        scope: Scope,
        id: &str,
        input: &CategoryInput,
    ) -> Result<Category, AppError> {
        let (client, owned_id, body) = (client.clone(), id.to_string(), input.clone());
        self.send(EventKind::CategoryChanged, &(scope, id, input), async move {
            client.update_category(scope, &owned_id, &body).await
        })
        .await
    }

    pub async fn delete_category(
        &self,
        client: &ApiClient,
        scope: Scope,
        id: &str,
    ) -> Result<(), AppError> {
        let (client, owned_id) = (client.clone(), id.to_string());
        self.send(EventKind::CategoryChanged, &(scope, id), async move {
            client.delete_category(scope, &owned_id).await
        })
        .await
    }

    // ========================================================================
    // Family
    // ========================================================================
    //
    // Every family mutation revalidates membership once it succeeds.

    pub async fn create_family(
        &self,
        client: &ApiClient,
        request: &FamilyCreateRequest,
    ) -> Result<Family, AppError> {
        let (client, body) = (client.clone(), request.clone());
        self.send(EventKind::FamilyChanged, &("create", request), async move {
            client.create_family(&body).await
        })
        .await
    }

    pub async fn join_family(
        &self,
        client: &ApiClient,
        request: &FamilyJoinRequest,
    ) -> Result<Family, AppError> {
        let (client, body) = (client.clone(), request.clone());
        self.send(EventKind::FamilyChanged, &("join", request), async move {
            client.join_family(&body).await
        })
        .await
    }

    pub async fn leave_family(&self, client: &ApiClient) -> Result<(), AppError> {
        let client = client.clone();
        self.send(EventKind::FamilyChanged, &"leave", async move {
            client.leave_family().await
        })
        .await
    }

    pub async fn delete_family(&self, client: &ApiClient) -> Result<(), AppError> {
        let client = client.clone();
        self.send(EventKind::FamilyChanged, &"delete", async move {
            client.delete_family().await
        })
        .await
    }

    // ========================================================================
    // Preferences
    // ========================================================================

    pub async fn update_preferences(
        &self,
        client: &ApiClient,
        preferences: &Preferences,
    ) -> Result<Preferences, AppError> {
        let (client, body) = (client.clone(), preferences.clone());
        self.send(EventKind::PreferencesUpdated, preferences, async move {
            client.update_preferences(&body).await
        })
        .await
    }
}
