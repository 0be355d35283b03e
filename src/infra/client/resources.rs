//! Per-entity request functions.

use fireledger_api_types::{
    Asset, AssetInput, AssetSummary, Category, CategoryInput, Debt, DebtInput, Expense,
    ExpenseInput, ExpenseStats, Family, FamilyCreateRequest, FamilyJoinRequest, Flow, FlowInput,
    FlowStats, Ledger, LedgerInput, Preferences,
};
use reqwest::Method;

use crate::cache::Filters;
use crate::domain::types::Scope;

use super::{ApiClient, ClientError, encode};

/// Endpoint paths, relative to the API base URL.
pub mod paths {
    pub const LEDGERS: &str = "api/ledgers";
    pub const EXPENSES: &str = "api/expenses";
    pub const EXPENSE_STATS: &str = "api/expenses/stats";
    pub const ASSETS: &str = "api/fire/assets";
    pub const ASSET_SUMMARY: &str = "api/fire/assets/summary";
    pub const FLOWS: &str = "api/fire/flows";
    pub const FLOW_STATS: &str = "api/fire/flows/stats";
    pub const DEBTS: &str = "api/fire/debts";
    pub const CATEGORIES: &str = "api/fire/categories";
    pub const FAMILY: &str = "api/family";
    pub const MY_FAMILY: &str = "api/family/me";
    pub const FAMILY_JOIN: &str = "api/family/join";
    pub const FAMILY_LEAVE: &str = "api/family/leave";
    pub const PREFERENCES: &str = "api/preferences";

    pub fn item(collection: &str, id: &str) -> String {
        format!("{collection}/{id}")
    }
}

fn ledger_filter(ledger_id: &str) -> Vec<(String, String)> {
    Filters::new().with("ledger_id", ledger_id).query_pairs()
}

impl ApiClient {
    // ========================================================================
    // Ledgers
    // ========================================================================

    pub async fn list_ledgers(&self) -> Result<Vec<Ledger>, ClientError> {
        self.request(Method::GET, paths::LEDGERS, None, &[], None)
            .await
    }

    pub async fn get_ledger(&self, id: &str) -> Result<Ledger, ClientError> {
        self.request(Method::GET, &paths::item(paths::LEDGERS, id), None, &[], None)
            .await
    }

    pub async fn create_ledger(&self, input: &LedgerInput) -> Result<Ledger, ClientError> {
        self.request(Method::POST, paths::LEDGERS, None, &[], Some(encode(input)?))
            .await
    }

    pub async fn update_ledger(
        &self,
        id: &str,
        input: &LedgerInput,
    ) -> Result<Ledger, ClientError> {
        let path = paths::item(paths::LEDGERS, id);
        self.request(Method::PUT, &path, None, &[], Some(encode(input)?))
            .await
    }

    pub async fn delete_ledger(&self, id: &str) -> Result<(), ClientError> {
        self.request_unit(Method::DELETE, &paths::item(paths::LEDGERS, id), None, None)
            .await
    }

    // ========================================================================
    // Expenses
    // ========================================================================

    pub async fn list_expenses(&self, ledger_id: &str) -> Result<Vec<Expense>, ClientError> {
        self.request(Method::GET, paths::EXPENSES, None, &ledger_filter(ledger_id), None)
            .await
    }

    pub async fn expense_stats(&self, ledger_id: &str) -> Result<ExpenseStats, ClientError> {
        let query = ledger_filter(ledger_id);
        self.request(Method::GET, paths::EXPENSE_STATS, None, &query, None)
            .await
    }

    pub async fn create_expense(&self, input: &ExpenseInput) -> Result<Expense, ClientError> {
        self.request(Method::POST, paths::EXPENSES, None, &[], Some(encode(input)?))
            .await
    }

    pub async fn update_expense(
        &self,
        id: &str,
        input: &ExpenseInput,
    ) -> Result<Expense, ClientError> {
        let path = paths::item(paths::EXPENSES, id);
        self.request(Method::PUT, &path, None, &[], Some(encode(input)?))
            .await
    }

    pub async fn delete_expense(&self, id: &str) -> Result<(), ClientError> {
        self.request_unit(Method::DELETE, &paths::item(paths::EXPENSES, id), None, None)
            .await
    }

    // ========================================================================
    // Assets (scoped)
    // ========================================================================

    pub async fn list_assets(&self, scope: Scope) -> Result<Vec<Asset>, ClientError> {
        self.request(Method::GET, paths::ASSETS, Some(scope), &[], None)
            .await
    }

    pub async fn asset_summary(&self, scope: Scope) -> Result<AssetSummary, ClientError> {
        self.request(Method::GET, paths::ASSET_SUMMARY, Some(scope), &[], None)
            .await
    }

    pub async fn create_asset(
        &self,
        scope: Scope,
        input: &AssetInput,
    ) -> Result<Asset, ClientError> {
        self.request(Method::POST, paths::ASSETS, Some(scope), &[], Some(encode(input)?))
            .await
    }

    pub async fn update_asset(
        &self,
        scope: Scope,
        id: &str,
        input: &AssetInput,
    ) -> Result<Asset, ClientError> {
        let path = paths::item(paths::ASSETS, id);
        self.request(Method::PUT, &path, Some(scope), &[], Some(encode(input)?))
            .await
    }

    pub async fn delete_asset(&self, scope: Scope, id: &str) -> Result<(), ClientError> {
        let path = paths::item(paths::ASSETS, id);
        self.request_unit(Method::DELETE, &path, Some(scope), None)
            .await
    }

    // ========================================================================
    // Flows (scoped)
    // ========================================================================

    pub async fn list_flows(
        &self,
        scope: Scope,
        asset_id: Option<&str>,
    ) -> Result<Vec<Flow>, ClientError> {
        let query = Filters::new().with("asset_id", asset_id).query_pairs();
        self.request(Method::GET, paths::FLOWS, Some(scope), &query, None)
            .await
    }

    pub async fn flow_stats(&self, scope: Scope) -> Result<FlowStats, ClientError> {
        self.request(Method::GET, paths::FLOW_STATS, Some(scope), &[], None)
            .await
    }

    pub async fn create_flow(&self, scope: Scope, input: &FlowInput) -> Result<Flow, ClientError> {
        self.request(Method::POST, paths::FLOWS, Some(scope), &[], Some(encode(input)?))
            .await
    }

    pub async fn update_flow(
        &self,
        scope: Scope,
        id: &str,
        input: &FlowInput,
    ) -> Result<Flow, ClientError> {
        let path = paths::item(paths::FLOWS, id);
        self.request(Method::PUT, &path, Some(scope), &[], Some(encode(input)?))
            .await
    }

    pub async fn delete_flow(&self, scope: Scope, id: &str) -> Result<(), ClientError> {
        let path = paths::item(paths::FLOWS, id);
        self.request_unit(Method::DELETE, &path, Some(scope), None)
            .await
    }

    // ========================================================================
    // Debts (scoped)
    // ========================================================================

    pub async fn list_debts(&self, scope: Scope) -> Result<Vec<Debt>, ClientError> {
        self.request(Method::GET, paths::DEBTS, Some(scope), &[], None)
            .await
    }

    pub async fn create_debt(&self, scope: Scope, input: &DebtInput) -> Result<Debt, ClientError> {
        self.request(Method::POST, paths::DEBTS, Some(scope), &[], Some(encode(input)?))
            .await
    }

    pub async fn update_debt(
        &self,
        scope: Scope,
        id: &str,
        input: &DebtInput,
    ) -> Result<Debt, ClientError> {
        let path = paths::item(paths::DEBTS, id);
        self.request(Method::PUT, &path, Some(scope), &[], Some(encode(input)?))
            .await
    }

    pub async fn delete_debt(&self, scope: Scope, id: &str) -> Result<(), ClientError> {
        let path = paths::item(paths::DEBTS, id);
        self.request_unit(Method::DELETE, &path, Some(scope), None)
            .await
    }

    // ========================================================================
    // Categories (scoped)
    // ========================================================================

    pub async fn list_categories(&self, scope: Scope) -> Result<Vec<Category>, ClientError> {
        self.request(Method::GET, paths::CATEGORIES, Some(scope), &[], None)
            .await
    }

    pub async fn create_category(
        &self,
        scope: Scope,
        input: &CategoryInput,
    ) -> Result<Category, ClientError> {
        let body = Some(encode(input)?);
        self.request(Method::POST, paths::CATEGORIES, Some(scope), &[], body)
            .await
    }

    pub async fn update_category(
        &self,
        scope: Scope,
        id: &str,
        input: &CategoryInput,
    ) -> Result<Category, ClientError> {
        let path = paths::item(paths::CATEGORIES, id);
        self.request(Method::PUT, &path, Some(scope), &[], Some(encode(input)?))
            .await
    }

    pub async fn delete_category(&self, scope: Scope, id: &str) -> Result<(), ClientError> {
        let path = paths::item(paths::CATEGORIES, id);
        self.request_unit(Method::DELETE, &path, Some(scope), None)
            .await
    }

    // ========================================================================
    // Family
    // ========================================================================

    /// The caller's family, or `None` when they do not belong to one.
    pub async fn my_family(&self) -> Result<Option<Family>, ClientError> {
        self.request_optional(Method::GET, paths::MY_FAMILY, None, &[], None)
            .await
    }

    pub async fn create_family(
        &self,
        request: &FamilyCreateRequest,
    ) -> Result<Family, ClientError> {
        self.request(Method::POST, paths::FAMILY, None, &[], Some(encode(request)?))
            .await
    }

    pub async fn join_family(&self, request: &FamilyJoinRequest) -> Result<Family, ClientError> {
        self.request(Method::POST, paths::FAMILY_JOIN, None, &[], Some(encode(request)?))
            .await
    }

    pub async fn leave_family(&self) -> Result<(), ClientError> {
        self.request_unit(Method::POST, paths::FAMILY_LEAVE, None, None)
            .await
    }

    pub async fn delete_family(&self) -> Result<(), ClientError> {
        self.request_unit(Method::DELETE, paths::FAMILY, None, None)
            .await
    }

    // ========================================================================
    // Preferences
    // ========================================================================

    pub async fn get_preferences(&self) -> Result<Preferences, ClientError> {
        self.request(Method::GET, paths::PREFERENCES, None, &[], None)
            .await
    }

    pub async fn update_preferences(
        &self,
        preferences: &Preferences,
    ) -> Result<Preferences, ClientError> {
        let body = Some(encode(preferences)?);
        self.request(Method::PUT, paths::PREFERENCES, None, &[], body)
            .await
    }
}
