use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::cache::{CacheKey, FetchError, ResourceLoader};
use crate::domain::types::ResourceKind;

use super::resources::paths;
use super::{ApiClient, ClientError};

/// Serves cache keys from the matching read endpoint.
///
/// Filters become query parameters, except `ledger_id` on a single-ledger key
/// which selects the path.
#[derive(Clone, Debug)]
pub struct ApiLoader {
    client: ApiClient,
}

impl ApiLoader {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    fn endpoint(key: &CacheKey) -> Result<(String, Vec<(String, String)>), ClientError> {
        let query = key.filters().query_pairs();
        let path = match key.kind() {
            ResourceKind::Ledgers => paths::LEDGERS.to_string(),
            ResourceKind::Ledger => {
                let id = key.filters().get_str("ledger_id").ok_or_else(|| {
                    ClientError::InvalidInput(format!("{key} has no ledger_id filter"))
                })?;
                return Ok((paths::item(paths::LEDGERS, id), Vec::new()));
            }
            ResourceKind::Expenses => paths::EXPENSES.to_string(),
            ResourceKind::ExpenseStats => paths::EXPENSE_STATS.to_string(),
            ResourceKind::Assets => paths::ASSETS.to_string(),
            ResourceKind::AssetSummary => paths::ASSET_SUMMARY.to_string(),
            ResourceKind::Flows => paths::FLOWS.to_string(),
            ResourceKind::FlowStats => paths::FLOW_STATS.to_string(),
            ResourceKind::Debts => paths::DEBTS.to_string(),
            ResourceKind::Categories => paths::CATEGORIES.to_string(),
            ResourceKind::Family => paths::MY_FAMILY.to_string(),
            ResourceKind::Preferences => paths::PREFERENCES.to_string(),
        };
        Ok((path, query))
    }
}

#[async_trait]
impl ResourceLoader for ApiLoader {
    async fn load(&self, key: &CacheKey) -> Result<Value, FetchError> {
        let (path, query) = Self::endpoint(key)?;
        let data: Option<Value> = self
            .client
            .request_optional(Method::GET, &path, key.scope(), &query, None)
            .await?;
        match data {
            Some(value) => Ok(value),
            // A missing family is a valid answer.
            None if key.kind() == ResourceKind::Family => Ok(Value::Null),
            None => Err(ClientError::Decode(format!("response for {key} carried no data")).into()),
        }
    }
}
