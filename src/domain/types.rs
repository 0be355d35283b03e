//! Shared domain enumerations for view scopes and cached resource kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The namespace a scoped request is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Personal,
    Family,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Personal => "personal",
            Scope::Family => "family",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = UnknownScope;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "personal" => Ok(Scope::Personal),
            "family" => Ok(Scope::Family),
            other => Err(UnknownScope(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scope `{0}` (expected `personal` or `family`)")]
pub struct UnknownScope(pub String);

/// Resource types the data layer caches.
///
/// Scoped kinds are evaluated against the active [`Scope`]; everything else is
/// the same regardless of view mode and survives scope switches untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Ledgers,
    Ledger,
    Expenses,
    ExpenseStats,
    Assets,
    AssetSummary,
    Flows,
    FlowStats,
    Debts,
    Categories,
    Family,
    Preferences,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 12] = [
        ResourceKind::Ledgers,
        ResourceKind::Ledger,
        ResourceKind::Expenses,
        ResourceKind::ExpenseStats,
        ResourceKind::Assets,
        ResourceKind::AssetSummary,
        ResourceKind::Flows,
        ResourceKind::FlowStats,
        ResourceKind::Debts,
        ResourceKind::Categories,
        ResourceKind::Family,
        ResourceKind::Preferences,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Ledgers => "ledgers",
            ResourceKind::Ledger => "ledger",
            ResourceKind::Expenses => "expenses",
            ResourceKind::ExpenseStats => "expense_stats",
            ResourceKind::Assets => "assets",
            ResourceKind::AssetSummary => "asset_summary",
            ResourceKind::Flows => "flows",
            ResourceKind::FlowStats => "flow_stats",
            ResourceKind::Debts => "debts",
            ResourceKind::Categories => "categories",
            ResourceKind::Family => "family",
            ResourceKind::Preferences => "preferences",
        }
    }

    /// Whether requests for this kind carry the view-mode header.
    pub fn is_scoped(self) -> bool {
        matches!(
            self,
            ResourceKind::Assets
                | ResourceKind::AssetSummary
                | ResourceKind::Flows
                | ResourceKind::FlowStats
                | ResourceKind::Debts
                | ResourceKind::Categories
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ResourceKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or(())
    }
}
