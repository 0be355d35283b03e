//! Cache key definitions.
//!
//! A [`CacheKey`] is the canonical identity of one cached request: resource
//! kind, scope (for scoped kinds only) and a canonically serialized filter
//! object. Filter key order never affects identity.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::types::{ResourceKind, Scope};

/// Namespace prefix shared by every scoped cache key.
pub const SCOPED_NAMESPACE: &str = "scoped";
/// Namespace of keys that ignore the active scope.
pub const SHARED_NAMESPACE: &str = "shared";

/// Request filters attached to a cache key.
///
/// Stored as a sorted map; nested objects are re-sorted on insertion and
/// `null` values are dropped, so `{a: 1, b: null}` and `{a: 1}` are the same
/// filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters(BTreeMap<String, Value>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter; `None`-like values are skipped.
    pub fn with(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        self.insert(name, value);
        self
    }

    /// Unserializable values are skipped with a warning.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Serialize) {
        let name = name.into();
        let value = match serde_json::to_value(value) {
            Ok(value) => canonicalize(value),
            Err(err) => {
                warn!(filter = %name, error = %err, "Skipping unserializable filter value");
                return;
            }
        };
        if value.is_null() {
            return;
        }
        self.0.insert(name, value);
    }

    /// Build filters from an arbitrary JSON object. Non-objects yield no filters.
    pub fn from_value(value: Value) -> Self {
        let mut filters = Self::new();
        if let Value::Object(map) = value {
            for (name, value) in map {
                filters.insert(name, value);
            }
        }
        filters
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical serialization: sorted keys at every depth, compact JSON.
    pub fn canonical(&self) -> String {
        if self.0.is_empty() {
            return "{}".to_string();
        }
        let mut out = String::from("{");
        for (idx, (name, value)) in self.0.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(&Value::String(name.clone()).to_string());
            out.push(':');
            out.push_str(&value.to_string());
        }
        out.push('}');
        out
    }

    /// Query-string pairs; strings are passed unquoted, everything else as JSON.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(name, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), rendered)
            })
            .collect()
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Canonical identity of a cached request.
#[derive(Clone)]
pub struct CacheKey {
    kind: ResourceKind,
    scope: Option<Scope>,
    filters: Arc<Filters>,
    canonical: Arc<str>,
}

impl CacheKey {
    /// Key for `kind` evaluated under `scope`. The scope is dropped for
    /// scope-independent kinds.
    pub fn new(kind: ResourceKind, scope: Scope, filters: Filters) -> Self {
        let scope = kind.is_scoped().then_some(scope);
        Self::build(kind, scope, filters)
    }

    /// Key for a scope-independent kind. Scoped kinds default to `personal`.
    pub fn shared(kind: ResourceKind, filters: Filters) -> Self {
        Self::new(kind, Scope::Personal, filters)
    }

    fn build(kind: ResourceKind, scope: Option<Scope>, filters: Filters) -> Self {
        let namespace = match scope {
            Some(scope) => format!("{SCOPED_NAMESPACE}:{scope}"),
            None => SHARED_NAMESPACE.to_string(),
        };
        let canonical = format!("{namespace}/{kind}?{}", filters.canonical());
        Self {
            kind,
            scope,
            filters: Arc::new(filters),
            canonical: Arc::from(canonical),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Scope the key is namespaced under; `None` for shared kinds.
    pub fn scope(&self) -> Option<Scope> {
        self.scope
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    /// `scoped:<scope>` or `shared`.
    pub fn namespace(&self) -> &str {
        self.canonical
            .split_once('/')
            .map_or(&*self.canonical, |(namespace, _)| namespace)
    }

    pub fn is_scoped(&self) -> bool {
        self.scope.is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Same request under another scope. Shared keys are returned unchanged.
    pub fn with_scope(&self, scope: Scope) -> Self {
        if self.scope.is_none() || self.scope == Some(scope) {
            return self.clone();
        }
        Self::build(self.kind, Some(scope), (*self.filters).clone())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKey").field(&&*self.canonical).finish()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

// ============================================================================
// Hash Utilities
// ============================================================================

/// Compute a hash for any hashable value.
pub fn hash_value<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unserializable_filter_value_is_skipped() {
        let bad: std::collections::HashMap<(u8, u8), u8> = [((0, 1), 2)].into_iter().collect();
        let filters = Filters::new().with("ledger_id", "l1").with("range", bad);

        assert!(filters.get("range").is_none());
        assert_eq!(filters.canonical(), r#"{"ledger_id":"l1"}"#);
    }

    #[test]
    fn filter_insertion_order_is_irrelevant() {
        let a = Filters::new().with("asset_id", "a1").with("month", "2026-10");
        let b = Filters::new().with("month", "2026-10").with("asset_id", "a1");
        assert_eq!(
            CacheKey::new(ResourceKind::Flows, Scope::Family, a),
            CacheKey::new(ResourceKind::Flows, Scope::Family, b)
        );
    }

    #[test]
    fn nested_objects_are_canonicalized() {
        let a = Filters::from_value(json!({"range": {"to": 2, "from": 1}, "q": "rent"}));
        let b = Filters::from_value(json!({"q": "rent", "range": {"from": 1, "to": 2}}));
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), r#"{"q":"rent","range":{"from":1,"to":2}}"#);
    }

    #[test]
    fn null_filters_are_dropped() {
        let a = Filters::new().with("ledger_id", "l1").with("category", None::<String>);
        let b = Filters::new().with("ledger_id", "l1");
        assert_eq!(a, b);
    }

    #[test]
    fn scope_is_part_of_scoped_keys_only() {
        let personal = CacheKey::new(ResourceKind::Assets, Scope::Personal, Filters::new());
        let family = CacheKey::new(ResourceKind::Assets, Scope::Family, Filters::new());
        assert_ne!(personal, family);
        assert_eq!(family.namespace(), "scoped:family");

        let a = CacheKey::new(ResourceKind::Ledgers, Scope::Personal, Filters::new());
        let b = CacheKey::new(ResourceKind::Ledgers, Scope::Family, Filters::new());
        assert_eq!(a, b);
        assert_eq!(a.namespace(), SHARED_NAMESPACE);
        assert!(a.scope().is_none());
    }

    #[test]
    fn with_scope_retargets_scoped_keys() {
        let filters = Filters::new().with("asset_id", "a1");
        let personal = CacheKey::new(ResourceKind::Flows, Scope::Personal, filters.clone());
        let family = personal.with_scope(Scope::Family);
        assert_eq!(family, CacheKey::new(ResourceKind::Flows, Scope::Family, filters));

        let shared = CacheKey::shared(ResourceKind::Preferences, Filters::new());
        assert_eq!(shared.with_scope(Scope::Family), shared);
    }

    #[test]
    fn query_pairs_render_strings_unquoted() {
        let filters = Filters::new().with("ledger_id", "l1").with("limit", 20);
        assert_eq!(
            filters.query_pairs(),
            vec![
                ("ledger_id".to_string(), "l1".to_string()),
                ("limit".to_string(), "20".to_string()),
            ]
        );
    }

    #[test]
    fn cache_key_hash_consistency() {
        let key1 = CacheKey::new(ResourceKind::Flows, Scope::Family, Filters::new());
        let key2 = CacheKey::new(ResourceKind::Flows, Scope::Family, Filters::new());
        assert_eq!(hash_value(&key1), hash_value(&key2));
    }
}
