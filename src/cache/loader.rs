//! Loader seam between the keyed store and whatever performs the I/O.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use super::error::FetchError;
use super::keys::CacheKey;

/// Loads the data behind a cache key.
///
/// The key carries the resource kind, the scope and the filters, so a loader
/// never consults ambient state to decide which scope it is serving.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load(&self, key: &CacheKey) -> Result<Value, FetchError>;
}

/// Adapts an async closure into a [`ResourceLoader`].
pub struct FnLoader<F>(F);

impl<F> FnLoader<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> ResourceLoader for FnLoader<F>
where
    F: Fn(CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FetchError>> + Send,
{
    async fn load(&self, key: &CacheKey) -> Result<Value, FetchError> {
        (self.0)(key.clone()).await
    }
}
