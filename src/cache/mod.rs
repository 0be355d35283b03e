//! fireledger cache system
//!
//! A keyed, deduplicating store for every filter-parameterized API read,
//! kept coherent by an explicit invalidation event pipeline:
//!
//! - **Store**: one entry per [`CacheKey`] (kind + scope + canonical filters),
//!   in-flight deduplication, per-entry generation tags, subscriptions
//! - **Events**: mutations and scope switches are published as discrete
//!   [`CacheEvent`]s
//! - **Planner / Consumer**: batches of events are merged into an
//!   [`InvalidationPlan`] and applied to the store
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! idle_entry_limit = 256
//! consume_batch_limit = 100
//! event_queue_limit = 1024
//! ```

mod config;
mod consumer;
mod error;
mod events;
mod keys;
mod loader;
mod lock;
mod planner;
mod store;
mod trigger;

pub(crate) use lock::{mutex_lock, rw_read, rw_write};

pub use config::CacheConfig;
pub use consumer::{CacheConsumer, ConsumeReport};
pub use error::{FetchError, FetchErrorKind};
pub use events::{CacheEvent, Epoch, EventKind, EventQueue};
pub use keys::{CacheKey, Filters, SCOPED_NAMESPACE, SHARED_NAMESPACE, hash_value};
pub use loader::{FnLoader, ResourceLoader};
pub use planner::{InvalidationPlan, Target, targets_for};
pub use store::{
    CacheEntry, CacheStore, FetchResult, InvalidateOptions, Invalidation, Listener, Retarget,
    Subscription,
};
pub use trigger::CacheTrigger;
