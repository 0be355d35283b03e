//! Cache configuration.
//!
//! Controls the keyed store and the invalidation event pipeline via the
//! `[cache]` section of `fireledger.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_IDLE_ENTRY_LIMIT: usize = 256;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 1024;

/// Cache configuration from `fireledger.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Queue invalidation events and consume them in batches. When off, each
    /// event is applied to the store on its own as soon as it is published.
    pub enabled: bool,
    /// Maximum entries kept without subscribers before the oldest are evicted.
    pub idle_entry_limit: usize,
    /// Maximum events per consumption batch.
    pub consume_batch_limit: usize,
    /// Maximum pending events; the oldest event is dropped on overflow.
    pub event_queue_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_entry_limit: DEFAULT_IDLE_ENTRY_LIMIT,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            idle_entry_limit: settings.idle_entry_limit,
            consume_batch_limit: settings.consume_batch_limit,
            event_queue_limit: settings.event_queue_limit,
        }
    }
}

impl CacheConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the idle entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn idle_entry_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.idle_entry_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the batch limit as NonZeroUsize, clamping to 1 if zero.
    pub fn consume_batch_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.consume_batch_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the queue limit as NonZeroUsize, clamping to 1 if zero.
    pub fn event_queue_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.event_queue_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.idle_entry_limit, 256);
        assert_eq!(config.consume_batch_limit, 100);
        assert_eq!(config.event_queue_limit, 1024);
    }

    #[test]
    fn is_disabled_when_off() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!config.is_enabled());
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            idle_entry_limit: 0,
            consume_batch_limit: 0,
            event_queue_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.idle_entry_limit_non_zero().get(), 1);
        assert_eq!(config.consume_batch_limit_non_zero().get(), 1);
        assert_eq!(config.event_queue_limit_non_zero().get(), 1);
    }
}
