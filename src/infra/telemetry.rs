use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "fireledger_cache_hit_total",
            Unit::Count,
            "Total number of store reads that found data."
        );
        describe_counter!(
            "fireledger_cache_miss_total",
            Unit::Count,
            "Total number of store reads without data."
        );
        describe_counter!(
            "fireledger_cache_fetch_total",
            Unit::Count,
            "Total number of loads started, by resource kind."
        );
        describe_counter!(
            "fireledger_cache_dedup_total",
            Unit::Count,
            "Total number of fetches joined onto an in-flight load."
        );
        describe_counter!(
            "fireledger_cache_stale_discard_total",
            Unit::Count,
            "Total number of settled loads dropped as superseded."
        );
        describe_counter!(
            "fireledger_cache_evict_total",
            Unit::Count,
            "Total number of cache entries evicted, by reason."
        );
        describe_gauge!(
            "fireledger_cache_event_queue_len",
            Unit::Count,
            "Current number of pending cache events in the queue."
        );
        describe_counter!(
            "fireledger_cache_event_dropped_total",
            Unit::Count,
            "Total number of cache events dropped due to queue overflow."
        );
        describe_histogram!(
            "fireledger_cache_consume_ms",
            Unit::Milliseconds,
            "Cache consumption latency in milliseconds."
        );
        describe_counter!(
            "fireledger_mutation_total",
            Unit::Count,
            "Total number of mutations performed, by event kind and outcome."
        );
    });
}
