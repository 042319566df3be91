use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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

    // Logs go to stderr so command output on stdout stays machine readable.
    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
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
            "shelfsync_cache_write_total",
            Unit::Count,
            "Total number of cache entry writes."
        );
        describe_counter!(
            "shelfsync_cache_invalidated_total",
            Unit::Count,
            "Total number of cache entries marked stale by invalidation."
        );
        describe_counter!(
            "shelfsync_propagated_keys_total",
            Unit::Count,
            "Total number of cache entries rewritten by cross-entity propagation."
        );
        describe_counter!(
            "shelfsync_fetch_total",
            Unit::Count,
            "Total number of page fetches by result."
        );
        describe_counter!(
            "shelfsync_fetch_discarded_total",
            Unit::Count,
            "Total number of fetch results dropped because they arrived too late."
        );
        describe_histogram!(
            "shelfsync_fetch_duration_ms",
            Unit::Milliseconds,
            "Page fetch latency in milliseconds."
        );
        describe_counter!(
            "shelfsync_mutation_total",
            Unit::Count,
            "Total number of settled mutations by kind and result."
        );
        describe_counter!(
            "shelfsync_mutation_rollback_total",
            Unit::Count,
            "Total number of mutations rolled back."
        );
        describe_counter!(
            "shelfsync_mutation_deduplicated_total",
            Unit::Count,
            "Total number of mutation requests joined to one already in flight."
        );
        describe_histogram!(
            "shelfsync_mutation_settle_ms",
            Unit::Milliseconds,
            "Time from optimistic write to settlement in milliseconds."
        );
        describe_counter!(
            "shelfsync_search_commit_total",
            Unit::Count,
            "Total number of debounced search queries committed."
        );
    });
}
