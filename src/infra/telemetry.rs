use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache;
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            cache::METRIC_CACHE_HIT,
            Unit::Count,
            "Total number of cache lookups answered from the store."
        );
        describe_counter!(
            cache::METRIC_CACHE_MISS,
            Unit::Count,
            "Total number of cache lookups that fell through to the loader."
        );
        describe_counter!(
            cache::METRIC_STORE_ERROR,
            Unit::Count,
            "Total number of failed cache store operations, by operation."
        );
        describe_counter!(
            cache::METRIC_DECODE_ERROR,
            Unit::Count,
            "Total number of cache entries discarded because they could not be decoded."
        );
        describe_counter!(
            cache::METRIC_COALESCED,
            Unit::Count,
            "Total number of cache misses served by another caller's loader run."
        );
        describe_counter!(
            cache::METRIC_HANDLER_FAILURE,
            Unit::Count,
            "Total number of failed domain event handler invocations."
        );
        describe_counter!(
            cache::METRIC_ACTION_FAILURE,
            Unit::Count,
            "Total number of failed cache invalidation actions."
        );
        describe_histogram!(
            cache::METRIC_INVALIDATION_MS,
            Unit::Milliseconds,
            "Time spent applying the invalidation plan of one event."
        );
    });
}
