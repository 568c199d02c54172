use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names;
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Log output goes to stderr so command output on stdout stays clean.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

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

/// Register descriptions for the cache counters with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            metric_names::HIT,
            Unit::Count,
            "Total number of page cache hits, skeleton fallbacks included."
        );
        describe_counter!(
            metric_names::MISS,
            Unit::Count,
            "Total number of page cache misses."
        );
        describe_counter!(
            metric_names::SKELETON_HIT,
            Unit::Count,
            "Total number of misses answered with an ancestor skeleton."
        );
        describe_counter!(
            metric_names::STORE,
            Unit::Count,
            "Total number of pages written to the cache."
        );
        describe_counter!(
            metric_names::STORE_REJECTED,
            Unit::Count,
            "Total number of stores refused by the depth or variant bound."
        );
        describe_counter!(
            metric_names::PURGE,
            Unit::Count,
            "Total number of expired or corrupt entries removed."
        );
        describe_counter!(
            metric_names::SANDBOX_VIOLATION,
            Unit::Count,
            "Total number of deletions refused for resolving outside the cache root."
        );
    });
}
